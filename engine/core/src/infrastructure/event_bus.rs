// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Decision Event Bus - Pub/Sub for audit records
//
// Every audit record appended through `PublishingAuditLog` is broadcast to
// live observers (log tailers, dashboards). In-memory only; observers that
// connect late miss earlier records.

use crate::domain::audit::{AuditKind, DecisionAuditRecord};
use crate::domain::cluster::ClusterId;
use crate::domain::repository::{AuditLog, RepositoryError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for decision audit records
#[derive(Clone)]
pub struct DecisionEventBus {
    sender: Arc<broadcast::Sender<DecisionAuditRecord>>,
}

impl DecisionEventBus {
    /// Capacity is how many records are buffered before slow receivers lag.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, record: DecisionAuditRecord) {
        debug!("Publishing {:?} audit record {}", record.kind, record.id);

        let receiver_count = self.sender.send(record).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to decision events");
        }
    }

    pub fn subscribe(&self) -> DecisionReceiver {
        DecisionReceiver {
            receiver: self.sender.subscribe(),
            cluster_id: None,
            kind: None,
        }
    }

    /// Only records of one cluster, optionally of one kind.
    pub fn subscribe_cluster(&self, cluster_id: ClusterId, kind: Option<AuditKind>) -> DecisionReceiver {
        DecisionReceiver {
            receiver: self.sender.subscribe(),
            cluster_id: Some(cluster_id),
            kind,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for DecisionEventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub struct DecisionReceiver {
    receiver: broadcast::Receiver<DecisionAuditRecord>,
    cluster_id: Option<ClusterId>,
    kind: Option<AuditKind>,
}

impl DecisionReceiver {
    /// Next record passing this receiver's filter.
    pub async fn recv(&mut self) -> Result<DecisionAuditRecord, EventBusError> {
        loop {
            let record = self.receiver.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Closed => EventBusError::Closed,
                broadcast::error::RecvError::Lagged(n) => {
                    warn!("Decision receiver lagged by {} records", n);
                    EventBusError::Lagged(n)
                }
            })?;
            if self.accepts(&record) {
                return Ok(record);
            }
        }
    }

    fn accepts(&self, record: &DecisionAuditRecord) -> bool {
        self.cluster_id.map(|c| c == record.cluster_id).unwrap_or(true)
            && self.kind.map(|k| k == record.kind).unwrap_or(true)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("Receiver lagged by {0} records (records were dropped)")]
    Lagged(u64),
}

/// Appends to an inner log, then publishes the record.
pub struct PublishingAuditLog {
    inner: Arc<dyn AuditLog>,
    bus: DecisionEventBus,
}

impl PublishingAuditLog {
    pub fn new(inner: Arc<dyn AuditLog>, bus: DecisionEventBus) -> Self {
        Self { inner, bus }
    }
}

#[async_trait]
impl AuditLog for PublishingAuditLog {
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError> {
        self.inner.append(record.clone()).await?;
        self.bus.publish(record);
        Ok(())
    }

    async fn recent(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        self.inner.recent(cluster_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::InMemoryAuditLog;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = DecisionEventBus::new(10);
        let mut receiver = bus.subscribe();
        let cluster = ClusterId::new();

        bus.publish(DecisionAuditRecord::new(cluster, AuditKind::Exchange, "continue"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.cluster_id, cluster);
        assert_eq!(received.action, "continue");
    }

    #[tokio::test]
    async fn test_cluster_and_kind_filter() {
        let bus = DecisionEventBus::new(10);
        let cluster = ClusterId::new();
        let mut receiver = bus.subscribe_cluster(cluster, Some(AuditKind::Limit));

        bus.publish(DecisionAuditRecord::new(ClusterId::new(), AuditKind::Limit, "reject"));
        bus.publish(DecisionAuditRecord::new(cluster, AuditKind::Exchange, "continue"));
        bus.publish(DecisionAuditRecord::new(cluster, AuditKind::Limit, "log"));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.kind, AuditKind::Limit);
        assert_eq!(received.action, "log");
    }

    #[tokio::test]
    async fn test_publishing_log_stores_and_broadcasts() {
        let bus = DecisionEventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let inner = Arc::new(InMemoryAuditLog::new());
        let log = PublishingAuditLog::new(inner.clone(), bus);
        let cluster = ClusterId::new();
        log.append(DecisionAuditRecord::new(cluster, AuditKind::Authorization, "reject"))
            .await
            .unwrap();

        assert_eq!(inner.len(), 1);
        assert_eq!(first.recv().await.unwrap().action, "reject");
        assert_eq!(second.recv().await.unwrap().action, "reject");
        assert_eq!(log.recent(cluster, 5).await.unwrap().len(), 1);
    }
}
