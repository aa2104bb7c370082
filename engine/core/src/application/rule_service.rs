// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Gateway Rule Services
//!
//! [`RuleService`] answers "which gateway rule applies to this call" over the
//! rule store and records hits. [`RuleSyncService`] keeps the store aligned
//! with the cluster's own rule set.
//!
//! ## Sync invariants
//! - Rules with `sync_back = false` are never pushed to the cluster.
//! - A linked rule whose external id disappears upstream is desynced
//!   (`external_id` cleared, `sync_back` off), never deleted.

use crate::application::error::DecisionError;
use crate::domain::call::{CallDirection, CallParams};
use crate::domain::cluster::ClusterId;
use crate::domain::pattern::PatternEngine;
use crate::domain::repository::{RepositoryError, RuleStore};
use crate::domain::routing_rule::{RoutingRule, RuleId, RuleMatch, RuleQuery};
use crate::domain::rule_response::RuleResponse;
use crate::domain::upstream::{GatewayRuleSource, UpstreamError};
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub struct RuleService {
    store: Arc<dyn RuleStore>,
    patterns: Arc<PatternEngine>,
}

impl RuleService {
    pub fn new(store: Arc<dyn RuleStore>, patterns: Arc<PatternEngine>) -> Self {
        Self { store, patterns }
    }

    /// Matching rules in evaluation order; `only_one` stops at the first.
    pub async fn get_matching_rules(
        &self,
        cluster_id: ClusterId,
        params: &CallParams,
        only_one: bool,
    ) -> Result<Vec<RoutingRule>, DecisionError> {
        let direction = params.direction();
        if direction == CallDirection::NonDial {
            return Ok(Vec::new());
        }
        if direction == CallDirection::Unknown {
            warn!(
                "Invalid call_direction '{}' for cluster {}",
                params.get_str(crate::domain::call::CALL_DIRECTION).unwrap_or_default(),
                cluster_id
            );
        }

        let query = RuleQuery::from_params(params);
        let mut matches = Vec::new();
        for rule in self.sorted_rules(cluster_id).await? {
            if rule.evaluate(&query, &self.patterns)?.is_match() {
                matches.push(rule);
                if only_one {
                    break;
                }
            }
        }
        Ok(matches)
    }

    /// First matching enabled rule.
    pub async fn get_active_rule(
        &self,
        cluster_id: ClusterId,
        params: &CallParams,
    ) -> Result<Option<RoutingRule>, DecisionError> {
        Ok(self
            .get_matching_rules(cluster_id, params, true)
            .await?
            .into_iter()
            .next())
    }

    /// Every rule with its match outcome, for operators debugging a call.
    pub async fn explain(
        &self,
        cluster_id: ClusterId,
        params: &CallParams,
    ) -> Result<Vec<(RoutingRule, RuleMatch)>, DecisionError> {
        let query = RuleQuery::from_params(params);
        let mut result = Vec::new();
        for rule in self.sorted_rules(cluster_id).await? {
            let outcome = rule.evaluate(&query, &self.patterns)?;
            result.push((rule, outcome));
        }
        Ok(result)
    }

    /// Count one hit for today and return the new daily total.
    pub async fn record_hit(&self, rule: &RoutingRule) -> Result<u64, RepositoryError> {
        let today = Utc::now().date_naive();
        self.store.record_hit(rule.id, today).await?;
        metrics::counter!("callgate_rule_hits_total").increment(1);
        self.store.hit_count(rule.id, today).await
    }

    /// Response fragment for a matched rule.
    pub async fn build_response(
        &self,
        rule: &RoutingRule,
        params: &CallParams,
    ) -> Result<Map<String, Value>, DecisionError> {
        let objects = self.store.remote_objects(rule.cluster_id).await?;
        Ok(RuleResponse::new(rule, params, &objects).build(&self.patterns)?)
    }

    async fn sorted_rules(&self, cluster_id: ClusterId) -> Result<Vec<RoutingRule>, RepositoryError> {
        let mut rules = self.store.list_rules(cluster_id).await?;
        rules.sort_by_key(|r| r.sort_key());
        Ok(rules)
    }
}

#[derive(Debug, Error)]
pub enum RuleSyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("rule {0} has sync_back disabled")]
    SyncDisabled(RuleId),

    #[error("rule {0} is linked to an external rule; desync it before deleting")]
    StillLinked(RuleId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub desynced: usize,
}

pub struct RuleSyncService {
    store: Arc<dyn RuleStore>,
    source: Arc<dyn GatewayRuleSource>,
}

impl RuleSyncService {
    pub fn new(store: Arc<dyn RuleStore>, source: Arc<dyn GatewayRuleSource>) -> Self {
        Self { store, source }
    }

    /// Pull the cluster's rules and remote object names into the store.
    pub async fn sync_down(&self, cluster_id: ClusterId) -> Result<SyncReport, RuleSyncError> {
        let remote_rules = self.source.fetch_rules(cluster_id).await?;
        let objects = self.source.fetch_objects(cluster_id).await?;
        self.store.set_remote_objects(cluster_id, objects).await?;

        let mut report = SyncReport::default();
        let now = Utc::now();
        let mut valid_ids = HashSet::new();

        for remote in remote_rules {
            let Some(external_id) = remote.external_id else {
                warn!("Skipping remote rule '{}' without an external id", remote.name);
                continue;
            };
            valid_ids.insert(external_id);

            let existing = self.store.find_by_external_id(cluster_id, external_id).await?;
            let mut rule = remote;
            rule.cluster_id = cluster_id;
            rule.in_sync = true;
            rule.last_external_sync = Some(now);

            match existing {
                Some(local) if !local.sync_back => {
                    report.skipped += 1;
                    continue;
                }
                Some(local) => {
                    rule.id = local.id;
                    rule.sync_back = true;
                    report.updated += 1;
                }
                None => {
                    rule.id = self.store.allocate_rule_id().await?;
                    rule.sync_back = true;
                    report.created += 1;
                }
            }
            self.store.save_rule(&rule).await?;
        }

        for mut local in self.store.list_rules(cluster_id).await? {
            match local.external_id {
                Some(external_id) if !valid_ids.contains(&external_id) => {
                    info!(
                        "Rule {} ({}) no longer exists upstream, marking as desynced",
                        local.id, local.name
                    );
                    local.external_id = None;
                    local.sync_back = false;
                    local.in_sync = false;
                    self.store.save_rule(&local).await?;
                    report.desynced += 1;
                }
                _ => {}
            }
        }

        info!(
            "Synced rules for cluster {}: {} created, {} updated, {} skipped, {} desynced",
            cluster_id, report.created, report.updated, report.skipped, report.desynced
        );
        Ok(report)
    }

    /// Push a local rule to the cluster, creating it there when unlinked.
    pub async fn sync_up(&self, mut rule: RoutingRule) -> Result<RoutingRule, RuleSyncError> {
        if !rule.sync_back {
            return Err(RuleSyncError::SyncDisabled(rule.id));
        }

        let pushed = match rule.external_id {
            Some(external_id) => self.source.update_rule(external_id, &rule).await.map(|()| external_id),
            None => self.source.create_rule(&rule).await,
        };
        let external_id = match pushed {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to push rule {} ({}) upstream: {}", rule.id, rule.name, e);
                rule.in_sync = false;
                self.store.save_rule(&rule).await?;
                return Err(e.into());
            }
        };
        rule.external_id = Some(external_id);
        rule.in_sync = true;
        rule.last_external_sync = Some(Utc::now());
        self.store.save_rule(&rule).await?;
        Ok(rule)
    }

    /// Delete a rule, removing it upstream first while it is linked.
    pub async fn delete(&self, rule: &RoutingRule) -> Result<(), RuleSyncError> {
        if let Some(external_id) = rule.external_id {
            if !rule.sync_back {
                return Err(RuleSyncError::StillLinked(rule.id));
            }
            match self.source.delete_rule(rule.cluster_id, external_id).await {
                Ok(()) | Err(UpstreamError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.store.delete_rule(rule.cluster_id, rule.id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routing_rule::RemoteObjects;
    use crate::infrastructure::repositories::InMemoryRuleStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeSource {
        rules: Mutex<Vec<RoutingRule>>,
        deleted: Mutex<Vec<i64>>,
        next_id: Mutex<i64>,
        unreachable: bool,
    }

    #[async_trait]
    impl GatewayRuleSource for FakeSource {
        async fn fetch_rules(&self, _cluster_id: ClusterId) -> Result<Vec<RoutingRule>, UpstreamError> {
            Ok(self.rules.lock().clone())
        }

        async fn fetch_objects(&self, _cluster_id: ClusterId) -> Result<RemoteObjects, UpstreamError> {
            Ok(RemoteObjects::new())
        }

        async fn create_rule(&self, _rule: &RoutingRule) -> Result<i64, UpstreamError> {
            if self.unreachable {
                return Err(UpstreamError::Transport("connection refused".to_string()));
            }
            let mut next = self.next_id.lock();
            *next += 1;
            Ok(1000 + *next)
        }

        async fn update_rule(&self, _external_id: i64, _rule: &RoutingRule) -> Result<(), UpstreamError> {
            if self.unreachable {
                return Err(UpstreamError::Transport("connection refused".to_string()));
            }
            Ok(())
        }

        async fn delete_rule(&self, _cluster_id: ClusterId, external_id: i64) -> Result<(), UpstreamError> {
            self.deleted.lock().push(external_id);
            Err(UpstreamError::NotFound(external_id.to_string()))
        }
    }

    fn remote_rule(external_id: i64, name: &str) -> RoutingRule {
        let mut rule = RoutingRule::new(0, ClusterId::default(), name, ".*");
        rule.external_id = Some(external_id);
        rule
    }

    fn dial_in(local: &str) -> CallParams {
        CallParams::new()
            .with("call_direction", "dial_in")
            .with("protocol", "sip")
            .with("local_alias", local)
    }

    #[tokio::test]
    async fn test_active_rule_follows_priority_then_id() {
        let store = Arc::new(InMemoryRuleStore::new());
        let cluster = ClusterId::new();
        for (id, priority) in [(3, 5), (1, 10), (2, 5)] {
            let mut rule = RoutingRule::new(id, cluster, format!("r{}", id), "65.*");
            rule.priority = priority;
            rule.match_incoming_calls = true;
            rule.match_incoming_sip = true;
            store.save_rule(&rule).await.unwrap();
        }
        let service = RuleService::new(store, Arc::new(PatternEngine::new(true)));

        let active = service.get_active_rule(cluster, &dial_in("65432")).await.unwrap();
        assert_eq!(active.map(|r| r.id), Some(RuleId(2)));

        let all = service.get_matching_rules(cluster, &dial_in("65432"), false).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_non_dial_matches_nothing() {
        let store = Arc::new(InMemoryRuleStore::new());
        let cluster = ClusterId::new();
        let mut rule = RoutingRule::new(1, cluster, "any", ".*");
        rule.match_incoming_calls = true;
        rule.match_outgoing_calls = true;
        store.save_rule(&rule).await.unwrap();
        let service = RuleService::new(store, Arc::new(PatternEngine::new(true)));

        let params = CallParams::new().with("call_direction", "non_dial").with("local_alias", "x");
        assert!(service.get_matching_rules(cluster, &params, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_hit_counts_per_day() {
        let store = Arc::new(InMemoryRuleStore::new());
        let service = RuleService::new(store, Arc::new(PatternEngine::new(true)));
        let rule = RoutingRule::new(1, ClusterId::new(), "gw", ".*");

        assert_eq!(service.record_hit(&rule).await.unwrap(), 1);
        assert_eq!(service.record_hit(&rule).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sync_down_creates_updates_and_desyncs() {
        let store = Arc::new(InMemoryRuleStore::new());
        let source = Arc::new(FakeSource::default());
        let cluster = ClusterId::new();

        let mut stale = RoutingRule::new(1, cluster, "stale", ".*");
        stale.external_id = Some(7);
        store.save_rule(&stale).await.unwrap();

        let mut pinned = RoutingRule::new(2, cluster, "pinned", ".*");
        pinned.external_id = Some(8);
        pinned.sync_back = false;
        store.save_rule(&pinned).await.unwrap();

        *source.rules.lock() = vec![remote_rule(8, "pinned-upstream"), remote_rule(9, "new")];

        let sync = RuleSyncService::new(store.clone(), source);
        let report = sync.sync_down(cluster).await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                created: 1,
                updated: 0,
                skipped: 1,
                desynced: 1
            }
        );

        let stale = store.find_rule(cluster, RuleId(1)).await.unwrap().unwrap();
        assert_eq!(stale.external_id, None);
        assert!(!stale.sync_back);

        let pinned = store.find_rule(cluster, RuleId(2)).await.unwrap().unwrap();
        assert_eq!(pinned.name, "pinned");

        let created = store.find_by_external_id(cluster, 9).await.unwrap().unwrap();
        assert!(created.in_sync);
        assert_eq!(created.cluster_id, cluster);
    }

    #[tokio::test]
    async fn test_sync_up_refuses_disabled_rules() {
        let store = Arc::new(InMemoryRuleStore::new());
        let sync = RuleSyncService::new(store.clone(), Arc::new(FakeSource::default()));
        let cluster = ClusterId::new();

        let mut rule = RoutingRule::new(1, cluster, "local", ".*");
        rule.sync_back = false;
        assert!(matches!(sync.sync_up(rule.clone()).await, Err(RuleSyncError::SyncDisabled(_))));

        rule.sync_back = true;
        let pushed = sync.sync_up(rule).await.unwrap();
        assert_eq!(pushed.external_id, Some(1001));
        assert!(pushed.in_sync);
    }

    #[tokio::test]
    async fn test_failed_push_marks_rule_out_of_sync() {
        let store = Arc::new(InMemoryRuleStore::new());
        let source = Arc::new(FakeSource {
            unreachable: true,
            ..FakeSource::default()
        });
        let sync = RuleSyncService::new(store.clone(), source);
        let cluster = ClusterId::new();

        let mut linked = RoutingRule::new(1, cluster, "linked", ".*");
        linked.external_id = Some(42);
        linked.in_sync = true;
        store.save_rule(&linked).await.unwrap();

        let result = sync.sync_up(linked).await;
        assert!(matches!(result, Err(RuleSyncError::Upstream(UpstreamError::Transport(_)))));
        let stored = store.find_rule(cluster, RuleId(1)).await.unwrap().unwrap();
        assert!(!stored.in_sync);
        assert_eq!(stored.external_id, Some(42));

        let mut unlinked = RoutingRule::new(2, cluster, "unlinked", ".*");
        unlinked.in_sync = true;
        store.save_rule(&unlinked).await.unwrap();

        assert!(sync.sync_up(unlinked).await.is_err());
        let stored = store.find_rule(cluster, RuleId(2)).await.unwrap().unwrap();
        assert!(!stored.in_sync);
        assert_eq!(stored.external_id, None);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_upstream_rule() {
        let store = Arc::new(InMemoryRuleStore::new());
        let source = Arc::new(FakeSource::default());
        let sync = RuleSyncService::new(store.clone(), source.clone());
        let cluster = ClusterId::new();

        let mut rule = RoutingRule::new(1, cluster, "linked", ".*");
        rule.external_id = Some(42);
        store.save_rule(&rule).await.unwrap();

        sync.delete(&rule).await.unwrap();
        assert_eq!(*source.deleted.lock(), vec![42]);
        assert!(store.find_rule(cluster, RuleId(1)).await.unwrap().is_none());

        rule.sync_back = false;
        assert!(matches!(sync.delete(&rule).await, Err(RuleSyncError::StillLinked(_))));
    }
}
