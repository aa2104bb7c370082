// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Ports to the conferencing cluster's own management API.

use crate::domain::cluster::ClusterId;
use crate::domain::customer::Conference;
use crate::domain::routing_rule::{RemoteObjects, RoutingRule};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("not found upstream: {0}")]
    NotFound(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("unexpected upstream payload: {0}")]
    InvalidPayload(String),
}

/// On-demand conference lookup used when an alias is unknown locally.
#[async_trait]
pub trait ConferenceSource: Send + Sync {
    async fn fetch_conference(
        &self,
        cluster_id: ClusterId,
        alias: &str,
    ) -> Result<Option<Conference>, UpstreamError>;
}

/// The cluster's native gateway-rule set, kept in sync with the local store.
#[async_trait]
pub trait GatewayRuleSource: Send + Sync {
    async fn fetch_rules(&self, cluster_id: ClusterId) -> Result<Vec<RoutingRule>, UpstreamError>;

    async fn fetch_objects(&self, cluster_id: ClusterId) -> Result<RemoteObjects, UpstreamError>;

    /// Create the rule upstream and return its external id.
    async fn create_rule(&self, rule: &RoutingRule) -> Result<i64, UpstreamError>;

    async fn update_rule(&self, external_id: i64, rule: &RoutingRule) -> Result<(), UpstreamError>;

    async fn delete_rule(&self, cluster_id: ClusterId, external_id: i64) -> Result<(), UpstreamError>;
}
