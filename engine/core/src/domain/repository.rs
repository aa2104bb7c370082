// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the policy engine. One trait per aggregate,
//! defined here and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ClusterPolicyStore` | `ClusterPolicy` | `InMemoryClusterPolicyStore` |
//! | `RuleStore` | `RoutingRule` | `InMemoryRuleStore` |
//! | `CustomerStore` | `Customer`, `CustomerMatch` | `InMemoryCustomerStore` |
//! | `ConferenceStore` | `Conference` | `InMemoryConferenceStore` |
//! | `AuthorizationStore` | overrides and grants | `InMemoryAuthorizationStore`, `PostgresAuthorizationStore` |
//! | `LimitStore` | limit policies and counters | `InMemoryLimitStore` |
//! | `ExternalPolicyStore` | `ExternalPolicyEndpoint` | `InMemoryExternalPolicyStore` |
//! | `ScriptStore` | `ScriptRule` | `InMemoryScriptStore` |
//! | `AuditLog` | `DecisionAuditRecord` | `InMemoryAuditLog`, `PublishingAuditLog` |
//!
//! All list operations return items in evaluation order (`priority`, then id).

use crate::domain::audit::DecisionAuditRecord;
use crate::domain::authorization::{AuthorizationOverride, GrantId, TimeBoxedAuthorization};
use crate::domain::cluster::{ClusterId, ClusterPolicy};
use crate::domain::customer::{Conference, Customer, CustomerId, CustomerMatch};
use crate::domain::external_policy::ExternalPolicyEndpoint;
use crate::domain::limits::{CustomerLimitPolicy, CustomerLimitState};
use crate::domain::routing_rule::{RemoteObjects, RoutingRule, RuleId};
use crate::domain::script::ScriptRule;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

#[async_trait]
pub trait ClusterPolicyStore: Send + Sync {
    async fn find_by_secret(&self, secret_key: &str) -> Result<Option<ClusterPolicy>, RepositoryError>;

    async fn find(&self, cluster_id: ClusterId) -> Result<Option<ClusterPolicy>, RepositoryError>;

    async fn save(&self, policy: &ClusterPolicy) -> Result<(), RepositoryError>;

    async fn list_all(&self) -> Result<Vec<ClusterPolicy>, RepositoryError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules of the cluster, enabled or not, in evaluation order.
    async fn list_rules(&self, cluster_id: ClusterId) -> Result<Vec<RoutingRule>, RepositoryError>;

    async fn find_rule(&self, cluster_id: ClusterId, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError>;

    async fn find_by_external_id(
        &self,
        cluster_id: ClusterId,
        external_id: i64,
    ) -> Result<Option<RoutingRule>, RepositoryError>;

    /// Create or update.
    async fn save_rule(&self, rule: &RoutingRule) -> Result<(), RepositoryError>;

    async fn allocate_rule_id(&self) -> Result<RuleId, RepositoryError>;

    async fn delete_rule(&self, cluster_id: ClusterId, id: RuleId) -> Result<(), RepositoryError>;

    /// Add one hit to the rule's counter for `date`.
    async fn record_hit(&self, rule_id: RuleId, date: NaiveDate) -> Result<(), RepositoryError>;

    async fn hit_count(&self, rule_id: RuleId, date: NaiveDate) -> Result<u64, RepositoryError>;

    async fn remote_objects(&self, cluster_id: ClusterId) -> Result<RemoteObjects, RepositoryError>;

    async fn set_remote_objects(&self, cluster_id: ClusterId, objects: RemoteObjects) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError>;

    async fn save(&self, customer: &Customer) -> Result<(), RepositoryError>;

    /// Customer matches of the cluster in evaluation order.
    async fn matches_for(&self, cluster_id: ClusterId) -> Result<Vec<CustomerMatch>, RepositoryError>;

    async fn save_match(&self, customer_match: &CustomerMatch) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ConferenceStore: Send + Sync {
    /// Active conference answering to `alias` (see [`Conference::answers_to`]).
    async fn find_by_alias(&self, cluster_id: ClusterId, alias: &str) -> Result<Option<Conference>, RepositoryError>;

    async fn save(&self, conference: &Conference) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Overrides of `customer` scoped to `cluster_id` or to no cluster.
    async fn overrides_for(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
    ) -> Result<Vec<AuthorizationOverride>, RepositoryError>;

    async fn save_override(&self, grant: &AuthorizationOverride) -> Result<(), RepositoryError>;

    /// Grants for exactly `local_alias` that are valid at `ts` and not exhausted.
    async fn active_grants(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        local_alias: &str,
        ts: DateTime<Utc>,
    ) -> Result<Vec<TimeBoxedAuthorization>, RepositoryError>;

    async fn save_grant(&self, grant: &TimeBoxedAuthorization) -> Result<(), RepositoryError>;

    /// Atomically record one use if the grant is still valid and below its
    /// ceiling. Returns the updated grant, or `None` if it could not be used.
    async fn try_use_grant(
        &self,
        id: GrantId,
        ts: DateTime<Utc>,
    ) -> Result<Option<TimeBoxedAuthorization>, RepositoryError>;
}

#[async_trait]
pub trait LimitStore: Send + Sync {
    async fn policies_for(&self, customer_id: CustomerId) -> Result<Vec<CustomerLimitPolicy>, RepositoryError>;

    async fn save_policy(&self, policy: &CustomerLimitPolicy) -> Result<(), RepositoryError>;

    /// Current counters; zeroed state if none recorded yet.
    async fn state(&self, customer_id: CustomerId, cluster_id: ClusterId) -> Result<CustomerLimitState, RepositoryError>;

    async fn change_participants(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        delta: i64,
        gateway: bool,
    ) -> Result<CustomerLimitState, RepositoryError>;

    async fn change_calls(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        delta: i64,
    ) -> Result<CustomerLimitState, RepositoryError>;
}

#[async_trait]
pub trait ExternalPolicyStore: Send + Sync {
    async fn list_for(&self, cluster_id: ClusterId) -> Result<Vec<ExternalPolicyEndpoint>, RepositoryError>;

    async fn save(&self, endpoint: &ExternalPolicyEndpoint) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn list_for(&self, cluster_id: ClusterId) -> Result<Vec<ScriptRule>, RepositoryError>;

    async fn save(&self, script: &ScriptRule) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError>;

    /// Most recent records of the cluster, newest first.
    async fn recent(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<DecisionAuditRecord>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
