// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the store traits declared in
//! `crate::domain::repository`.
//!
//! # Available Implementations
//!
//! ## In-Memory Stores
//!
//! Thread-safe, lock-protected maps used by the default node, the offline
//! `evaluate` command and the test suite. Every store hands out clones; no
//! caller ever holds a lock across an `.await`.
//!
//! ## PostgreSQL
//!
//! - **PostgresAuthorizationStore** - grants with a transactional usage counter
//!
//! # Usage
//!
//! ```no_run
//! use callgate_core::infrastructure::repositories::InMemoryRuleStore;
//! use std::sync::Arc;
//!
//! let rules = Arc::new(InMemoryRuleStore::new());
//! ```

pub mod postgres_authorization;

pub use postgres_authorization::PostgresAuthorizationStore;

use crate::domain::audit::DecisionAuditRecord;
use crate::domain::authorization::{AuthorizationOverride, GrantId, TimeBoxedAuthorization};
use crate::domain::cluster::{ClusterId, ClusterPolicy};
use crate::domain::customer::{Conference, Customer, CustomerId, CustomerMatch};
use crate::domain::external_policy::ExternalPolicyEndpoint;
use crate::domain::limits::{CustomerLimitPolicy, CustomerLimitState};
use crate::domain::repository::{
    AuditLog, AuthorizationStore, ClusterPolicyStore, ConferenceStore, CustomerStore, ExternalPolicyStore,
    LimitStore, RepositoryError, RuleStore, ScriptStore,
};
use crate::domain::routing_rule::{RemoteObjects, RoutingRule, RuleId};
use crate::domain::script::ScriptRule;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InMemoryClusterPolicyStore {
    policies: Arc<RwLock<HashMap<ClusterId, ClusterPolicy>>>,
}

impl InMemoryClusterPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterPolicyStore for InMemoryClusterPolicyStore {
    async fn find_by_secret(&self, secret_key: &str) -> Result<Option<ClusterPolicy>, RepositoryError> {
        let policies = self.policies.read();
        Ok(policies.values().find(|p| p.secret_key == secret_key).cloned())
    }

    async fn find(&self, cluster_id: ClusterId) -> Result<Option<ClusterPolicy>, RepositoryError> {
        Ok(self.policies.read().get(&cluster_id).cloned())
    }

    async fn save(&self, policy: &ClusterPolicy) -> Result<(), RepositoryError> {
        self.policies.write().insert(policy.cluster_id, policy.clone());
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<ClusterPolicy>, RepositoryError> {
        let mut all: Vec<ClusterPolicy> = self.policies.read().values().cloned().collect();
        all.sort_by_key(|p| p.cluster_id);
        Ok(all)
    }
}

#[derive(Default)]
struct RuleTables {
    rules: HashMap<RuleId, RoutingRule>,
    hits: HashMap<(RuleId, NaiveDate), u64>,
    objects: HashMap<ClusterId, RemoteObjects>,
    last_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryRuleStore {
    tables: Arc<RwLock<RuleTables>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_rules(&self, cluster_id: ClusterId) -> Result<Vec<RoutingRule>, RepositoryError> {
        let tables = self.tables.read();
        let mut rules: Vec<RoutingRule> = tables
            .rules
            .values()
            .filter(|r| r.cluster_id == cluster_id)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.sort_key());
        Ok(rules)
    }

    async fn find_rule(&self, cluster_id: ClusterId, id: RuleId) -> Result<Option<RoutingRule>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables.rules.get(&id).filter(|r| r.cluster_id == cluster_id).cloned())
    }

    async fn find_by_external_id(
        &self,
        cluster_id: ClusterId,
        external_id: i64,
    ) -> Result<Option<RoutingRule>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .rules
            .values()
            .find(|r| r.cluster_id == cluster_id && r.external_id == Some(external_id))
            .cloned())
    }

    async fn save_rule(&self, rule: &RoutingRule) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        tables.last_id = tables.last_id.max(rule.id.0);
        tables.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn allocate_rule_id(&self) -> Result<RuleId, RepositoryError> {
        let mut tables = self.tables.write();
        tables.last_id += 1;
        Ok(RuleId(tables.last_id))
    }

    async fn delete_rule(&self, cluster_id: ClusterId, id: RuleId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write();
        match tables.rules.get(&id) {
            Some(rule) if rule.cluster_id == cluster_id => {
                tables.rules.remove(&id);
                tables.hits.retain(|(rule_id, _), _| *rule_id != id);
                Ok(())
            }
            _ => Err(RepositoryError::NotFound(format!("rule {}", id))),
        }
    }

    async fn record_hit(&self, rule_id: RuleId, date: NaiveDate) -> Result<(), RepositoryError> {
        *self.tables.write().hits.entry((rule_id, date)).or_insert(0) += 1;
        Ok(())
    }

    async fn hit_count(&self, rule_id: RuleId, date: NaiveDate) -> Result<u64, RepositoryError> {
        Ok(self.tables.read().hits.get(&(rule_id, date)).copied().unwrap_or(0))
    }

    async fn remote_objects(&self, cluster_id: ClusterId) -> Result<RemoteObjects, RepositoryError> {
        Ok(self.tables.read().objects.get(&cluster_id).cloned().unwrap_or_default())
    }

    async fn set_remote_objects(&self, cluster_id: ClusterId, objects: RemoteObjects) -> Result<(), RepositoryError> {
        self.tables.write().objects.insert(cluster_id, objects);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCustomerStore {
    customers: Arc<RwLock<HashMap<CustomerId, Customer>>>,
    matches: Arc<RwLock<Vec<CustomerMatch>>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn find(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        Ok(self.customers.read().get(&id).cloned())
    }

    async fn save(&self, customer: &Customer) -> Result<(), RepositoryError> {
        self.customers.write().insert(customer.id, customer.clone());
        Ok(())
    }

    async fn matches_for(&self, cluster_id: ClusterId) -> Result<Vec<CustomerMatch>, RepositoryError> {
        let mut matches: Vec<CustomerMatch> = self
            .matches
            .read()
            .iter()
            .filter(|m| m.cluster_id == cluster_id)
            .cloned()
            .collect();
        matches.sort_by_key(|m| m.sort_key());
        Ok(matches)
    }

    async fn save_match(&self, customer_match: &CustomerMatch) -> Result<(), RepositoryError> {
        let mut matches = self.matches.write();
        match matches.iter_mut().find(|m| m.id == customer_match.id) {
            Some(existing) => *existing = customer_match.clone(),
            None => matches.push(customer_match.clone()),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryConferenceStore {
    conferences: Arc<RwLock<Vec<Conference>>>,
}

impl InMemoryConferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConferenceStore for InMemoryConferenceStore {
    async fn find_by_alias(&self, cluster_id: ClusterId, alias: &str) -> Result<Option<Conference>, RepositoryError> {
        let conferences = self.conferences.read();
        Ok(conferences
            .iter()
            .find(|c| c.cluster_id == cluster_id && c.is_active && c.answers_to(alias))
            .cloned())
    }

    async fn save(&self, conference: &Conference) -> Result<(), RepositoryError> {
        let mut conferences = self.conferences.write();
        match conferences.iter_mut().find(|c| c.id == conference.id) {
            Some(existing) => *existing = conference.clone(),
            None => conferences.push(conference.clone()),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuthorizationStore {
    overrides: Arc<RwLock<Vec<AuthorizationOverride>>>,
    grants: Arc<Mutex<HashMap<GrantId, TimeBoxedAuthorization>>>,
}

impl InMemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, id: GrantId) -> Option<TimeBoxedAuthorization> {
        self.grants.lock().get(&id).cloned()
    }
}

fn in_scope(scope: Option<ClusterId>, cluster_id: ClusterId) -> bool {
    scope.map(|c| c == cluster_id).unwrap_or(true)
}

#[async_trait]
impl AuthorizationStore for InMemoryAuthorizationStore {
    async fn overrides_for(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
    ) -> Result<Vec<AuthorizationOverride>, RepositoryError> {
        Ok(self
            .overrides
            .read()
            .iter()
            .filter(|o| o.customer_id == customer_id && in_scope(o.cluster_id, cluster_id))
            .cloned()
            .collect())
    }

    async fn save_override(&self, grant: &AuthorizationOverride) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write();
        match overrides.iter_mut().find(|o| o.id == grant.id) {
            Some(existing) => *existing = grant.clone(),
            None => overrides.push(grant.clone()),
        }
        Ok(())
    }

    async fn active_grants(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        local_alias: &str,
        ts: DateTime<Utc>,
    ) -> Result<Vec<TimeBoxedAuthorization>, RepositoryError> {
        let mut grants: Vec<TimeBoxedAuthorization> = self
            .grants
            .lock()
            .values()
            .filter(|g| {
                g.customer_id == customer_id
                    && in_scope(g.cluster_id, cluster_id)
                    && g.local_alias == local_alias
                    && g.is_active_at(ts)
                    && !g.is_exhausted()
            })
            .cloned()
            .collect();
        grants.sort_by_key(|g| g.valid_to);
        Ok(grants)
    }

    async fn save_grant(&self, grant: &TimeBoxedAuthorization) -> Result<(), RepositoryError> {
        self.grants.lock().insert(grant.id, grant.clone());
        Ok(())
    }

    async fn try_use_grant(
        &self,
        id: GrantId,
        ts: DateTime<Utc>,
    ) -> Result<Option<TimeBoxedAuthorization>, RepositoryError> {
        let mut grants = self.grants.lock();
        let Some(grant) = grants.get_mut(&id) else {
            return Ok(None);
        };
        if !grant.is_active_at(ts) || grant.is_exhausted() {
            return Ok(None);
        }
        grant.record_use(ts);
        Ok(Some(grant.clone()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLimitStore {
    policies: Arc<RwLock<Vec<CustomerLimitPolicy>>>,
    states: Arc<Mutex<HashMap<(CustomerId, ClusterId), CustomerLimitState>>>,
}

impl InMemoryLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        change: impl FnOnce(&mut CustomerLimitState),
    ) -> CustomerLimitState {
        let mut states = self.states.lock();
        let state = states
            .entry((customer_id, cluster_id))
            .or_insert_with(|| CustomerLimitState::new(customer_id, cluster_id));
        change(state);
        state.clone()
    }
}

#[async_trait]
impl LimitStore for InMemoryLimitStore {
    async fn policies_for(&self, customer_id: CustomerId) -> Result<Vec<CustomerLimitPolicy>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .iter()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect())
    }

    async fn save_policy(&self, policy: &CustomerLimitPolicy) -> Result<(), RepositoryError> {
        let mut policies = self.policies.write();
        match policies
            .iter_mut()
            .find(|p| p.customer_id == policy.customer_id && p.date_start == policy.date_start)
        {
            Some(existing) => *existing = policy.clone(),
            None => policies.push(policy.clone()),
        }
        Ok(())
    }

    async fn state(&self, customer_id: CustomerId, cluster_id: ClusterId) -> Result<CustomerLimitState, RepositoryError> {
        Ok(self
            .states
            .lock()
            .get(&(customer_id, cluster_id))
            .cloned()
            .unwrap_or_else(|| CustomerLimitState::new(customer_id, cluster_id)))
    }

    async fn change_participants(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        delta: i64,
        gateway: bool,
    ) -> Result<CustomerLimitState, RepositoryError> {
        Ok(self.update(customer_id, cluster_id, |s| s.change_participants(delta, gateway)))
    }

    async fn change_calls(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        delta: i64,
    ) -> Result<CustomerLimitState, RepositoryError> {
        Ok(self.update(customer_id, cluster_id, |s| s.change_calls(delta)))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExternalPolicyStore {
    endpoints: Arc<RwLock<Vec<ExternalPolicyEndpoint>>>,
}

impl InMemoryExternalPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExternalPolicyStore for InMemoryExternalPolicyStore {
    async fn list_for(&self, cluster_id: ClusterId) -> Result<Vec<ExternalPolicyEndpoint>, RepositoryError> {
        let mut endpoints: Vec<ExternalPolicyEndpoint> = self
            .endpoints
            .read()
            .iter()
            .filter(|e| e.cluster_id == cluster_id)
            .cloned()
            .collect();
        endpoints.sort_by_key(|e| e.sort_key());
        Ok(endpoints)
    }

    async fn save(&self, endpoint: &ExternalPolicyEndpoint) -> Result<(), RepositoryError> {
        let mut endpoints = self.endpoints.write();
        match endpoints.iter_mut().find(|e| e.id == endpoint.id) {
            Some(existing) => *existing = endpoint.clone(),
            None => endpoints.push(endpoint.clone()),
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryScriptStore {
    scripts: Arc<RwLock<Vec<ScriptRule>>>,
}

impl InMemoryScriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScriptStore for InMemoryScriptStore {
    async fn list_for(&self, cluster_id: ClusterId) -> Result<Vec<ScriptRule>, RepositoryError> {
        let mut scripts: Vec<ScriptRule> = self
            .scripts
            .read()
            .iter()
            .filter(|s| s.cluster_id == cluster_id)
            .cloned()
            .collect();
        scripts.sort_by_key(|s| s.priority);
        Ok(scripts)
    }

    async fn save(&self, script: &ScriptRule) -> Result<(), RepositoryError> {
        let mut scripts = self.scripts.write();
        match scripts.iter_mut().find(|s| s.id == script.id) {
            Some(existing) => *existing = script.clone(),
            None => scripts.push(script.clone()),
        }
        Ok(())
    }
}

const AUDIT_CAPACITY: usize = 10_000;

/// Bounded audit log; the oldest records are dropped first.
#[derive(Clone)]
pub struct InMemoryAuditLog {
    records: Arc<Mutex<VecDeque<DecisionAuditRecord>>>,
    capacity: usize,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::with_capacity(AUDIT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.lock();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    async fn recent(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<DecisionAuditRecord>, RepositoryError> {
        Ok(self
            .records
            .lock()
            .iter()
            .rev()
            .filter(|r| r.cluster_id == cluster_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// One handle per store, shared by the services of a node.
#[derive(Clone)]
pub struct PolicyStores {
    pub clusters: Arc<dyn ClusterPolicyStore>,
    pub rules: Arc<dyn RuleStore>,
    pub customers: Arc<dyn CustomerStore>,
    pub conferences: Arc<dyn ConferenceStore>,
    pub authorization: Arc<dyn AuthorizationStore>,
    pub limits: Arc<dyn LimitStore>,
    pub external_policies: Arc<dyn ExternalPolicyStore>,
    pub scripts: Arc<dyn ScriptStore>,
    pub audit: Arc<dyn AuditLog>,
}

impl PolicyStores {
    pub fn in_memory() -> Self {
        Self {
            clusters: Arc::new(InMemoryClusterPolicyStore::new()),
            rules: Arc::new(InMemoryRuleStore::new()),
            customers: Arc::new(InMemoryCustomerStore::new()),
            conferences: Arc::new(InMemoryConferenceStore::new()),
            authorization: Arc::new(InMemoryAuthorizationStore::new()),
            limits: Arc::new(InMemoryLimitStore::new()),
            external_policies: Arc::new(InMemoryExternalPolicyStore::new()),
            scripts: Arc::new(InMemoryScriptStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
        }
    }

    pub fn with_authorization(mut self, store: Arc<dyn AuthorizationStore>) -> Self {
        self.authorization = store;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }
}

impl Default for PolicyStores {
    fn default() -> Self {
        Self::in_memory()
    }
}
