// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Seed data
//!
//! Loads clusters, customers, conferences, rules, grants, limit policies,
//! external policy endpoints and scripts from one YAML document into a
//! [`PolicyStores`] set. Used at node startup and by the offline
//! `evaluate` command.
//!
//! ```yaml
//! clusters:
//!   - cluster_id: 6f0c1c7e-0d7a-4a47-9d59-1b2f3c4d5e6f
//!     secret_key: s3cret
//!     enable_gateway_rules: true
//! rules:
//!   - id: 1
//!     cluster_id: 6f0c1c7e-0d7a-4a47-9d59-1b2f3c4d5e6f
//!     name: Teams gateway
//!     match_string: '.*@teams\.example\.com'
//! ```

use crate::domain::authorization::{AuthorizationOverride, TimeBoxedAuthorization};
use crate::domain::cluster::ClusterPolicy;
use crate::domain::customer::{Conference, Customer, CustomerMatch};
use crate::domain::external_policy::ExternalPolicyEndpoint;
use crate::domain::limits::CustomerLimitPolicy;
use crate::domain::repository::RepositoryError;
use crate::domain::routing_rule::RoutingRule;
use crate::domain::script::{ScriptError, ScriptRule, ScriptRuntime};
use crate::infrastructure::repositories::PolicyStores;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid seed document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Failed to store seed data: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Seed script '{title}' does not compile: {source}")]
    Script {
        title: String,
        #[source]
        source: ScriptError,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub clusters: Vec<ClusterPolicy>,
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub customer_matches: Vec<CustomerMatch>,
    #[serde(default)]
    pub conferences: Vec<Conference>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    #[serde(default)]
    pub authorization_overrides: Vec<AuthorizationOverride>,
    #[serde(default)]
    pub grants: Vec<TimeBoxedAuthorization>,
    #[serde(default)]
    pub limit_policies: Vec<CustomerLimitPolicy>,
    #[serde(default)]
    pub external_policies: Vec<ExternalPolicyEndpoint>,
    #[serde(default)]
    pub scripts: Vec<ScriptRule>,
}

/// Counts of what a seed run stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub clusters: usize,
    pub rules: usize,
    pub conferences: usize,
    pub grants: usize,
    pub scripts: usize,
}

impl SeedData {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Compile every script without running it.
    pub fn check_scripts(&self, runtime: &dyn ScriptRuntime) -> Result<(), SeedError> {
        for script in &self.scripts {
            runtime.validate(&script.content).map_err(|source| SeedError::Script {
                title: script.title.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Write everything into `stores`. Existing entries with the same ids
    /// are replaced.
    pub async fn apply(&self, stores: &PolicyStores) -> Result<SeedReport, SeedError> {
        let known: HashSet<_> = self.clusters.iter().map(|c| c.cluster_id).collect();
        let orphaned = self
            .rules
            .iter()
            .map(|r| r.cluster_id)
            .chain(self.conferences.iter().map(|c| c.cluster_id))
            .filter(|id| !known.contains(id))
            .count();
        if orphaned > 0 {
            warn!("{} seeded rules or conferences reference clusters not in the seed", orphaned);
        }

        for cluster in &self.clusters {
            stores.clusters.save(cluster).await?;
        }
        for customer in &self.customers {
            stores.customers.save(customer).await?;
        }
        for customer_match in &self.customer_matches {
            stores.customers.save_match(customer_match).await?;
        }
        for conference in &self.conferences {
            stores.conferences.save(conference).await?;
        }
        for rule in &self.rules {
            stores.rules.save_rule(rule).await?;
        }
        for grant in &self.authorization_overrides {
            stores.authorization.save_override(grant).await?;
        }
        for grant in &self.grants {
            stores.authorization.save_grant(grant).await?;
        }
        for policy in &self.limit_policies {
            stores.limits.save_policy(policy).await?;
        }
        for endpoint in &self.external_policies {
            stores.external_policies.save(endpoint).await?;
        }
        for script in &self.scripts {
            stores.scripts.save(script).await?;
        }

        let report = SeedReport {
            clusters: self.clusters.len(),
            rules: self.rules.len(),
            conferences: self.conferences.len(),
            grants: self.grants.len() + self.authorization_overrides.len(),
            scripts: self.scripts.len(),
        };
        info!(
            "Seeded {} clusters, {} rules, {} conferences, {} grants, {} scripts",
            report.clusters, report.rules, report.conferences, report.grants, report.scripts
        );
        Ok(report)
    }
}
