// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy Node
//!
//! Wires stores, clients and services into one running node.
//!
//! ```text
//! PolicyNodeConfig ──► PolicyStores (in-memory | postgres grants) ──► seed
//!                  └─► DecisionService
//!                        ├─ CustomerResolver ─ ConferenceFetcher ─ ClusterApiClient
//!                        ├─ RuleService
//!                        ├─ AuthorizationService
//!                        ├─ LimitService
//!                        ├─ FederationService ─ HttpFederationClient
//!                        └─ ScriptService ─ HandlebarsScriptRuntime
//! ```

use crate::application::authorization::AuthorizationService;
use crate::application::federation::FederationService;
use crate::application::limits::LimitService;
use crate::application::scripting::ScriptService;
use crate::application::{
    ConferenceFetcher, CustomerResolver, DecisionService, DecisionSettings, RuleService, RuleSyncService,
};
use crate::domain::config::{EngineConfig, PolicyNodeConfig, StorageBackendKind};
use crate::domain::pattern::PatternEngine;
use crate::domain::repository::AuditLog;
use crate::infrastructure::db::Database;
use crate::infrastructure::{
    ClusterApiClient, DecisionEventBus, HandlebarsScriptRuntime, HttpFederationClient, InMemoryKeyedLock,
    InMemoryNegativeCache, PolicyStores, PublishingAuditLog, SeedData,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub struct PolicyNode {
    pub stores: PolicyStores,
    pub patterns: Arc<PatternEngine>,
    pub rules: Arc<RuleService>,
    pub decisions: Arc<DecisionService>,
    pub events: DecisionEventBus,
    pub scripts: Arc<HandlebarsScriptRuntime>,
    /// Present when a cluster management API is configured.
    pub rule_sync: Option<Arc<RuleSyncService>>,
}

impl PolicyNode {
    /// Build the services on top of existing stores.
    pub fn build(stores: PolicyStores, config: &EngineConfig) -> Self {
        let patterns = Arc::new(PatternEngine::new(config.strict_mode));
        let events = DecisionEventBus::with_default_capacity();
        let audit: Arc<dyn AuditLog> = Arc::new(PublishingAuditLog::new(stores.audit.clone(), events.clone()));
        let rules = Arc::new(RuleService::new(stores.rules.clone(), patterns.clone()));

        let mut resolver = CustomerResolver::new(
            stores.customers.clone(),
            stores.conferences.clone(),
            rules.clone(),
            patterns.clone(),
        );
        let mut rule_sync = None;
        if let Some(url) = &config.cluster_api_url {
            let api = Arc::new(ClusterApiClient::new(url.clone(), config.upstream_timeout()));
            if config.fetch_missing_conference {
                let fetcher = ConferenceFetcher::new(
                    api.clone(),
                    stores.conferences.clone(),
                    Arc::new(InMemoryKeyedLock::new()),
                    Arc::new(InMemoryNegativeCache::new()),
                )
                .with_timeouts(
                    config.upstream_timeout(),
                    config.fetch_lock_wait(),
                    config.negative_cache_ttl(),
                )
                .with_strict(config.strict_mode);
                resolver = resolver.with_fetcher(Arc::new(fetcher));
            }
            rule_sync = Some(Arc::new(RuleSyncService::new(stores.rules.clone(), api)));
        }

        let federation = FederationService::new(
            stores.external_policies.clone(),
            Arc::new(HttpFederationClient::new()),
            patterns.clone(),
        )
        .with_timeout(config.federation_timeout());

        let runtime = Arc::new(HandlebarsScriptRuntime::new(config.script_cache_ttl()));
        let scripts = ScriptService::new(stores.scripts.clone(), runtime.clone()).with_strict(config.strict_mode);

        let decisions = DecisionService::new(
            Arc::new(resolver),
            rules.clone(),
            Arc::new(AuthorizationService::new(stores.authorization.clone(), patterns.clone())),
            Arc::new(LimitService::new(stores.limits.clone())),
            audit,
            patterns.clone(),
        )
        .with_federation(Arc::new(federation))
        .with_scripts(Arc::new(scripts))
        .with_settings(DecisionSettings::from(config));

        Self {
            stores,
            patterns,
            rules,
            decisions: Arc::new(decisions),
            events,
            scripts: runtime,
            rule_sync,
        }
    }

    /// Open the configured storage, apply the seed file and build the node.
    pub async fn from_config(config: &PolicyNodeConfig) -> Result<Self> {
        let storage = &config.spec.storage;
        let mut stores = PolicyStores::in_memory();
        if storage.backend == StorageBackendKind::Postgres {
            let url = storage
                .database_url
                .as_deref()
                .context("spec.storage.database_url is required for the postgres backend")?;
            let database = Database::new(url).await?;
            stores = stores.with_authorization(Arc::new(database.authorization_store().await?));
        }

        let node = Self::build(stores, &config.spec.engine);

        if let Some(path) = &storage.seed_file {
            let seed = SeedData::from_yaml_file(path)
                .with_context(|| format!("Failed to load seed file {:?}", path))?;
            seed.check_scripts(node.scripts.as_ref())?;
            seed.apply(&node.stores).await?;
        }

        info!("Policy node '{}' ready", config.metadata.name);
        Ok(node)
    }
}
