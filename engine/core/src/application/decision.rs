// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Decision Orchestrator
//!
//! Answers one policy request from the cluster:
//!
//! 1. resolve the customer, conference and gateway rule
//! 2. consult external policy endpoints
//! 3. check authorization for dial-ins that require it
//! 4. apply a matching gateway rule when no conference exists
//! 5. apply the customer's concurrency limits
//! 6. let the cluster's scripts rewrite the result
//!
//! The caller only ever sees a `reject` or a `continue`. Unless strict mode
//! is on, an internal error yields the permissive default `continue`.

use crate::application::authorization::AuthorizationService;
use crate::application::error::DecisionError;
use crate::application::federation::{FederationOutcome, FederationService};
use crate::application::limits::LimitService;
use crate::application::resolver::{CustomerResolver, Resolution};
use crate::application::rule_service::RuleService;
use crate::application::scripting::{ScriptInput, ScriptService};
use crate::domain::audit::{AuditKind, DecisionAuditRecord};
use crate::domain::call::{CallDirection, CallParams};
use crate::domain::cluster::ClusterPolicy;
use crate::domain::config::EngineConfig;
use crate::domain::limits::LimitEffect;
use crate::domain::pattern::PatternEngine;
use crate::domain::repository::AuditLog;
use crate::domain::response::{PolicyResponse, ResponseBuilder};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const REASON_AUTHORIZATION: &str = "Authorization required";
pub const REASON_LIMIT: &str = "Limit reached";

const UNKNOWN_CONFERENCE: &str = "Unknown VMR";

#[derive(Debug, Clone, Default)]
pub struct DecisionSettings {
    /// Surface internal errors instead of answering with the default.
    pub strict: bool,
}

impl From<&EngineConfig> for DecisionSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            strict: config.strict_mode,
        }
    }
}

pub struct DecisionService {
    resolver: Arc<CustomerResolver>,
    rules: Arc<RuleService>,
    authorization: Arc<AuthorizationService>,
    limits: Arc<LimitService>,
    federation: Option<Arc<FederationService>>,
    scripts: Option<Arc<ScriptService>>,
    audit: Arc<dyn AuditLog>,
    patterns: Arc<PatternEngine>,
    settings: DecisionSettings,
}

impl DecisionService {
    pub fn new(
        resolver: Arc<CustomerResolver>,
        rules: Arc<RuleService>,
        authorization: Arc<AuthorizationService>,
        limits: Arc<LimitService>,
        audit: Arc<dyn AuditLog>,
        patterns: Arc<PatternEngine>,
    ) -> Self {
        Self {
            resolver,
            rules,
            authorization,
            limits,
            federation: None,
            scripts: None,
            audit,
            patterns,
            settings: DecisionSettings::default(),
        }
    }

    pub fn with_federation(mut self, federation: Arc<FederationService>) -> Self {
        self.federation = Some(federation);
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<ScriptService>) -> Self {
        self.scripts = Some(scripts);
        self
    }

    pub fn with_settings(mut self, settings: DecisionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &DecisionSettings {
        &self.settings
    }

    /// Answer one policy request. `source_ip` is the address of the cluster
    /// node that asked.
    pub async fn decide(
        &self,
        cluster: &ClusterPolicy,
        params: &CallParams,
        source_ip: Option<&str>,
    ) -> Result<PolicyResponse, DecisionError> {
        let (response, resolution) = match self.evaluate(cluster, params, source_ip).await {
            Ok(decided) => decided,
            Err(e) if self.settings.strict => {
                error!("Decision failed for cluster {}: {}", cluster.cluster_id, e);
                return Err(e);
            }
            Err(e) => {
                warn!("Decision failed for cluster {}, answering default: {}", cluster.cluster_id, e);
                (PolicyResponse::continue_default(), Resolution::default())
            }
        };

        let response = match &self.scripts {
            Some(scripts) => {
                let input = ScriptInput {
                    cluster_id: cluster.cluster_id,
                    customer: resolution.customer,
                    has_conference: resolution.conference.is_some(),
                    params,
                };
                match scripts.run(input, response.clone()).await {
                    Ok(scripted) => scripted,
                    Err(e) if self.settings.strict => return Err(e),
                    Err(e) => {
                        warn!("Scripts skipped for cluster {}: {}", cluster.cluster_id, e);
                        response
                    }
                }
            }
            None => response,
        };

        let mut record = self.record(cluster, AuditKind::Exchange, response.action_label(), params, &resolution);
        record.request = Some(params.to_json());
        record.response = Some(response.to_json());
        record.source_ip = source_ip.map(str::to_string);
        self.append(record).await?;

        metrics::counter!("callgate_decisions_total", "action" => response.action_label()).increment(1);
        info!(
            "Policy decision for {} -> {}: {}",
            params.remote_alias(),
            params.local_alias(),
            response.action_label()
        );
        Ok(response)
    }

    async fn evaluate(
        &self,
        cluster: &ClusterPolicy,
        params: &CallParams,
        source_ip: Option<&str>,
    ) -> Result<(PolicyResponse, Resolution), DecisionError> {
        let direction = params.direction();
        if params.local_alias().is_empty() || direction == CallDirection::NonDial {
            return Ok((PolicyResponse::continue_default(), Resolution::default()));
        }

        let resolution = self.resolver.resolve(cluster.cluster_id, params).await?;

        let federation = match &self.federation {
            Some(federation) => federation.consult(cluster.cluster_id, params, source_ip).await?,
            None => FederationOutcome::NoOpinion { fallback: None },
        };
        if let FederationOutcome::Reject(response) = federation {
            return Ok((response, resolution));
        }

        let mut base = resolution
            .conference
            .as_ref()
            .map(|c| c.full_data.clone())
            .unwrap_or_default();
        if let FederationOutcome::Result(response) = &federation {
            if let Some(result) = &response.result {
                base.extend(result.clone());
            }
        }

        let mut builder = ResponseBuilder::new(params.clone(), base);
        if let Some(fallback) = federation.fallback() {
            builder = builder.with_fallback(fallback.clone());
        }

        if resolution.needs_auth && direction == CallDirection::DialIn {
            self.check_authorization(cluster, params, &resolution, &mut builder).await?;
        }

        if resolution.conference.is_none() {
            if let Some(rule) = &resolution.gateway_rule {
                let hits = self.rules.record_hit(rule).await?;
                let message = if cluster.enable_gateway_rules {
                    builder.override_with(self.rules.build_response(rule, params).await?);
                    "Overriding response"
                } else {
                    "Override disabled, record hit count"
                };
                let mut record = self.record(cluster, AuditKind::GatewayRule, "log", params, &resolution);
                record.message = format!(
                    "Policy rule {} matched remote {}, local {}. {} ({} hits today)",
                    rule.name,
                    params.remote_alias(),
                    params.local_alias(),
                    message,
                    hits
                );
                self.append(record).await?;
            }
        }

        if let Some(customer) = resolution.customer {
            let evaluation = self.limits.evaluate(customer, cluster, Utc::now().date_naive()).await?;

            let action = match &evaluation.effect {
                LimitEffect::None | LimitEffect::Log => "log",
                LimitEffect::Override(_) => "override",
                LimitEffect::Reject => "reject",
            };
            let mut record = self.record(cluster, AuditKind::Limit, action, params, &resolution);
            record.limit = Some(evaluation.status);
            record.message = format!(
                "{} Call from {} to {} ({})",
                evaluation.summary(customer),
                params.remote_alias(),
                params.local_alias(),
                conference_name(&resolution)
            );
            self.append(record).await?;

            match evaluation.effect {
                LimitEffect::None | LimitEffect::Log => {}
                LimitEffect::Override(values) => {
                    builder.override_with(values);
                }
                LimitEffect::Reject => {
                    builder.reject(REASON_LIMIT);
                }
            }
        }

        Ok((builder.build(&self.patterns)?, resolution))
    }

    async fn check_authorization(
        &self,
        cluster: &ClusterPolicy,
        params: &CallParams,
        resolution: &Resolution,
        builder: &mut ResponseBuilder,
    ) -> Result<(), DecisionError> {
        let outcome = self
            .authorization
            .check(resolution.customer, cluster.cluster_id, params, Utc::now())
            .await?;

        let granted = outcome.is_granted();
        if let Some(settings) = outcome.settings_override() {
            builder.override_with(settings.clone());
        }
        if !granted {
            builder.reject(REASON_AUTHORIZATION);
        }

        let mut record = self.record(
            cluster,
            AuditKind::Authorization,
            if granted { "log" } else { "reject" },
            params,
            resolution,
        );
        record.message = format!(
            "Authorization for {} ({}) needed. Result: {}. Remote: {}, customer {}",
            conference_name(resolution),
            params.local_alias(),
            if granted { "SUCCESS" } else { "REJECT" },
            params.remote_alias(),
            resolution
                .customer
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        self.append(record).await
    }

    fn record(
        &self,
        cluster: &ClusterPolicy,
        kind: AuditKind,
        action: &str,
        params: &CallParams,
        resolution: &Resolution,
    ) -> DecisionAuditRecord {
        let mut record = DecisionAuditRecord::new(cluster.cluster_id, kind, action);
        record.customer_id = resolution.customer;
        record.conference = resolution.conference.as_ref().map(|c| c.name.clone());
        record.gateway_rule = resolution.gateway_rule.as_ref().map(|r| r.id);
        record.local_alias = params.local_alias();
        record.remote_alias = params.remote_alias();
        record.needs_auth = resolution.needs_auth;
        record
    }

    /// Audit failures never change the decision outside strict mode.
    async fn append(&self, record: DecisionAuditRecord) -> Result<(), DecisionError> {
        match self.audit.append(record).await {
            Ok(()) => Ok(()),
            Err(e) if self.settings.strict => Err(e.into()),
            Err(e) => {
                warn!("Failed to write audit record: {}", e);
                Ok(())
            }
        }
    }
}

fn conference_name(resolution: &Resolution) -> &str {
    resolution
        .conference
        .as_ref()
        .map(|c| c.name.as_str())
        .unwrap_or(UNKNOWN_CONFERENCE)
}
