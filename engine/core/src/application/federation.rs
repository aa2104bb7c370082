// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External policy federation
//!
//! Endpoints are consulted one after another in `(priority, id)` order. The
//! first decisive answer wins: a `reject` ends the decision, a `continue` with
//! a `result` becomes the base configuration. Anything else, including every
//! transport failure, counts as no opinion.

use crate::application::error::DecisionError;
use crate::domain::call::CallParams;
use crate::domain::cluster::ClusterId;
use crate::domain::external_policy::{ExternalPolicyEndpoint, FederationClient};
use crate::domain::repository::ExternalPolicyStore;
use crate::domain::pattern::PatternEngine;
use crate::domain::response::{PolicyResponse, STATUS_REJECT, STATUS_SUCCESS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum FederationOutcome {
    /// No endpoint decided. `fallback` holds the last well-formed
    /// `continue` answer without a result, if any.
    NoOpinion { fallback: Option<PolicyResponse> },
    Reject(PolicyResponse),
    /// `continue` with a result, already merged with the endpoint's
    /// `settings_override`.
    Result(PolicyResponse),
}

impl FederationOutcome {
    /// Response to fall back on when the local result turns out unusable.
    pub fn fallback(&self) -> Option<&PolicyResponse> {
        match self {
            FederationOutcome::NoOpinion { fallback } => fallback.as_ref(),
            FederationOutcome::Reject(response) | FederationOutcome::Result(response) => Some(response),
        }
    }
}

pub struct FederationService {
    store: Arc<dyn ExternalPolicyStore>,
    client: Arc<dyn FederationClient>,
    patterns: Arc<PatternEngine>,
    timeout: Duration,
}

impl FederationService {
    pub fn new(
        store: Arc<dyn ExternalPolicyStore>,
        client: Arc<dyn FederationClient>,
        patterns: Arc<PatternEngine>,
    ) -> Self {
        Self {
            store,
            client,
            patterns,
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn consult(
        &self,
        cluster_id: ClusterId,
        params: &CallParams,
        source_ip: Option<&str>,
    ) -> Result<FederationOutcome, DecisionError> {
        let mut endpoints = self.store.list_for(cluster_id).await?;
        if endpoints.is_empty() {
            return Ok(FederationOutcome::NoOpinion { fallback: None });
        }
        endpoints.sort_by_key(|e| e.sort_key());

        let target_alias = params.target_alias();
        let mut fallback = None;

        for endpoint in &endpoints {
            if !endpoint.applies_to(&target_alias, &self.patterns)? {
                continue;
            }

            let Some(response) = self.ask(endpoint, params, source_ip).await else {
                continue;
            };

            if response.is_reject() {
                record("reject");
                info!("External policy {} rejected call to {}", endpoint.id, target_alias);
                return Ok(FederationOutcome::Reject(response));
            }

            if response.has_result() {
                record("result");
                let mut response = response;
                if let Some(result) = response.result.as_mut() {
                    for (key, value) in &endpoint.settings_override {
                        result.insert(key.clone(), value.clone());
                    }
                }
                info!("External policy {} returned a result for {}", endpoint.id, target_alias);
                return Ok(FederationOutcome::Result(response));
            }

            record("no_opinion");
            debug!("External policy {} has no opinion on {}", endpoint.id, target_alias);
            fallback = Some(response);
        }

        Ok(FederationOutcome::NoOpinion { fallback })
    }

    /// One request. `None` for every kind of failure.
    async fn ask(
        &self,
        endpoint: &ExternalPolicyEndpoint,
        params: &CallParams,
        source_ip: Option<&str>,
    ) -> Option<PolicyResponse> {
        let mut query: Vec<(String, String)> = params
            .iter()
            .filter_map(|(key, value)| match value {
                Value::Null => None,
                Value::String(s) => Some((key.clone(), s.clone())),
                other => Some((key.clone(), other.to_string())),
            })
            .collect();
        query.push(("_original_ip".to_string(), source_ip.unwrap_or_default().to_string()));
        query.push(("_external_id".to_string(), endpoint.id.to_string()));

        let url = match endpoint.build_request_url(&query) {
            Ok(url) => url,
            Err(e) => {
                record("error");
                warn!("External policy {} has an invalid URL: {}", endpoint.id, e);
                return None;
            }
        };

        let body = match self.client.get_json(&url, self.timeout).await {
            Ok(body) => body,
            Err(e) => {
                record("error");
                warn!("External policy {} ignored: {}", endpoint.id, e);
                return None;
            }
        };

        let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        if status != STATUS_SUCCESS && status != STATUS_REJECT {
            record("invalid");
            debug!("External policy {} returned status {:?}", endpoint.id, status);
            return None;
        }

        match serde_json::from_value::<PolicyResponse>(body) {
            Ok(response) => Some(response),
            Err(e) => {
                record("invalid");
                warn!("External policy {} returned a malformed body: {}", endpoint.id, e);
                None
            }
        }
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("callgate_federation_requests_total", "outcome" => outcome).increment(1);
}
