// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runs the cluster's policy scripts over a finished decision.
//!
//! Scripts run in priority order and each sees the response left by the one
//! before it. A failing script is skipped; in strict mode its error is
//! returned instead.

use crate::application::error::DecisionError;
use crate::domain::call::CallParams;
use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use crate::domain::repository::ScriptStore;
use crate::domain::response::PolicyResponse;
use crate::domain::script::{OnResponse, ScriptError, ScriptOutcome, ScriptRule, ScriptRuntime};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a script may look at.
#[derive(Debug, Clone, Copy)]
pub struct ScriptInput<'a> {
    pub cluster_id: ClusterId,
    pub customer: Option<CustomerId>,
    pub has_conference: bool,
    pub params: &'a CallParams,
}

pub struct ScriptService {
    store: Arc<dyn ScriptStore>,
    runtime: Arc<dyn ScriptRuntime>,
    strict: bool,
}

impl ScriptService {
    pub fn new(store: Arc<dyn ScriptStore>, runtime: Arc<dyn ScriptRuntime>) -> Self {
        Self {
            store,
            runtime,
            strict: false,
        }
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub async fn run(&self, input: ScriptInput<'_>, response: PolicyResponse) -> Result<PolicyResponse, DecisionError> {
        let mut scripts: Vec<ScriptRule> = self
            .store
            .list_for(input.cluster_id)
            .await?
            .into_iter()
            .filter(|s| s.applies_to(input.customer, input.has_conference))
            .collect();
        if scripts.is_empty() {
            return Ok(response);
        }
        scripts.sort_by_key(|s| s.priority);

        let mut current = response;
        for script in &scripts {
            let context = json!({
                "request": input.params.to_json(),
                "response": current.to_json(),
                "cluster": input.cluster_id.to_string(),
                "customer": input.customer.map(|c| c.to_string()),
            });

            let outcome = match self.runtime.execute(script, &context) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.script_failed(e)?;
                    continue;
                }
            };

            let body = match outcome {
                ScriptOutcome::Continue => continue,
                ScriptOutcome::Exit => {
                    debug!("Script '{}' exited without a response", script.title);
                    continue;
                }
                ScriptOutcome::Response(body) | ScriptOutcome::Reject(body) => body,
            };

            match decode(script, body) {
                Ok(next) => {
                    info!("Script '{}' responded with {}", script.title, next.action_label());
                    current = next.clean();
                }
                Err(e) => {
                    self.script_failed(e)?;
                    continue;
                }
            }

            if script.on_response == OnResponse::Break {
                break;
            }
        }
        Ok(current)
    }

    fn script_failed(&self, error: ScriptError) -> Result<(), DecisionError> {
        metrics::counter!("callgate_script_errors_total").increment(1);
        if self.strict {
            return Err(error.into());
        }
        warn!("Ignoring script error: {}", error);
        Ok(())
    }
}

fn decode(script: &ScriptRule, body: Value) -> Result<PolicyResponse, ScriptError> {
    serde_json::from_value(body).map_err(|e| ScriptError::Render {
        script: script.title.clone(),
        message: format!("invalid response: {}", e),
    })
}
