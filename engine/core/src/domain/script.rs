// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Policy scripts
//!
//! Customer-authored templates run after the decision is computed and may
//! replace it. A script communicates only through control helpers:
//!
//! - `send_response` yields a (possibly modified) response
//! - `deny` yields a reject response
//! - `exit` stops this script without a response
//!
//! Rendering anything else is an authoring error. The runtime behind
//! [`ScriptRuntime`] has no host access beyond the request and response it is
//! given.

use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptId(pub Uuid);

impl ScriptId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScriptId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnResponse {
    /// Later scripts still run after this one responds.
    #[default]
    Continue,
    /// A response from this script ends script evaluation.
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptScope {
    /// Runs for every call on the cluster.
    #[default]
    Cluster,
    /// Runs only for calls that resolved to a conference.
    Meeting,
}

fn default_priority() -> i32 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptRule {
    #[serde(default)]
    pub id: ScriptId,
    pub cluster_id: ClusterId,
    pub title: String,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub scope: ScriptScope,
    #[serde(default)]
    pub on_response: OnResponse,
    #[serde(default)]
    pub limit_customers: bool,
    #[serde(default)]
    pub customers: Vec<CustomerId>,
}

impl ScriptRule {
    pub fn new(cluster_id: ClusterId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: ScriptId::new(),
            cluster_id,
            title: title.into(),
            content: content.into(),
            priority: default_priority(),
            enabled: true,
            scope: ScriptScope::Cluster,
            on_response: OnResponse::Continue,
            limit_customers: false,
            customers: Vec::new(),
        }
    }

    /// Whether this script takes part in a call with the given resolution.
    pub fn applies_to(&self, customer: Option<CustomerId>, has_conference: bool) -> bool {
        if !self.enabled {
            return false;
        }
        if self.scope == ScriptScope::Meeting && !has_conference {
            return false;
        }
        if self.limit_customers {
            return customer.map(|c| self.customers.contains(&c)).unwrap_or(false);
        }
        true
    }
}

/// What one script execution yielded.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptOutcome {
    /// Rendered nothing and called no control helper.
    Continue,
    /// `send_response`: the new response body.
    Response(Value),
    /// `deny`: a reject response body.
    Reject(Value),
    /// `exit`: no response from this script.
    Exit,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script '{script}' does not compile: {message}")]
    Compile { script: String, message: String },
    #[error("script '{script}' failed: {message}")]
    Render { script: String, message: String },
    #[error("script '{script}' rendered output without a response call: {output}")]
    Authoring { script: String, output: String },
}

/// Sandboxed executor for [`ScriptRule`] templates.
pub trait ScriptRuntime: Send + Sync {
    /// Check that `content` compiles.
    fn validate(&self, content: &str) -> Result<(), ScriptError>;

    /// Run one script with `context` (`request`, `response`, ...).
    fn execute(&self, script: &ScriptRule, context: &Value) -> Result<ScriptOutcome, ScriptError>;
}
