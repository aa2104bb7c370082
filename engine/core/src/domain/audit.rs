// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Decision audit records.
//!
//! Every decision writes one [`AuditKind::Exchange`] record with the full
//! request and response. Authorization checks, gateway-rule hits and limit
//! evaluations each add a record of their own kind.

use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use crate::domain::limits::LimitStatus;
use crate::domain::routing_rule::RuleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Exchange,
    Authorization,
    GatewayRule,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionAuditRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub cluster_id: ClusterId,
    pub kind: AuditKind,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// Name of the conference the call resolved to.
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub gateway_rule: Option<RuleId>,
    #[serde(default)]
    pub local_alias: String,
    #[serde(default)]
    pub remote_alias: String,
    #[serde(default)]
    pub needs_auth: bool,
    #[serde(default)]
    pub limit: Option<LimitStatus>,
    /// `continue`, `override` or `reject`.
    pub action: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub request: Option<Value>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub source_ip: Option<String>,
}

impl DecisionAuditRecord {
    pub fn new(cluster_id: ClusterId, kind: AuditKind, action: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            cluster_id,
            kind,
            customer_id: None,
            conference: None,
            gateway_rule: None,
            local_alias: String::new(),
            remote_alias: String::new(),
            needs_auth: false,
            limit: None,
            action: action.into(),
            message: String::new(),
            request: None,
            response: None,
            source_ip: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}
