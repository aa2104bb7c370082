// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cluster-level policy settings.
//!
//! A [`ClusterPolicy`] is the entry point for every decision: the calling
//! cluster addresses the policy server with its secret key, which resolves to
//! the cluster id, its default limit actions and the gateway-rule switch.

use crate::domain::limits::LimitAction;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ClusterId(pub Uuid);

impl ClusterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterPolicy {
    pub cluster_id: ClusterId,
    /// Shared secret embedded in the policy URL the cluster calls.
    pub secret_key: String,
    #[serde(default)]
    pub soft_limit_action: LimitAction,
    #[serde(default)]
    pub hard_limit_action: LimitAction,
    /// When off, matching gateway rules are only counted, never applied.
    #[serde(default)]
    pub enable_gateway_rules: bool,
}

impl ClusterPolicy {
    pub fn new(cluster_id: ClusterId, secret_key: impl Into<String>) -> Self {
        Self {
            cluster_id,
            secret_key: secret_key.into(),
            soft_limit_action: LimitAction::Ignore,
            hard_limit_action: LimitAction::Ignore,
            enable_gateway_rules: false,
        }
    }

    /// Generate a fresh random secret key.
    pub fn generate_secret_key() -> String {
        Uuid::new_v4().simple().to_string()
    }
}
