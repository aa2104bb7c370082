// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Customers, customer matchers and conferences
//!
//! A call is attributed to a [`Customer`] either through the [`Conference`]
//! its alias belongs to, or through the first [`CustomerMatch`] whose prefix,
//! suffix or regex accepts the normalized alias.

use crate::domain::alias::normalize_alias;
use crate::domain::cluster::ClusterId;
use crate::domain::pattern::{PatternEngine, PatternError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub Uuid);

impl CustomerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerMatchMode {
    /// Both the configured prefix and suffix must match.
    #[default]
    Both,
    /// Either the prefix or the suffix may match.
    Either,
    /// Only `regexp_match` is used.
    Regexp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerMatchId(pub i64);

fn default_match_priority() -> i32 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerMatch {
    pub id: CustomerMatchId,
    pub cluster_id: ClusterId,
    pub customer_id: CustomerId,
    #[serde(default)]
    pub prefix_match: String,
    #[serde(default)]
    pub suffix_match: String,
    #[serde(default)]
    pub match_mode: CustomerMatchMode,
    /// Takes precedence over prefix/suffix when set. Anchored at the start.
    #[serde(default)]
    pub regexp_match: String,
    #[serde(default)]
    pub require_authorization: bool,
    #[serde(default = "default_match_priority")]
    pub priority: i32,
}

impl CustomerMatch {
    pub fn sort_key(&self) -> (i32, CustomerMatchId) {
        (self.priority, self.id)
    }

    /// Test one lowercased, normalized alias.
    pub fn matches(&self, needle: &str, patterns: &PatternEngine) -> Result<bool, PatternError> {
        if !self.regexp_match.is_empty() {
            return patterns.is_match(&self.regexp_match, needle);
        }
        if self.match_mode == CustomerMatchMode::Regexp {
            return Ok(false);
        }

        let needle = needle.to_lowercase();
        let mut checks = Vec::with_capacity(2);
        if !self.prefix_match.is_empty() {
            checks.push(needle.starts_with(&self.prefix_match.to_lowercase()));
        }
        if !self.suffix_match.is_empty() {
            checks.push(needle.ends_with(&self.suffix_match.to_lowercase()));
        }
        if checks.is_empty() {
            return Ok(false);
        }

        Ok(match self.match_mode {
            CustomerMatchMode::Either => checks.iter().any(|c| *c),
            _ => checks.iter().all(|c| *c),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConferenceId(pub Uuid);

impl ConferenceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConferenceId {
    fn default() -> Self {
        Self::new()
    }
}

fn default_active() -> bool {
    true
}

/// A conference (virtual meeting room) previously synchronized from the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conference {
    #[serde(default)]
    pub id: ConferenceId,
    pub cluster_id: ClusterId,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    /// The customer match this conference was attributed through, if any.
    #[serde(default)]
    pub match_id: Option<CustomerMatchId>,
    /// Configuration object handed back to the cluster as the decision `result`.
    #[serde(default)]
    pub full_data: Map<String, Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Conference {
    /// Whether `alias` (raw) addresses this conference, by name or by alias.
    pub fn answers_to(&self, alias: &str) -> bool {
        if alias.is_empty() {
            return false;
        }
        if self.name == alias {
            return true;
        }
        let needle = normalize_alias(alias).to_lowercase();
        self.aliases
            .iter()
            .any(|a| normalize_alias(a).to_lowercase() == needle)
    }
}
