// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! External policy webhooks.
//!
//! An [`ExternalPolicyEndpoint`] forwards selected calls to a third-party
//! policy server. The request carries the original call parameters plus
//! `_original_ip` and `_external_id`; the response body has the same shape as
//! our own decision response.

use crate::domain::cluster::ClusterId;
use crate::domain::pattern::{PatternEngine, PatternError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalPolicyId(pub i64);

impl fmt::Display for ExternalPolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_priority() -> i32 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalPolicyEndpoint {
    pub id: ExternalPolicyId,
    pub cluster_id: ClusterId,
    /// Anchored at the start; empty matches every call.
    #[serde(default)]
    pub target_alias_match: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub remote_url: String,
    /// Merged into a `continue` response that carries a `result`.
    #[serde(default)]
    pub settings_override: Map<String, Value>,
}

impl ExternalPolicyEndpoint {
    pub fn sort_key(&self) -> (i32, ExternalPolicyId) {
        (self.priority, self.id)
    }

    pub fn applies_to(&self, target_alias: &str, patterns: &PatternEngine) -> Result<bool, PatternError> {
        patterns.is_match(&self.target_alias_match, target_alias)
    }

    /// `remote_url` with `params` merged over its existing query.
    ///
    /// Keys already present keep their position and take the new value; new
    /// keys are appended in the order given.
    pub fn build_request_url<K, V>(&self, params: &[(K, V)]) -> Result<Url, url::ParseError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = Url::parse(&self.remote_url)?;

        let mut merged: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in url.query_pairs() {
            match merged.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value.into_owned()),
                None => merged.push((key.into_owned(), vec![value.into_owned()])),
            }
        }
        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref().to_string());
            match merged.iter_mut().find(|(k, _)| k == key) {
                Some((_, values)) => *values = vec![value],
                None => merged.push((key.to_string(), vec![value])),
            }
        }

        if merged.is_empty() {
            url.set_query(None);
        } else {
            let mut query = url.query_pairs_mut();
            query.clear();
            for (key, values) in &merged {
                for value in values {
                    query.append_pair(key, value);
                }
            }
        }
        Ok(url)
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("{url} returned an invalid body: {message}")]
    InvalidBody { url: String, message: String },
}

/// Transport for webhook calls.
#[async_trait]
pub trait FederationClient: Send + Sync {
    /// GET `url` and decode a JSON body. Anything but HTTP 200 is an error.
    async fn get_json(&self, url: &Url, timeout: Duration) -> Result<Value, WebhookError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str) -> ExternalPolicyEndpoint {
        ExternalPolicyEndpoint {
            id: ExternalPolicyId(1),
            cluster_id: ClusterId::default(),
            target_alias_match: String::new(),
            priority: 5,
            remote_url: url.to_string(),
            settings_override: Map::new(),
        }
    }

    #[test]
    fn test_build_request_url() {
        let ep = endpoint("http://localhost/policy/");
        let url = ep.build_request_url(&[("test", "1")]).unwrap();
        assert_eq!(url.as_str(), "http://localhost/policy/?test=1");
    }

    #[test]
    fn test_build_request_url_merges_existing_query() {
        let ep = endpoint("http://localhost/policy/?test=2&test2=3");
        let url = ep.build_request_url(&[("test", "1")]).unwrap();
        assert_eq!(url.as_str(), "http://localhost/policy/?test=1&test2=3");
    }

    #[test]
    fn test_build_request_url_without_params() {
        let ep = endpoint("http://localhost/policy/");
        let url = ep.build_request_url::<&str, &str>(&[]).unwrap();
        assert_eq!(url.as_str(), "http://localhost/policy/");
    }

    #[test]
    fn test_build_request_url_rejects_garbage() {
        assert!(endpoint("not a url").build_request_url(&[("a", "b")]).is_err());
    }

    #[test]
    fn test_target_alias_match() {
        let patterns = PatternEngine::new(true);
        let mut ep = endpoint("http://localhost/");
        assert!(ep.applies_to("anything", &patterns).unwrap());
        ep.target_alias_match = "654".to_string();
        assert!(ep.applies_to("65432", &patterns).unwrap());
        assert!(!ep.applies_to("12345", &patterns).unwrap());
    }
}
