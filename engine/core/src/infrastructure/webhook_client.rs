// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP clients
//!
//! - [`HttpFederationClient`] calls external policy endpoints.
//! - [`ClusterApiClient`] reads conferences and gateway rules from the
//!   cluster's management API and pushes rule changes back.
//!
//! # Cluster management API
//!
//! All paths are relative to the configured base URL:
//!
//! | Method | Path | Body |
//! |--------|------|------|
//! | GET | `/clusters/{cluster}/conferences?alias=...` | `Conference`, 404 when unknown |
//! | GET | `/clusters/{cluster}/gateway_rules` | `[RoutingRule]` |
//! | GET | `/clusters/{cluster}/objects` | `RemoteObjects` |
//! | POST | `/clusters/{cluster}/gateway_rules` | `RoutingRule` → `{"id": n}` |
//! | PUT | `/clusters/{cluster}/gateway_rules/{id}` | `RoutingRule` |
//! | DELETE | `/clusters/{cluster}/gateway_rules/{id}` | |

use crate::domain::cluster::ClusterId;
use crate::domain::customer::Conference;
use crate::domain::external_policy::{FederationClient, WebhookError};
use crate::domain::routing_rule::{RemoteObjects, RoutingRule};
use crate::domain::upstream::{ConferenceSource, GatewayRuleSource, UpstreamError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Clone, Default)]
pub struct HttpFederationClient {
    client: Client,
}

impl HttpFederationClient {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

#[async_trait]
impl FederationClient for HttpFederationClient {
    async fn get_json(&self, url: &Url, timeout: Duration) -> Result<Value, WebhookError> {
        debug!("Calling external policy {}", url);
        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WebhookError::Timeout { url: url.to_string() }
                } else {
                    WebhookError::Transport {
                        url: url.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        if response.status() != StatusCode::OK {
            return Err(WebhookError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| WebhookError::InvalidBody {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct CreatedRule {
    id: i64,
}

/// Client for the cluster management API.
#[derive(Clone)]
pub struct ClusterApiClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl ClusterApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, cluster_id: ClusterId, path: &str) -> String {
        format!("{}/clusters/{}/{}", self.base_url, cluster_id, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, UpstreamError> {
        let response = request.timeout(self.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(UpstreamError::NotFound(response.url().to_string())),
            status => Err(UpstreamError::Transport(format!(
                "{} answered with HTTP {}",
                response.url(),
                status.as_u16()
            ))),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, UpstreamError> {
        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl ConferenceSource for ClusterApiClient {
    async fn fetch_conference(&self, cluster_id: ClusterId, alias: &str) -> Result<Option<Conference>, UpstreamError> {
        let request = self
            .client
            .get(self.url(cluster_id, "conferences"))
            .query(&[("alias", alias)]);
        match self.send(request).await {
            Ok(response) => {
                let mut conference: Conference = Self::decode(response).await?;
                conference.cluster_id = cluster_id;
                Ok(Some(conference))
            }
            Err(UpstreamError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl GatewayRuleSource for ClusterApiClient {
    async fn fetch_rules(&self, cluster_id: ClusterId) -> Result<Vec<RoutingRule>, UpstreamError> {
        let response = self
            .send(self.client.get(self.url(cluster_id, "gateway_rules")))
            .await?;
        Self::decode(response).await
    }

    async fn fetch_objects(&self, cluster_id: ClusterId) -> Result<RemoteObjects, UpstreamError> {
        let response = self.send(self.client.get(self.url(cluster_id, "objects"))).await?;
        Self::decode(response).await
    }

    async fn create_rule(&self, rule: &RoutingRule) -> Result<i64, UpstreamError> {
        let response = self
            .send(self.client.post(self.url(rule.cluster_id, "gateway_rules")).json(rule))
            .await?;
        let created: CreatedRule = Self::decode(response).await?;
        Ok(created.id)
    }

    async fn update_rule(&self, external_id: i64, rule: &RoutingRule) -> Result<(), UpstreamError> {
        let path = format!("gateway_rules/{}", external_id);
        self.send(self.client.put(self.url(rule.cluster_id, &path)).json(rule))
            .await?;
        Ok(())
    }

    async fn delete_rule(&self, cluster_id: ClusterId, external_id: i64) -> Result<(), UpstreamError> {
        let path = format!("gateway_rules/{}", external_id);
        self.send(self.client.delete(self.url(cluster_id, &path))).await?;
        Ok(())
    }
}
