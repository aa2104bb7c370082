// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::DecisionService;
use crate::domain::call::CallParams;
use crate::domain::repository::ClusterPolicyStore;
use crate::domain::response::PolicyResponse;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub struct AppState {
    pub clusters: Arc<dyn ClusterPolicyStore>,
    pub decisions: Arc<DecisionService>,
}

pub fn app(clusters: Arc<dyn ClusterPolicyStore>, decisions: Arc<DecisionService>) -> Router {
    let state = Arc::new(AppState { clusters, decisions });

    Router::new()
        .route("/health", get(health))
        .route(
            "/policy/{secret_key}/policy/v1/service/configuration",
            get(service_configuration),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// First hop of `X-Forwarded-For`, else the peer address.
fn source_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

async fn service_configuration(
    State(state): State<Arc<AppState>>,
    Path(secret_key): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Response {
    let cluster = match state.clusters.find_by_secret(&secret_key).await {
        Ok(Some(cluster)) => cluster,
        Ok(None) => {
            warn!("Policy request with unknown key");
            return (StatusCode::NOT_FOUND, Json(json!({"error": "Unknown policy key"}))).into_response();
        }
        Err(e) => {
            error!("Cluster lookup failed: {}", e);
            return Json(PolicyResponse::continue_default().to_json()).into_response();
        }
    };

    let params = CallParams::from_query(pairs);
    let source_ip = source_ip(&headers, &extensions);

    let response = match state.decisions.decide(&cluster, &params, source_ip.as_deref()).await {
        Ok(response) => response,
        Err(e) => {
            error!("Policy decision failed for cluster {}: {}", cluster.cluster_id, e);
            PolicyResponse::continue_default()
        }
    };
    Json(response.to_json()).into_response()
}
