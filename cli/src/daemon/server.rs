// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy HTTP server

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

use callgate_core::config::PolicyNodeConfig;
use callgate_core::infrastructure::event_bus::{DecisionEventBus, EventBusError};
use callgate_core::node::PolicyNode;
use callgate_core::presentation::api;

pub async fn start_server(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = PolicyNodeConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.spec.server.bind_address = host;
    }
    if let Some(port) = port {
        config.spec.server.port = port;
    }

    config.validate().context("Configuration validation failed")?;

    info!("Configuration loaded: node={}", config.metadata.name);

    if let Some(metrics_port) = config.spec.server.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exposed on port {}", metrics_port);
    }

    let node = PolicyNode::from_config(&config)
        .await
        .context("Failed to initialize policy node")?;

    let clusters = node.stores.clusters.list_all().await?;
    metrics::gauge!("callgate_clusters").set(clusters.len() as f64);

    if let Some(sync) = &node.rule_sync {
        for cluster in &clusters {
            match sync.sync_down(cluster.cluster_id).await {
                Ok(report) => info!(
                    "Synced gateway rules for cluster {}: {} created, {} updated, {} desynced",
                    cluster.cluster_id, report.created, report.updated, report.desynced
                ),
                Err(e) => warn!("Gateway rule sync failed for cluster {}: {}", cluster.cluster_id, e),
            }
        }
    }

    spawn_decision_logger(&node.events);

    let app = api::app(node.stores.clusters.clone(), node.decisions.clone());

    let addr = format!("{}:{}", config.spec.server.bind_address, config.spec.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Policy server listening on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Policy server shutting down");

    Ok(())
}

/// Mirrors every audited decision into the debug log.
fn spawn_decision_logger(events: &DecisionEventBus) {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(record) => debug!(
                    "Decision [{:?}] cluster={} action={} local={} remote={} {}",
                    record.kind,
                    record.cluster_id,
                    record.action,
                    record.local_alias,
                    record.remote_alias,
                    record.message
                ),
                Err(EventBusError::Lagged(_)) => continue,
                Err(EventBusError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
