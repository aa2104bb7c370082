// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use callgate_core::call::CallParams;
use callgate_core::config::{PolicyNodeConfig, StorageBackendKind, CONFIG_PATH_ENV};
use callgate_core::node::PolicyNode;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const CLUSTER: &str = "2d9f0a4c-5b1e-4c6d-8e7f-90a1b2c3d4e5";

fn write_node(dir: &TempDir) -> std::path::PathBuf {
    let seed_path = dir.path().join("seed.yaml");
    fs::write(
        &seed_path,
        format!(
            r#"
clusters:
  - cluster_id: {CLUSTER}
    secret_key: edge-key
    enable_gateway_rules: true
rules:
  - id: 1
    cluster_id: {CLUSTER}
    name: Audio
    match_incoming_calls: true
    match_incoming_sip: true
    match_string: '\d+@audio\.example'
    call_type: audio
"#
        ),
    )
    .unwrap();

    let config_path = dir.path().join("callgate-config.yaml");
    fs::write(
        &config_path,
        format!(
            r#"
apiVersion: callgate/v1
kind: PolicyNodeConfig
metadata:
  name: edge-test
spec:
  server:
    port: 18600
  storage:
    backend: in_memory
    seed_file: {}
"#,
            seed_path.display()
        ),
    )
    .unwrap();
    config_path
}

#[tokio::test]
async fn node_from_config_file_with_seed() {
    let dir = TempDir::new().unwrap();
    let config_path = write_node(&dir);

    let config = PolicyNodeConfig::load_or_default(Some(config_path)).unwrap();
    config.validate().unwrap();
    assert_eq!(config.metadata.name, "edge-test");
    assert_eq!(config.spec.server.port, 18600);
    assert_eq!(config.spec.storage.backend, StorageBackendKind::InMemory);

    let node = PolicyNode::from_config(&config).await.unwrap();
    let cluster = node.stores.clusters.find_by_secret("edge-key").await.unwrap().unwrap();

    let params = CallParams::new()
        .with("protocol", "sip")
        .with("call_direction", "dial_in")
        .with("local_alias", "777@audio.example")
        .with("remote_alias", "carol@example.com");
    let body = node.decisions.decide(&cluster, &params, None).await.unwrap().to_json();
    assert_eq!(body["result"]["call_type"], json!("audio"));
}

#[tokio::test]
async fn missing_seed_file_fails_startup() {
    let mut config = PolicyNodeConfig::default();
    config.spec.storage.seed_file = Some("/nonexistent/seed.yaml".into());
    assert!(PolicyNode::from_config(&config).await.is_err());
}

#[test]
fn discovers_config_from_environment() {
    let dir = TempDir::new().unwrap();
    let config_path = write_node(&dir);

    std::env::set_var(CONFIG_PATH_ENV, &config_path);
    let discovered = PolicyNodeConfig::discover_config();
    std::env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(discovered, Some(config_path));
}

#[test]
fn invalid_manifest_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.yaml");
    fs::write(
        &path,
        "apiVersion: callgate/v2\nkind: PolicyNodeConfig\nmetadata:\n  name: x\n",
    )
    .unwrap();

    let config = PolicyNodeConfig::load_or_default(Some(path)).unwrap();
    assert!(config.validate().is_err());
}
