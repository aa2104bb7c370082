// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the callgate CLI

pub mod config;
pub mod evaluate;
pub mod rules;

pub use self::config::ConfigCommand;
pub use self::evaluate::EvaluateArgs;
pub use self::rules::RulesCommand;

use anyhow::{Context, Result};
use callgate_core::call::CallParams;
use callgate_core::cluster::ClusterPolicy;
use callgate_core::config::PolicyNodeConfig;
use callgate_core::infrastructure::{PolicyStores, SeedData};
use callgate_core::node::PolicyNode;
use std::path::{Path, PathBuf};

/// Parse a `KEY=VALUE` call parameter.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// An in-memory node holding only the seed data. Never talks to a cluster.
pub async fn offline_node(config_path: Option<PathBuf>, seed_path: &Path) -> Result<PolicyNode> {
    let config = PolicyNodeConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let mut engine = config.spec.engine.clone();
    engine.cluster_api_url = None;

    let seed = SeedData::from_yaml_file(seed_path)
        .with_context(|| format!("Failed to load seed file {:?}", seed_path))?;
    let node = PolicyNode::build(PolicyStores::in_memory(), &engine);
    seed.check_scripts(node.scripts.as_ref())?;
    seed.apply(&node.stores).await?;
    Ok(node)
}

pub async fn find_cluster(node: &PolicyNode, secret_key: &str) -> Result<ClusterPolicy> {
    node.stores
        .clusters
        .find_by_secret(secret_key)
        .await?
        .with_context(|| format!("No cluster with key '{}' in the seed file", secret_key))
}

pub fn call_params(pairs: &[(String, String)]) -> CallParams {
    CallParams::from_query(pairs.iter().cloned())
}
