// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Policy Node Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) for a policy
// server node:
// - HTTP listener and metrics exporter
// - Decision engine switches and timeouts
// - Storage backend selection and seed data
// - Logging level

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "callgate/v1";
pub const KIND: &str = "PolicyNodeConfig";
pub const CONFIG_PATH_ENV: &str = "CALLGATE_CONFIG_PATH";

/// Top-level policy node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyNodeConfig {
    /// API version (must be "callgate/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "PolicyNodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: PolicyNodeSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyNodeSpec {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Prometheus exporter port; unset disables the exporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            metrics_port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Surface internal errors instead of answering with the permissive default
    #[serde(default)]
    pub strict_mode: bool,

    /// Ask the cluster for conferences unknown to the local store
    #[serde(default = "default_true")]
    pub fetch_missing_conference: bool,

    #[serde(default = "default_negative_cache_ttl")]
    pub negative_cache_ttl_secs: u64,

    #[serde(default = "default_timeout_ms")]
    pub fetch_lock_wait_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub upstream_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub federation_timeout_ms: u64,

    #[serde(default = "default_script_cache_ttl")]
    pub script_cache_ttl_secs: u64,

    /// Base URL of the cluster management API; unset disables live fetching
    /// and rule sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_api_url: Option<String>,
}

impl EngineConfig {
    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }

    pub fn fetch_lock_wait(&self) -> Duration {
        Duration::from_millis(self.fetch_lock_wait_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn federation_timeout(&self) -> Duration {
        Duration::from_millis(self.federation_timeout_ms)
    }

    pub fn script_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.script_cache_ttl_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            fetch_missing_conference: true,
            negative_cache_ttl_secs: default_negative_cache_ttl(),
            fetch_lock_wait_ms: default_timeout_ms(),
            upstream_timeout_ms: default_timeout_ms(),
            federation_timeout_ms: default_timeout_ms(),
            script_cache_ttl_secs: default_script_cache_ttl(),
            cluster_api_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Required for the postgres backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    /// YAML file with clusters, rules, customers and grants to load at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8600
}

fn default_negative_cache_ttl() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_script_cache_ttl() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PolicyNodeConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "callgate-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: PolicyNodeSpec::default(),
        }
    }
}

impl PolicyNodeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CALLGATE_CONFIG_PATH environment variable
    /// 2. ./callgate-config.yaml (working directory)
    /// 3. ~/.callgate/config.yaml (user home)
    /// 4. /etc/callgate/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./callgate-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".callgate").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/callgate/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_flag("CALLGATE_STRICT_MODE") {
            self.spec.engine.strict_mode = value;
        }
        if let Some(value) = env_flag("CALLGATE_FETCH_MISSING_CONFERENCE") {
            self.spec.engine.fetch_missing_conference = value;
        }
        if let Ok(url) = std::env::var("CALLGATE_CLUSTER_API_URL") {
            if !url.is_empty() {
                tracing::info!("Environment override: CALLGATE_CLUSTER_API_URL");
                self.spec.engine.cluster_api_url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("CALLGATE_DATABASE_URL") {
            if !url.is_empty() {
                tracing::info!("Environment override: CALLGATE_DATABASE_URL");
                self.spec.storage.database_url = Some(url);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let engine = &self.spec.engine;
        for (name, value) in [
            ("fetch_lock_wait_ms", engine.fetch_lock_wait_ms),
            ("upstream_timeout_ms", engine.upstream_timeout_ms),
            ("federation_timeout_ms", engine.federation_timeout_ms),
        ] {
            if value == 0 {
                anyhow::bail!("spec.engine.{} must be greater than zero", name);
            }
        }

        if let Some(url) = &engine.cluster_api_url {
            url::Url::parse(url)
                .map_err(|e| anyhow::anyhow!("spec.engine.cluster_api_url is not a valid URL: {}", e))?;
        }

        if self.spec.storage.backend == StorageBackendKind::Postgres
            && self.spec.storage.database_url.as_deref().unwrap_or("").is_empty()
        {
            anyhow::bail!("spec.storage.database_url is required for the postgres backend");
        }

        Ok(())
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => {
            tracing::info!("Environment override: {}=true", name);
            Some(true)
        }
        "false" | "0" | "no" | "off" => {
            tracing::info!("Environment override: {}=false", name);
            Some(false)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                name,
                val
            );
            None
        }
    }
}
