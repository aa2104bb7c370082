// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use callgate_core::config::{PolicyNodeConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./callgate-config.yaml)
        #[arg(short, long, default_value = "./callgate-config.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = PolicyNodeConfig::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./callgate-config.yaml");
        println!("  4. ~/.callgate/config.yaml");
        println!("  5. /etc/callgate/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!();

    let server = &config.spec.server;
    println!("{}", "Server:".bold());
    println!("  Listen: {}:{}", server.bind_address, server.port);
    match server.metrics_port {
        Some(port) => println!("  Metrics port: {}", port),
        None => println!("  Metrics port: {}", "(disabled)".dimmed()),
    }
    println!();

    let engine = &config.spec.engine;
    println!("{}", "Engine:".bold());
    println!("  Strict mode: {}", engine.strict_mode);
    println!("  Fetch missing conferences: {}", engine.fetch_missing_conference);
    println!(
        "  Cluster API: {}",
        engine.cluster_api_url.as_deref().unwrap_or("(none)")
    );
    println!("  Negative cache TTL: {}s", engine.negative_cache_ttl_secs);
    println!("  Fetch lock wait: {}ms", engine.fetch_lock_wait_ms);
    println!("  Upstream timeout: {}ms", engine.upstream_timeout_ms);
    println!("  Federation timeout: {}ms", engine.federation_timeout_ms);
    println!("  Script cache TTL: {}s", engine.script_cache_ttl_secs);
    println!();

    let storage = &config.spec.storage;
    println!("{}", "Storage:".bold());
    println!("  Backend: {:?}", storage.backend);
    if storage.database_url.is_some() {
        // Connection strings carry credentials.
        println!("  Database URL: {}", "(set)".dimmed());
    }
    if let Some(seed) = &storage.seed_file {
        println!("  Seed file: {}", seed.display());
    }
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {}", config.spec.logging.level);
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PolicyNodeConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
