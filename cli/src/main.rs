// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # callgate
//!
//! Policy server for conferencing clusters.
//!
//! ## Commands
//!
//! - `callgate serve` - Run the HTTP policy endpoint
//! - `callgate evaluate` - Answer one policy request offline against a seed file
//! - `callgate rules match` - Explain which gateway rules match a call
//! - `callgate config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use callgate::commands::{self, ConfigCommand, EvaluateArgs, RulesCommand};
use callgate::daemon;

/// callgate - call policy decisions for conferencing clusters
#[derive(Parser)]
#[command(name = "callgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CALLGATE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP port (overrides spec.server.port)
    #[arg(long, global = true, env = "CALLGATE_PORT")]
    port: Option<u16>,

    /// Bind address (overrides spec.server.bind_address)
    #[arg(long, global = true, env = "CALLGATE_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CALLGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the policy server
    #[command(name = "serve")]
    Serve,

    /// Answer one policy request offline
    #[command(name = "evaluate")]
    Evaluate(EvaluateArgs),

    /// Gateway rule inspection
    #[command(name = "rules")]
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Serve) => {
            info!("Starting callgate policy server");
            daemon::start_server(cli.config, cli.host, cli.port).await
        }
        Some(Commands::Evaluate(args)) => commands::evaluate::handle_command(args, cli.config).await,
        Some(Commands::Rules { command }) => commands::rules::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
