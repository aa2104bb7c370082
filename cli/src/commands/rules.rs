// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway rule inspection
//!
//! Commands: match

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use callgate_core::routing_rule::{RoutingRule, RuleMatch};

use super::{call_params, find_cluster, offline_node, parse_key_val};

#[derive(Subcommand)]
pub enum RulesCommand {
    /// Show how every gateway rule of a cluster treats a call
    Match {
        /// Seed file with clusters and rules
        #[arg(short, long, value_name = "FILE")]
        seed: PathBuf,

        /// Cluster secret key
        #[arg(short, long)]
        key: String,

        /// Call parameter, repeatable (e.g. -p local_alias=sip:1234@gw.example.com)
        #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

pub async fn handle_command(command: RulesCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        RulesCommand::Match { seed, key, params } => {
            let outcomes = explain(config_path, seed, &key, &params).await?;
            print_outcomes(&outcomes);
            Ok(())
        }
    }
}

/// Rules in evaluation order with their outcome. The first match is the
/// one a decision would use.
pub async fn explain(
    config_path: Option<PathBuf>,
    seed: PathBuf,
    key: &str,
    params: &[(String, String)],
) -> Result<Vec<(RoutingRule, RuleMatch)>> {
    let node = offline_node(config_path, &seed).await?;
    let cluster = find_cluster(&node, key).await?;
    Ok(node.rules.explain(cluster.cluster_id, &call_params(params)).await?)
}

fn print_outcomes(outcomes: &[(RoutingRule, RuleMatch)]) {
    if outcomes.is_empty() {
        println!("{}", "No gateway rules for this cluster".yellow());
        return;
    }

    let mut active_seen = false;
    for (rule, outcome) in outcomes {
        let label = format!("#{} {} (priority {})", rule.id.0, rule.name, rule.priority);
        match outcome.failure() {
            None if !active_seen => {
                active_seen = true;
                println!("{} {}", "✓".green(), format!("{} [active]", label).green().bold());
            }
            None => println!("{} {}", "✓".green(), label),
            Some(reason) => println!("{} {} {}", "✗".red(), label, format!("({})", reason).dimmed()),
        }
    }

    if !active_seen {
        println!();
        println!("{}", "No rule matches this call".yellow());
    }
}
