// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Offline policy evaluation
//!
//! Answers one policy request against a seed file without a running server
//! or a cluster API.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;

use callgate_core::audit::DecisionAuditRecord;

use super::{call_params, find_cluster, offline_node, parse_key_val};

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    /// Seed file with clusters, rules, customers and grants
    #[arg(short, long, value_name = "FILE")]
    pub seed: PathBuf,

    /// Cluster secret key, as it appears in the policy URL
    #[arg(short, long)]
    pub key: String,

    /// Call parameter, repeatable (e.g. -p local_alias=meet@example.com)
    #[arg(short = 'p', long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Also print the audit records written by the decision
    #[arg(long)]
    pub audit: bool,
}

/// What one offline evaluation produced.
#[derive(Debug)]
pub struct Evaluation {
    pub response: Value,
    pub rejected: bool,
    pub audit: Vec<DecisionAuditRecord>,
}

pub async fn handle_command(args: EvaluateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let show_audit = args.audit;
    let evaluation = evaluate(&args, config_path).await?;

    let rendered = serde_json::to_string_pretty(&evaluation.response)?;
    if evaluation.rejected {
        println!("{}", rendered.red());
    } else {
        println!("{}", rendered.green());
    }

    if show_audit {
        println!();
        println!("{}", "Audit trail:".bold());
        if evaluation.audit.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        // Oldest first reads like the decision order.
        for record in evaluation.audit.iter().rev() {
            println!(
                "  [{:?}] {} {}",
                record.kind,
                record.action.bold(),
                record.message
            );
        }
    }

    Ok(())
}

pub async fn evaluate(args: &EvaluateArgs, config_path: Option<PathBuf>) -> Result<Evaluation> {
    let node = offline_node(config_path, &args.seed).await?;
    let cluster = find_cluster(&node, &args.key).await?;
    let params = call_params(&args.params);

    let response = node
        .decisions
        .decide(&cluster, &params, None)
        .await
        .context("Policy decision failed")?;

    let audit = if args.audit {
        node.stores.audit.recent(cluster.cluster_id, 100).await?
    } else {
        Vec::new()
    };

    Ok(Evaluation {
        response: response.to_json(),
        rejected: response.is_reject(),
        audit,
    })
}
