// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: call policy types and pure decision logic.
//!
//! Nothing in here performs I/O. Stores, the cluster API, webhooks and the
//! script runtime are reached through the traits in [`repository`],
//! [`upstream`], [`external_policy`], [`script`] and [`coordination`].

pub mod alias;
pub mod pattern;
pub mod call;
pub mod cluster;
pub mod customer;
pub mod routing_rule;
pub mod rule_response;
pub mod authorization;
pub mod limits;
pub mod external_policy;
pub mod script;
pub mod response;
pub mod audit;
pub mod upstream;
pub mod coordination;
pub mod repository;
pub mod config;
