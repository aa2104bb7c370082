// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Callgate core
//!
//! Call policy decision engine for conferencing clusters.
//!
//! # Architecture
//!
//! - **domain:** call, rule, customer, grant and limit model plus pure matching
//! - **application:** resolver, rule, authorization, limit, federation, script
//!   and decision services
//! - **infrastructure:** stores, webhook client, script sandbox, event bus
//! - **presentation:** HTTP policy endpoint
//! - **node:** wiring of stores and services from a `PolicyNodeConfig`

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
pub mod node;

pub use domain::*;
