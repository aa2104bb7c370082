// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod coordination;
pub mod event_bus;
pub mod webhook_client;
pub mod script_engine;
pub mod seed;

pub use coordination::{InMemoryKeyedLock, InMemoryNegativeCache};
pub use event_bus::{DecisionEventBus, PublishingAuditLog};
pub use repositories::PolicyStores;
pub use script_engine::HandlebarsScriptRuntime;
pub use seed::{SeedData, SeedError};
pub use webhook_client::{ClusterApiClient, HttpFederationClient};
