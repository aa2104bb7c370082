// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod error;
pub mod rule_service;
pub mod resolver;
pub mod authorization;
pub mod limits;
pub mod federation;
pub mod scripting;
pub mod decision;

// Re-export use cases for convenience
pub use decision::{DecisionService, DecisionSettings};
pub use error::DecisionError;
pub use resolver::{ConferenceFetcher, CustomerResolver, Resolution};
pub use rule_service::{RuleService, RuleSyncError, RuleSyncService, SyncReport};
