// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Errors that may escape a decision. Outside strict mode none of them reach
//! the caller; the decision falls back to the permissive default.

use crate::domain::external_policy::WebhookError;
use crate::domain::pattern::PatternError;
use crate::domain::repository::RepositoryError;
use crate::domain::script::ScriptError;
use crate::domain::upstream::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}
