// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`callgate-core`)
//!
//! HTTP surface that translates policy requests from the cluster into
//! `DecisionService` calls. No decision logic lives here.
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /policy/{secret_key}/policy/v1/service/configuration` | Policy decision |
//! | `GET /health` | Liveness |

pub mod api;
