// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy server process
//!
//! Runs the HTTP policy endpoint in the foreground. Process supervision is
//! left to systemd or the container runtime.

pub mod server;

pub use server::start_server;
