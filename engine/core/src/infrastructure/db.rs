// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that is handed
//! to the PostgreSQL stores. Only used when `spec.storage.backend` is
//! `postgres`.

use crate::infrastructure::repositories::PostgresAuthorizationStore;
use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Authorization store on this pool, with its tables created.
    pub async fn authorization_store(&self) -> Result<PostgresAuthorizationStore> {
        let store = PostgresAuthorizationStore::new(self.pool.clone());
        store
            .ensure_schema()
            .await
            .context("Failed to create authorization tables")?;
        Ok(store)
    }
}
