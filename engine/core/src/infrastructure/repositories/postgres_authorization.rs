// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Authorization Store
//!
//! Production `AuthorizationStore` backed by two tables. The full grant is
//! kept as JSON in `data`; the columns used for filtering and the usage
//! counter live beside it and are authoritative.
//!
//! `try_use_grant` is a single `UPDATE ... RETURNING` guarded by the validity
//! window and the usage ceiling, so two concurrent dial-ins can never both
//! take the last use.

use crate::domain::authorization::{AuthorizationOverride, GrantId, TimeBoxedAuthorization};
use crate::domain::cluster::ClusterId;
use crate::domain::customer::CustomerId;
use crate::domain::repository::{AuthorizationStore, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS authorization_overrides (
        id UUID PRIMARY KEY,
        customer_id UUID NOT NULL,
        cluster_id UUID NULL,
        data JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeboxed_authorizations (
        id UUID PRIMARY KEY,
        customer_id UUID NOT NULL,
        cluster_id UUID NULL,
        local_alias TEXT NOT NULL,
        valid_from TIMESTAMPTZ NULL,
        valid_to TIMESTAMPTZ NOT NULL,
        usage_limit INTEGER NULL,
        usage_count INTEGER NOT NULL DEFAULT 0,
        first_use TIMESTAMPTZ NULL,
        data JSONB NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS timeboxed_authorizations_lookup
        ON timeboxed_authorizations (customer_id, local_alias, valid_to)
    "#,
];

pub struct PostgresAuthorizationStore {
    pool: PgPool,
}

impl PostgresAuthorizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn grant_from_row(row: &PgRow) -> Result<TimeBoxedAuthorization, RepositoryError> {
    let data: serde_json::Value = row.try_get("data")?;
    let mut grant: TimeBoxedAuthorization = serde_json::from_value(data)?;
    let usage_count: i32 = row.try_get("usage_count")?;
    grant.usage_count = u32::try_from(usage_count).unwrap_or(0);
    grant.first_use = row.try_get("first_use")?;
    Ok(grant)
}

#[async_trait]
impl AuthorizationStore for PostgresAuthorizationStore {
    async fn overrides_for(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
    ) -> Result<Vec<AuthorizationOverride>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM authorization_overrides
            WHERE customer_id = $1 AND (cluster_id IS NULL OR cluster_id = $2)
            ORDER BY id
            "#,
        )
        .bind(customer_id.0)
        .bind(cluster_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let data: serde_json::Value = row.try_get("data")?;
                Ok(serde_json::from_value(data)?)
            })
            .collect()
    }

    async fn save_override(&self, grant: &AuthorizationOverride) -> Result<(), RepositoryError> {
        let data = serde_json::to_value(grant)?;
        sqlx::query(
            r#"
            INSERT INTO authorization_overrides (id, customer_id, cluster_id, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                cluster_id = EXCLUDED.cluster_id,
                data = EXCLUDED.data
            "#,
        )
        .bind(grant.id.0)
        .bind(grant.customer_id.0)
        .bind(grant.cluster_id.map(|c| c.0))
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save authorization override: {}", e)))?;
        Ok(())
    }

    async fn active_grants(
        &self,
        customer_id: CustomerId,
        cluster_id: ClusterId,
        local_alias: &str,
        ts: DateTime<Utc>,
    ) -> Result<Vec<TimeBoxedAuthorization>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT data, usage_count, first_use FROM timeboxed_authorizations
            WHERE customer_id = $1
              AND (cluster_id IS NULL OR cluster_id = $2)
              AND local_alias = $3
              AND (valid_from IS NULL OR valid_from <= $4)
              AND valid_to >= $4
              AND (usage_limit IS NULL OR usage_limit <= 0 OR usage_count < usage_limit)
            ORDER BY valid_to
            "#,
        )
        .bind(customer_id.0)
        .bind(cluster_id.0)
        .bind(local_alias)
        .bind(ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(grant_from_row).collect()
    }

    async fn save_grant(&self, grant: &TimeBoxedAuthorization) -> Result<(), RepositoryError> {
        let data = serde_json::to_value(grant)?;
        sqlx::query(
            r#"
            INSERT INTO timeboxed_authorizations (
                id, customer_id, cluster_id, local_alias, valid_from, valid_to,
                usage_limit, usage_count, first_use, data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                customer_id = EXCLUDED.customer_id,
                cluster_id = EXCLUDED.cluster_id,
                local_alias = EXCLUDED.local_alias,
                valid_from = EXCLUDED.valid_from,
                valid_to = EXCLUDED.valid_to,
                usage_limit = EXCLUDED.usage_limit,
                data = EXCLUDED.data
            "#,
        )
        .bind(grant.id.0)
        .bind(grant.customer_id.0)
        .bind(grant.cluster_id.map(|c| c.0))
        .bind(&grant.local_alias)
        .bind(grant.valid_from)
        .bind(grant.valid_to)
        .bind(grant.usage_limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
        .bind(i32::try_from(grant.usage_count).unwrap_or(i32::MAX))
        .bind(grant.first_use)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save authorization: {}", e)))?;
        Ok(())
    }

    async fn try_use_grant(
        &self,
        id: GrantId,
        ts: DateTime<Utc>,
    ) -> Result<Option<TimeBoxedAuthorization>, RepositoryError> {
        let row = sqlx::query(
            r#"
            UPDATE timeboxed_authorizations
            SET usage_count = usage_count + 1,
                first_use = COALESCE(first_use, $2)
            WHERE id = $1
              AND (valid_from IS NULL OR valid_from <= $2)
              AND valid_to >= $2
              AND (usage_limit IS NULL OR usage_limit <= 0 OR usage_count < usage_limit)
            RETURNING data, usage_count, first_use
            "#,
        )
        .bind(id.0)
        .bind(ts)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(grant_from_row).transpose()
    }
}
