//! API key store (spec §4.6 Ingress auth; `bin/rotate-api-key.py` grounds
//! the rotate/issue/revoke operations exposed by `relaygrid-orchestrator`).
//!
//! Only the hash is ever persisted. Comparing a presented key against
//! `key_hash` must happen in constant time at the call site
//! (`relaygrid-ingress::auth`) — this repository just stores and looks up
//! rows.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use relaygrid_core::{ApiKeyRecord, ApiKeyRole};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(FromRow)]
struct Row {
    id: Uuid,
    key_hash: String,
    role: String,
    active: bool,
    expires_at: Option<DateTime<Utc>>,
    created_by: String,
    last_used_at: Option<DateTime<Utc>>,
}

impl TryFrom<Row> for ApiKeyRecord {
    type Error = String;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        Ok(ApiKeyRecord {
            id: row.id,
            key_hash: row.key_hash,
            role: ApiKeyRole::from_str(&row.role)?,
            active: row.active,
            expires_at: row.expires_at,
            created_by: row.created_by,
            last_used_at: row.last_used_at,
        })
    }
}

pub struct ApiKeyRepository {
    pool: PgPool,
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn issue(
        &self,
        key_hash: &str,
        role: ApiKeyRole,
        created_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKeyRecord, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO relaygrid_api_keys (id, key_hash, role, active, expires_at, created_by)
             VALUES ($1, $2, $3, TRUE, $4, $5)",
        )
        .bind(id)
        .bind(key_hash)
        .bind(role.as_str())
        .bind(expires_at)
        .bind(created_by)
        .execute(&self.pool)
        .await?;
        Ok(ApiKeyRecord {
            id,
            key_hash: key_hash.to_string(),
            role,
            active: true,
            expires_at,
            created_by: created_by.to_string(),
            last_used_at: None,
        })
    }

    pub async fn revoke(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE relaygrid_api_keys SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Looks up every active key so the caller can run a constant-time
    /// comparison against each hash rather than leaking timing information
    /// through an indexed `WHERE key_hash = $1` lookup.
    pub async fn list_active(&self) -> Result<Vec<ApiKeyRecord>, sqlx::Error> {
        let rows: Vec<Row> =
            sqlx::query_as("SELECT * FROM relaygrid_api_keys WHERE active = TRUE")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().filter_map(|r| ApiKeyRecord::try_from(r).ok()).collect())
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE relaygrid_api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
