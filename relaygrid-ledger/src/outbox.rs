//! Transactional outbox (spec §4.4 Outbox, §8 invariant: an effect is
//! recorded in the same transaction as the state change that caused it, so
//! a crash between "task marked done" and "webhook sent" cannot silently
//! drop the webhook).

use relaygrid_core::OutboxStatus;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(FromRow)]
pub struct OutboxRow {
    pub id: Uuid,
    pub target: String,
    pub payload: serde_json::Value,
    pub delivery_attempts: i32,
}

pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a pending outbox entry as part of an already-open
    /// transaction, so it commits atomically with whatever caused it.
    pub async fn insert_in_txn(
        &self,
        txn: &mut Transaction<'_, Postgres>,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO relaygrid_outbox (id, status, target, payload, delivery_attempts)
             VALUES ($1, $2, $3, $4, 0)",
        )
        .bind(id)
        .bind(OutboxStatus::Pending.as_str())
        .bind(target)
        .bind(&payload)
        .execute(&mut **txn)
        .await?;
        Ok(id)
    }

    pub async fn claim_pending(&self, limit: i64) -> Result<Vec<OutboxRow>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, target, payload, delivery_attempts FROM relaygrid_outbox
             WHERE status = 'pending'
             ORDER BY created_at
             LIMIT $1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn mark_delivered(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE relaygrid_outbox SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(OutboxStatus::Delivered.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE relaygrid_outbox SET delivery_attempts = delivery_attempts + 1,
             status = CASE WHEN delivery_attempts + 1 >= 10 THEN 'failed' ELSE 'pending' END
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
