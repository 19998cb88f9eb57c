//! Replay defense (spec §4.4 Inbox, §6 webhook ingestion), grounded on the
//! `shared/security.py` replay-window check, implemented here as a unique
//! index rather than a Redis key with a TTL: `(source, external_id)` can
//! never be inserted twice, so a concurrent duplicate delivery loses the
//! insert race instead of a check-then-act gap.

use chrono::Utc;
use relaygrid_core::InboxStatus;
use sqlx::PgPool;

pub struct InboxRepository {
    pool: PgPool,
}

impl InboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Attempts to record a first-seen delivery. Returns `true` if this is a
    /// new `(source, external_id)` pair (accepted), `false` if it has been
    /// seen before (replay, reject the webhook).
    pub async fn try_accept(
        &self,
        source: &str,
        external_id: &str,
        signature_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO relaygrid_inbox (source, external_id, signature_hash, received_at, status)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (source, external_id) DO NOTHING",
        )
        .bind(source)
        .bind(external_id)
        .bind(signature_hash)
        .bind(Utc::now())
        .bind(InboxStatus::Accepted.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_rejected(
        &self,
        source: &str,
        external_id: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE relaygrid_inbox SET status = $3, rejection_reason = $4
             WHERE source = $1 AND external_id = $2",
        )
        .bind(source)
        .bind(external_id)
        .bind(InboxStatus::Rejected.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
