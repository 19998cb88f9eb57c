//! Small time helpers shared across crates.

use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch, the wire format used for lease and
/// retry timestamps (mirrors the teacher's `dt_to_ms`/`ms_to_dt` pair in
/// `postgres_runtime_repository.rs`).
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
