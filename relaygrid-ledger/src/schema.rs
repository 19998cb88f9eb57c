//! Schema bootstrap (spec §3 tables), grounded on the teacher's
//! `ensure_schema` in `postgres_runtime_repository.rs` and the
//! `FOR UPDATE SKIP LOCKED` CTE style from the seesaw `PgJobStore`.
//!
//! Plain `CREATE TABLE IF NOT EXISTS` run at pool construction time rather
//! than a migrations framework: this crate is the whole persistence layer
//! for a single service, not a library other services migrate against.

pub const CREATE_TASKS: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_tasks (
    id UUID PRIMARY KEY,
    task_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    priority TEXT NOT NULL,
    status TEXT NOT NULL,
    trace_id TEXT,
    idempotency_key TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    retry_count INT NOT NULL DEFAULT 0,
    last_error TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS relaygrid_tasks_idempotency_key_idx
    ON relaygrid_tasks (idempotency_key) WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS relaygrid_tasks_status_idx ON relaygrid_tasks (status);
"#;

pub const CREATE_RUNS: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_runs (
    id UUID PRIMARY KEY,
    task_id UUID NOT NULL REFERENCES relaygrid_tasks (id),
    started_at TIMESTAMPTZ NOT NULL,
    ended_at TIMESTAMPTZ,
    status TEXT NOT NULL,
    attempt INT NOT NULL,
    metrics JSONB NOT NULL DEFAULT '{}'::jsonb,
    error_details JSONB
);
CREATE INDEX IF NOT EXISTS relaygrid_runs_task_id_idx ON relaygrid_runs (task_id);
"#;

pub const CREATE_INBOX: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_inbox (
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    signature_hash TEXT NOT NULL,
    received_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    status TEXT NOT NULL,
    rejection_reason TEXT,
    PRIMARY KEY (source, external_id)
);
"#;

pub const CREATE_OUTBOX: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_outbox (
    id UUID PRIMARY KEY,
    status TEXT NOT NULL,
    target TEXT NOT NULL,
    payload JSONB NOT NULL,
    delivery_attempts INT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS relaygrid_outbox_status_idx ON relaygrid_outbox (status);
"#;

pub const CREATE_BUDGETS: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_budgets (
    provider TEXT NOT NULL,
    date DATE NOT NULL,
    budget_usd DOUBLE PRECISION NOT NULL,
    spent_usd DOUBLE PRECISION NOT NULL DEFAULT 0,
    token_count BIGINT NOT NULL DEFAULT 0,
    request_count BIGINT NOT NULL DEFAULT 0,
    last_updated TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (provider, date)
);
"#;

pub const CREATE_BUDGET_SAMPLES: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_budget_samples (
    id BIGSERIAL PRIMARY KEY,
    provider TEXT NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    cost_usd DOUBLE PRECISION NOT NULL
);
CREATE INDEX IF NOT EXISTS relaygrid_budget_samples_provider_time_idx
    ON relaygrid_budget_samples (provider, recorded_at);
"#;

pub const CREATE_CIRCUIT_BREAKERS: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_circuit_breakers (
    service TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    opened_at TIMESTAMPTZ,
    next_retry_at TIMESTAMPTZ,
    success_count BIGINT NOT NULL DEFAULT 0,
    failure_count BIGINT NOT NULL DEFAULT 0,
    last_success_at TIMESTAMPTZ,
    last_failure_at TIMESTAMPTZ,
    error_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb
);
"#;

pub const CREATE_API_KEYS: &str = r#"
CREATE TABLE IF NOT EXISTS relaygrid_api_keys (
    id UUID PRIMARY KEY,
    key_hash TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    active BOOLEAN NOT NULL DEFAULT TRUE,
    expires_at TIMESTAMPTZ,
    created_by TEXT NOT NULL,
    last_used_at TIMESTAMPTZ
);
"#;

pub async fn ensure_schema(pool: &sqlx::PgPool) -> Result<(), sqlx::Error> {
    for statement in [
        CREATE_TASKS,
        CREATE_RUNS,
        CREATE_INBOX,
        CREATE_OUTBOX,
        CREATE_BUDGETS,
        CREATE_BUDGET_SAMPLES,
        CREATE_CIRCUIT_BREAKERS,
        CREATE_API_KEYS,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
