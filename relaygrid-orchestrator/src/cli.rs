//! CLI surface, grounded on the teacher's hand-rolled subcommand dispatch in
//! `examples/cli_durable_job.rs` (run/list/inspect/resume/replay/cancel),
//! reshaped onto `clap` derive, and on `bin/rotate-api-key.py` /
//! `bin/dlq-drain.py` for the operator subcommands.

use clap::{Parser, Subcommand};
use relaygrid_core::ApiKeyRole;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "relaygrid-orchestrator", about = "Durable task orchestration core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the worker runtime only: dequeue, dispatch, ack/nack.
    Worker,
    /// Run the ingress HTTP server only: submission, status, webhooks.
    Server {
        #[arg(long, env = "RELAYGRID_BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind_addr: String,
    },
    /// Run the worker and the ingress server in one process.
    All {
        #[arg(long, env = "RELAYGRID_BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind_addr: String,
    },
    /// API key lifecycle operations.
    Keys {
        #[command(subcommand)]
        action: KeysCommand,
    },
    /// Queue maintenance operations.
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
}

#[derive(Subcommand)]
pub enum KeysCommand {
    /// Issue a brand-new API key and print the raw (unhashed) secret once.
    Issue {
        #[arg(long, value_enum)]
        role: CliApiKeyRole,
        #[arg(long)]
        created_by: String,
    },
    /// Deactivate a key without replacing it.
    Revoke { id: Uuid },
    /// Revoke an existing key and issue a replacement with the same role
    /// (grounded on `bin/rotate-api-key.py`'s rotate operation).
    Rotate {
        id: Uuid,
        #[arg(long)]
        created_by: String,
    },
}

#[derive(Subcommand)]
pub enum QueueCommand {
    /// Re-enqueue up to `max` dead-lettered tasks, with retry counts reset
    /// (grounded on `bin/dlq-drain.py`). Demoted one priority tier unless
    /// `--no-lower-priority` is passed.
    DrainDlq {
        #[arg(long, default_value_t = 100)]
        max: usize,
        #[arg(long)]
        no_lower_priority: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum CliApiKeyRole {
    Admin,
    Service,
    Readonly,
}

impl From<CliApiKeyRole> for ApiKeyRole {
    fn from(role: CliApiKeyRole) -> Self {
        match role {
            CliApiKeyRole::Admin => ApiKeyRole::Admin,
            CliApiKeyRole::Service => ApiKeyRole::Service,
            CliApiKeyRole::Readonly => ApiKeyRole::Readonly,
        }
    }
}
