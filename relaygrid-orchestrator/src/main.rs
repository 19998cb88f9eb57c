//! Process entry point: parses the CLI, wires up tracing, and dispatches to
//! the worker runtime, the ingress server, or an operator subcommand.

mod cli;
mod commands;
mod handlers;
mod ledger_observer;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, KeysCommand, QueueCommand};
use commands::Env;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let env = Env::load()?;

    match cli.command {
        Command::Worker => commands::run_worker(&env).await,
        Command::Server { bind_addr } => commands::run_server(&env, &bind_addr).await,
        Command::All { bind_addr } => commands::run_all(&env, &bind_addr).await,
        Command::Keys { action } => match action {
            KeysCommand::Issue { role, created_by } => {
                commands::issue_key(&env, role.into(), &created_by).await
            }
            KeysCommand::Revoke { id } => commands::revoke_key(&env, id).await,
            KeysCommand::Rotate { id, created_by } => {
                commands::rotate_key(&env, id, &created_by).await
            }
        },
        Command::Queue { action } => match action {
            QueueCommand::DrainDlq { max, no_lower_priority } => {
                commands::drain_dlq(&env, max, !no_lower_priority).await
            }
        },
    }
}
