//! Subcommand implementations. Bin-level code aggregates errors with
//! `anyhow` the way the teacher's CLI examples do, rather than propagating
//! the library `thiserror` types all the way out.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::RngCore;
use relaygrid_core::{ApiKeyRole, OrchestratorConfig};
use relaygrid_ingress::{AppState, IngressConfig};
use relaygrid_ledger::{ApiKeyRepository, InboxRepository, PgBudgetStore, RunRepository, TaskRepository};
use relaygrid_queue::{QueueEngine, RedisQueueEngine};
use relaygrid_resilience::{BudgetGuard, CircuitBreaker, CircuitBreakerConfig, ModelFailover};
use relaygrid_worker::{HandlerRegistry, Worker, WorkerConfig};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::handlers::{AlwaysFailHandler, EchoHandler, MaintenanceHandler, ModelCallHandler, SleepMsHandler};
use crate::ledger_observer::LedgerObserver;

#[derive(Clone)]
pub struct Env {
    pub database_url: String,
    pub redis_url: String,
    pub api_key_salt: String,
    pub webhook_secrets: HashMap<String, String>,
    pub provider_endpoints: HashMap<String, String>,
}

impl Env {
    pub fn load() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            redis_url: std::env::var("REDIS_URL").context("REDIS_URL must be set")?,
            api_key_salt: std::env::var("RELAYGRID_API_KEY_SALT")
                .unwrap_or_else(|_| "relaygrid-dev-salt".to_string()),
            webhook_secrets: parse_pairs(
                &std::env::var("RELAYGRID_WEBHOOK_SECRETS").unwrap_or_default(),
            ),
            provider_endpoints: parse_pairs(
                &std::env::var("RELAYGRID_PROVIDER_ENDPOINTS").unwrap_or_default(),
            ),
        })
    }
}

fn parse_pairs(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Builds the registry with the static demo handlers plus, when a ledger
/// pool and at least one provider endpoint are configured, a
/// [`ModelCallHandler`] wired through a fresh [`ModelFailover`] (one
/// [`CircuitBreaker`] per registered provider, budget tracked in Postgres).
fn default_registry(pool: sqlx::PgPool, provider_endpoints: HashMap<String, String>) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(EchoHandler));
    registry.register(Box::new(MaintenanceHandler));
    registry.register(Box::new(SleepMsHandler));
    registry.register(Box::new(AlwaysFailHandler));

    if !provider_endpoints.is_empty() {
        let budget = Arc::new(BudgetGuard::new(
            PgBudgetStore::new(pool),
            std::time::Duration::from_secs(86_400),
        ));
        let mut failover = ModelFailover::new(budget);
        for provider in provider_endpoints.keys() {
            failover = failover.register(
                provider.clone(),
                Arc::new(CircuitBreaker::new(provider.clone(), CircuitBreakerConfig::default())),
            );
        }
        registry.register(Box::new(ModelCallHandler::new(
            Arc::new(failover),
            provider_endpoints,
        )));
    }

    Arc::new(registry)
}

pub async fn run_worker(env: &Env) -> Result<()> {
    let pool = relaygrid_ledger::connect(&env.database_url).await?;
    let queue: Arc<dyn QueueEngine> = Arc::new(RedisQueueEngine::connect(&env.redis_url).await?);
    let config = WorkerConfig::from(&OrchestratorConfig::from_env());
    let reclaim_visibility_timeout = config.visibility_timeout;

    let observer = Arc::new(LedgerObserver::new(
        Arc::new(RunRepository::new(pool.clone())),
        Arc::new(TaskRepository::new(pool.clone())),
        Arc::new(relaygrid_ledger::OutboxRepository::new(pool.clone())),
        pool.clone(),
    ));

    let worker = Arc::new(
        Worker::builder()
            .queue(queue)
            .registry(default_registry(pool, env.provider_endpoints.clone()))
            .observer(observer)
            .config(config)
            .build(),
    );

    let shutdown_worker = worker.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("ctrl-c received, requesting worker shutdown");
        shutdown_worker.request_shutdown();
    });

    let reclaim_queue = RedisQueueEngine::connect(&env.redis_url).await?;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reclaim_visibility_timeout / 2);
        loop {
            ticker.tick().await;
            match relaygrid_worker::reclaim_tick(&reclaim_queue, reclaim_visibility_timeout).await {
                Ok(count) if count > 0 => tracing::info!(count, "reclaimed expired leases"),
                Ok(_) => {}
                Err(err) => tracing::error!(%err, "lease reclaim tick failed"),
            }
        }
    });

    worker.run().await;
    Ok(())
}

pub async fn run_server(env: &Env, bind_addr: &str) -> Result<()> {
    let pool = relaygrid_ledger::connect(&env.database_url).await?;
    let queue: Arc<dyn QueueEngine> = Arc::new(RedisQueueEngine::connect(&env.redis_url).await?);

    let orchestrator_config = OrchestratorConfig::from_env();
    let ingress_config = Arc::new(IngressConfig::from_orchestrator_config(
        &orchestrator_config,
        env.api_key_salt.clone(),
        env.webhook_secrets.clone(),
    ));

    let state = AppState {
        queue,
        registry: default_registry(pool.clone(), env.provider_endpoints.clone()),
        tasks: Arc::new(TaskRepository::new(pool.clone())),
        runs: Arc::new(RunRepository::new(pool.clone())),
        api_keys: Arc::new(ApiKeyRepository::new(pool.clone())),
        inbox: Arc::new(InboxRepository::new(pool)),
        config: ingress_config,
    };

    let app = relaygrid_ingress::build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "ingress server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn run_all(env: &Env, bind_addr: &str) -> Result<()> {
    let worker_env = env.clone();
    let server_env = env.clone();
    let bind_addr = bind_addr.to_string();

    let worker_handle = tokio::spawn(async move { run_worker(&worker_env).await });
    let server_handle =
        tokio::spawn(async move { run_server(&server_env, &bind_addr).await });

    let (worker_result, server_result) = tokio::try_join!(worker_handle, server_handle)?;
    worker_result?;
    server_result?;
    Ok(())
}

pub async fn drain_dlq(env: &Env, max: usize, lower_priority: bool) -> Result<()> {
    let queue = RedisQueueEngine::connect(&env.redis_url).await?;
    let drained = queue.drain_dlq(max, lower_priority).await?;
    println!("drained {drained} task(s) from the dead-letter queue");
    Ok(())
}

fn generate_raw_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hash_key(raw_key: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn issue_key(env: &Env, role: ApiKeyRole, created_by: &str) -> Result<()> {
    let pool = relaygrid_ledger::connect(&env.database_url).await?;
    let repo = ApiKeyRepository::new(pool);
    let raw_key = generate_raw_key();
    let hash = hash_key(&raw_key, &env.api_key_salt);
    let record = repo.issue(&hash, role, created_by, None).await?;
    println!("issued key {} (role {:?})", record.id, record.role);
    println!("raw key (store this now, it will not be shown again): {raw_key}");
    Ok(())
}

pub async fn revoke_key(env: &Env, id: Uuid) -> Result<()> {
    let pool = relaygrid_ledger::connect(&env.database_url).await?;
    let repo = ApiKeyRepository::new(pool);
    repo.revoke(id).await?;
    println!("revoked key {id}");
    Ok(())
}

pub async fn rotate_key(env: &Env, id: Uuid, created_by: &str) -> Result<()> {
    let pool = relaygrid_ledger::connect(&env.database_url).await?;
    let repo = ApiKeyRepository::new(pool);

    let active = repo.list_active().await?;
    let existing = active
        .into_iter()
        .find(|k| k.id == id)
        .context("no active key with that id")?;

    repo.revoke(id).await?;
    let raw_key = generate_raw_key();
    let hash = hash_key(&raw_key, &env.api_key_salt);
    let record = repo.issue(&hash, existing.role, created_by, None).await?;

    println!("rotated key {id} -> {}", record.id);
    println!("raw key (store this now, it will not be shown again): {raw_key}");
    Ok(())
}
