//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use ava_domain::config::{Config, ConfigSeverity};
use ava_providers::ProviderRegistry;
use ava_sessions::{LifecycleManager, SessionStore};
use ava_tools::{Dispatcher, LocalDevice};

use crate::events::EventBus;
use crate::runtime::intent::IntentClassifier;
use crate::runtime::pending::PendingTurns;
use crate::runtime::session_gate::SessionGate;
use crate::runtime::{recovery, sweeper};
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(
    config: Arc<Config>,
    shutdown_tx: Arc<tokio::sync::Notify>,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = ProviderRegistry::from_config(&config.llm);
    tracing::info!(providers = llm.list_providers().len(), "LLM provider registry ready");

    assemble(config, llm, shutdown_tx)
}

/// Wire every subsystem around an already-built provider registry.
pub fn assemble(
    config: Arc<Config>,
    llm: ProviderRegistry,
    shutdown_tx: Arc<tokio::sync::Notify>,
) -> anyhow::Result<AppState> {
    // ── Session management ───────────────────────────────────────────
    let db_path = config.storage.database_path();
    let sessions = Arc::new(
        SessionStore::open(&db_path, config.storage.transcript_soft_cap)
            .context("opening session store")?,
    );
    let lifecycle = Arc::new(LifecycleManager::new(&config.sessions));
    let gate = Arc::new(SessionGate::new(config.sessions.queue_depth));
    tracing::info!(
        path = %db_path.display(),
        idle_timeout_minutes = config.sessions.idle_timeout_minutes,
        queue_depth = config.sessions.queue_depth,
        "session management ready"
    );

    // ── Capability dispatcher ────────────────────────────────────────
    let tools = Arc::new(
        Dispatcher::new(&config.tools, Arc::new(LocalDevice::new()))
            .context("initializing capability dispatcher")?,
    );
    tracing::info!(
        interpreters = ?config.tools.code_exec_languages,
        "capability dispatcher ready"
    );

    // ── Catalog ──────────────────────────────────────────────────────
    let catalog = crate::catalog::load(config.catalog.path.as_deref(), tools.device().as_ref())?;

    // ── Operator token (read once, hash for constant-time comparison) ──
    let operator_token_hash = {
        let env_var = &config.server.operator_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(t) => {
                tracing::info!(source = %format!("env:{env_var}"), "operator endpoints enabled");
                Some(Sha256::digest(t.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!("operator endpoints DISABLED: set the {env_var} env var to enable them");
                None
            }
        }
    };

    Ok(AppState {
        llm: Arc::new(llm),
        tools,
        classifier: Arc::new(IntentClassifier::new()),
        sessions,
        lifecycle,
        gate,
        pending: Arc::new(PendingTurns::new()),
        invariant_violations: Arc::new(AtomicU64::new(0)),
        events: Arc::new(EventBus::new(config.broadcast.queue_depth)),
        catalog: Arc::new(catalog),
        operator_token_hash,
        shutdown_tx,
        config,
    })
}

/// Spawn the long-running background tokio tasks (startup recovery,
/// lifecycle sweep, provider probing).
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Startup recovery ─────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            recovery::recover(&state).await;
        });
    }

    // ── Periodic lifecycle sweep ─────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                state.config.sessions.sweep_interval_secs.max(1),
            ));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = sweeper::sweep_once(&state).await {
                    tracing::warn!(error = %e, "lifecycle sweep failed");
                }
            }
        });
    }

    // ── Periodic provider probe ──────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                state.config.llm.probe_interval_secs.max(1),
            ));
            interval.tick().await;
            loop {
                interval.tick().await;
                let changed = sweeper::probe_once(&state).await;
                if changed > 0 {
                    tracing::info!(changed, "provider probe changed health");
                }
            }
        });
    }
    tracing::info!("background tasks spawned");
}
