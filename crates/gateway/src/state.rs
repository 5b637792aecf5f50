use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use ava_domain::config::Config;
use ava_providers::ProviderRegistry;
use ava_sessions::{LifecycleManager, SessionStore};
use ava_tools::Dispatcher;

use crate::events::EventBus;
use crate::runtime::intent::IntentClassifier;
use crate::runtime::pending::PendingTurns;
use crate::runtime::session_gate::SessionGate;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services**: config, LLM providers, capability dispatcher
/// - **Session management**: store, lifecycle, turn gate, pending turns
/// - **Transport**: event bus, catalog document
/// - **Security**: operator token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub llm: Arc<ProviderRegistry>,
    pub tools: Arc<Dispatcher>,
    pub classifier: Arc<IntentClassifier>,

    // ── Session management ────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    pub lifecycle: Arc<LifecycleManager>,
    pub gate: Arc<SessionGate>,
    /// User turns accepted while the store was unavailable.
    pub pending: Arc<PendingTurns>,
    /// Transcript invariant violations observed since startup.
    pub invariant_violations: Arc<AtomicU64>,

    // ── Transport ─────────────────────────────────────────────────────
    pub events: Arc<EventBus>,
    /// Read-only catalog served at `/api/catalog`.
    pub catalog: Arc<serde_json::Value>,

    // ── Security ──────────────────────────────────────────────────────
    /// SHA-256 of the operator token; `None` disables operator endpoints.
    pub operator_token_hash: Option<Vec<u8>>,
    pub shutdown_tx: Arc<tokio::sync::Notify>,
}
