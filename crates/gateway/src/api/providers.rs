//! Provider listing, health probe and catalog.

use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use ava_domain::provider::ProviderHealth;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_providers(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "providers": state.llm.list_providers() }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `ok` while some provider is healthy, `degraded` while every remaining
/// one is degraded, `unavailable` otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let providers = state.llm.list_providers();
    let status = if providers.iter().any(|p| p.health == ProviderHealth::Healthy) {
        "ok"
    } else if providers.iter().any(|p| p.health.is_selectable()) {
        "degraded"
    } else {
        "unavailable"
    };
    let summary: Vec<_> = providers
        .iter()
        .map(|p| json!({ "name": p.name, "health": p.health }))
        .collect();

    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "providers": summary,
        "sessions_active": state.sessions.list_sessions(true).len(),
        "pending_turns": state.pending.len(),
        "invariant_violations": state.invariant_violations.load(Ordering::Relaxed),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn catalog(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.catalog.as_ref().clone())
}
