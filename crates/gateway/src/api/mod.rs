pub mod capability;
pub mod chat;
pub mod error;
pub mod events;
pub mod guard;
pub mod providers;
pub mod sessions;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Operator routes enforce their bearer token per handler through
/// [`guard::OperatorGuard`]; everything else is open.
pub fn router() -> Router<AppState> {
    Router::new()
        // Sessions
        .route("/api/session", post(sessions::open_session))
        .route("/api/session/:id", get(sessions::get_session))
        .route("/api/session/:id/expire", post(sessions::expire_session))
        .route("/api/session/:id/reopen", post(sessions::reopen_session))
        .route(
            "/api/session/:id/preferences",
            get(sessions::get_preferences).put(sessions::set_preference),
        )
        .route("/api/transcript", get(sessions::get_transcript))
        // Turns & capabilities
        .route("/api/chat", post(chat::chat))
        .route("/api/capability", post(capability::invoke))
        // Providers & metadata
        .route("/api/providers", get(providers::list_providers))
        .route("/api/health", get(providers::health))
        .route("/api/catalog", get(providers::catalog))
        // Broadcast
        .route("/api/events", get(events::events_ws))
        // Operator
        .route("/api/session/:id/permissions", post(sessions::set_permissions))
        .route("/api/session/:id/restore", post(sessions::restore_session))
}
