//! Session endpoints.
//!
//! - `POST /api/session`                       : open (or resume) a session
//! - `GET  /api/session/:id`                   : session record
//! - `POST /api/session/:id/expire`            : close it now
//! - `POST /api/session/:id/reopen`            : reactivate an expired session
//! - `GET  /api/session/:id/preferences`       : all preferences
//! - `PUT  /api/session/:id/preferences`       : set one preference
//! - `POST /api/session/:id/permissions`       : change permissions (operator)
//! - `POST /api/session/:id/restore`           : clear the degraded flag (operator)
//! - `GET  /api/transcript`                    : transcript window

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use ava_domain::session::PermissionPatch;
use ava_domain::Error;
use ava_sessions::new_session_id;

use crate::api::error::{ApiError, ApiJson};
use crate::api::guard::OperatorGuard;
use crate::events::EventEnvelope;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct OpenSessionRequest {
    #[serde(default)]
    pub owner_tag: Option<String>,
    /// Resume or create this id instead of minting one.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    pub session_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Page backwards: only turns with a smaller index.
    #[serde(default)]
    pub before: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceRequest {
    pub key: String,
    pub value: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn open_session(
    State(state): State<AppState>,
    body: Option<ApiJson<OpenSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = body.map(|ApiJson(b)| b).unwrap_or_default();
    let id = body.session_id.unwrap_or_else(new_session_id);
    let owner = body.owner_tag.unwrap_or_default();

    let (session, created) = state.sessions.open_session(&id, &owner).await?;
    Ok(Json(json!({
        "session_id": session.id,
        "created": created,
        "active": session.active,
    })))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get_session(&id).await?;
    Ok(Json(session))
}

pub async fn expire_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    crate::runtime::expire_session(&state, &id).await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn reopen_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.reopen_session(&id).await?;
    tracing::info!(session_id = %id, "session reopened");
    Ok(Json(json!({ "ok": true, "active": session.active })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_transcript(
    State(state): State<AppState>,
    query: Result<Query<TranscriptQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(q) = query.map_err(|e| Error::InvalidArgument(e.body_text()))?;
    let turns = match q.before {
        Some(before) => {
            let limit = q.limit.unwrap_or_else(|| state.sessions.soft_cap());
            state.sessions.load_older(&q.session_id, before, limit).await?
        }
        None => state.sessions.load_transcript(&q.session_id, q.limit).await?,
    };
    Ok(Json(json!({ "session_id": q.session_id, "turns": turns })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preferences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_preferences(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.get_session(&id).await?;
    let preferences = state.sessions.get_preferences(&id).await?;
    Ok(Json(json!({ "preferences": preferences })))
}

pub async fn set_preference(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<SetPreferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.sessions.get_session(&id).await?;
    state
        .sessions
        .set_preference(&id, &body.key, body.value)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn set_permissions(
    _guard: OperatorGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(patch): ApiJson<PermissionPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let mut permissions = state.sessions.get_session(&id).await?.permissions;
    permissions.apply(&patch);
    let session = state.sessions.set_permissions(&id, permissions).await?;
    tracing::info!(session_id = %id, permissions = ?session.permissions, "permissions changed");
    Ok(Json(json!({ "permissions": session.permissions })))
}

pub async fn restore_session(
    _guard: OperatorGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.set_degraded(&id, false).await?;
    state
        .events
        .publish(EventEnvelope::status_changed(&id, "idle"));
    tracing::info!(session_id = %id, "degraded session restored");
    Ok(Json(json!({ "ok": true, "degraded": session.degraded })))
}
