//! `POST /api/chat`: run one user turn and return the assistant reply.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::error::{ApiError, ApiJson};
use crate::runtime::{run_turn, TurnInput};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Existing session; a new one is opened when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
    /// Fail with `ConcurrentTurn` instead of waiting behind a running turn.
    #[serde(default)]
    pub non_queuable: bool,
}

pub async fn chat(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = run_turn(
        &state,
        TurnInput {
            session_id: body.session_id,
            message: body.message,
            non_queuable: body.non_queuable,
        },
    )
    .await?;
    Ok(Json(outcome))
}
