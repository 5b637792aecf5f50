//! `POST /api/capability`: execute a capability on behalf of a session.
//!
//! A failed execution is still recorded: the response is the error
//! envelope of the failure, with the result and its turn index in
//! `details`.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use ava_domain::capability::CapabilityRequest;

use crate::api::error::{ApiError, ApiJson};
use crate::runtime::run_capability;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CapabilityCall {
    pub session_id: String,
    pub kind: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

pub async fn invoke(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CapabilityCall>,
) -> Result<impl IntoResponse, ApiError> {
    let arguments = if body.arguments.is_null() {
        json!({})
    } else {
        body.arguments
    };
    let req = CapabilityRequest::from_parts(&body.kind, arguments)?;
    let run = run_capability(&state, &body.session_id, req).await?;

    if let Some(failure) = &run.result.error {
        let details = json!({ "result": run.result, "turn_index": run.turn_index });
        return Err(ApiError::new(failure.kind, failure.message.clone()).with_details(details));
    }

    Ok(Json(json!({
        "session_id": body.session_id,
        "result": run.result,
        "turn_index": run.turn_index,
    })))
}
