//! Operator auth guard: `OperatorGuard` Axum extractor.
//!
//! Handlers that widen permissions or clear a degraded session opt in by
//! adding `_guard: OperatorGuard` to their parameter list.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use ava_domain::Error;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Axum extractor that enforces the operator bearer token.
///
/// Uses SHA-256 + constant-time comparison so the token length does not
/// leak. With no token configured every operator request is refused.
pub struct OperatorGuard;

#[async_trait]
impl FromRequestParts<AppState> for OperatorGuard {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = &state.operator_token_hash else {
            return Err(Error::PermissionDenied("operator endpoints are disabled".into()).into());
        };

        let provided = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        let provided_hash = Sha256::digest(provided.as_bytes());

        if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
            return Err(Error::PermissionDenied("invalid operator token".into()).into());
        }
        Ok(OperatorGuard)
    }
}
