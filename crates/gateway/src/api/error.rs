//! Typed error envelope and JSON body extraction.
//!
//! Every failure leaves the API as
//! `{"error": {"kind": "<TypedName>", "message": "...", "details": {...}?}}`.

use async_trait::async_trait;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use ava_domain::{Error, ErrorKind};

pub struct ApiError {
    kind: ErrorKind,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error.kind(), error.to_string())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument | ErrorKind::PermissionDenied => StatusCode::BAD_REQUEST,
        ErrorKind::SessionMissing => StatusCode::NOT_FOUND,
        ErrorKind::ConcurrentTurn => StatusCode::CONFLICT,
        ErrorKind::SessionExpired => StatusCode::GONE,
        ErrorKind::ProviderFailure | ErrorKind::ExternalFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::ProviderExhausted
        | ErrorKind::StoreUnavailable
        | ErrorKind::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::InvariantViolated | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        if status.is_server_error() {
            tracing::warn!(kind = %self.kind, error = %self.message, "request failed");
        }

        let mut body = json!({
            "kind": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (status, Json(json!({ "error": body }))).into_response()
    }
}

/// `Json<T>` whose rejection is an `InvalidArgument` envelope.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(Error::InvalidArgument(rejection.body_text()).into()),
        }
    }
}
