use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared error type used across all Ava crates.
///
/// One variant per taxonomy entry; the transport layer is the only place
/// that turns these into HTTP status codes (via [`Error::kind`]).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session not found: {0}")]
    SessionMissing(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("a turn is already in flight for session {0}")]
    ConcurrentTurn(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("provider {provider} ({kind}): {message}")]
    Provider {
        provider: String,
        kind: ProviderFailureKind,
        message: String,
    },

    #[error("no provider available: {0}")]
    ProviderExhausted(String),

    #[error("external failure: {0}")]
    ExternalFailure(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable, serializable name of an [`Error`] variant.
///
/// The serialized form is the `error.kind` string of the HTTP envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    PermissionDenied,
    SessionMissing,
    SessionExpired,
    ConcurrentTurn,
    Timeout,
    StoreUnavailable,
    ResourceExhausted,
    ProviderFailure,
    ProviderExhausted,
    ExternalFailure,
    InvariantViolated,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::PermissionDenied => "PermissionDenied",
            Self::SessionMissing => "SessionMissing",
            Self::SessionExpired => "SessionExpired",
            Self::ConcurrentTurn => "ConcurrentTurn",
            Self::Timeout => "Timeout",
            Self::StoreUnavailable => "StoreUnavailable",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::ProviderFailure => "ProviderFailure",
            Self::ProviderExhausted => "ProviderExhausted",
            Self::ExternalFailure => "ExternalFailure",
            Self::InvariantViolated => "InvariantViolated",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subtype of a provider failure. All three are consumed by the failover loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFailureKind {
    Network,
    RateLimit,
    Malformed,
}

impl fmt::Display for ProviderFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Malformed => "malformed",
        })
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::SessionMissing(_) => ErrorKind::SessionMissing,
            Self::SessionExpired(_) => ErrorKind::SessionExpired,
            Self::ConcurrentTurn(_) => ErrorKind::ConcurrentTurn,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Provider { .. } => ErrorKind::ProviderFailure,
            Self::ProviderExhausted(_) => ErrorKind::ProviderExhausted,
            Self::ExternalFailure(_) => ErrorKind::ExternalFailure,
            Self::InvariantViolated(_) => ErrorKind::InvariantViolated,
            Self::Io(_) | Self::Json(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Resource errors are retried once by the component that raised them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::ResourceExhausted(_))
    }

    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderFailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }
}
