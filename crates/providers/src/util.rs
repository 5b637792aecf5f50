//! Shared utility functions for provider adapters.

use ava_domain::config::AuthConfig;
use ava_domain::error::{Error, ProviderFailureKind, Result};

/// Convert a [`reqwest::Error`] into a network-class provider failure.
pub(crate) fn from_reqwest(provider: &str) -> impl Fn(reqwest::Error) -> Error + '_ {
    move |e| {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else {
            e.to_string()
        };
        Error::provider(provider, ProviderFailureKind::Network, message)
    }
}

/// Classify a non-success HTTP status. 429 is a rate limit; everything
/// else (5xx, auth failures, bad requests) counts as a network failure.
pub(crate) fn status_error(provider: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let kind = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ProviderFailureKind::RateLimit
    } else {
        ProviderFailureKind::Network
    };
    Error::provider(provider, kind, format!("HTTP {} - {}", status.as_u16(), truncate(body, 512)))
}

pub(crate) fn malformed(provider: &str, message: impl Into<String>) -> Error {
    Error::provider(provider, ProviderFailureKind::Malformed, message)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Resolve the API key named by an [`AuthConfig`].
///
/// Keys are only ever read from the environment. `Ok(None)` means the
/// provider is configured without auth (e.g. a local Ollama endpoint).
pub fn resolve_api_key(auth: &AuthConfig) -> Result<Option<String>> {
    match auth.env {
        Some(ref env_var) => std::env::var(env_var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Some)
            .ok_or_else(|| {
                Error::Config(format!(
                    "environment variable '{env_var}' not set or not valid UTF-8"
                ))
            }),
        None => Ok(None),
    }
}
