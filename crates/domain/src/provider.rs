use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health of a provider as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderHealth {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

impl ProviderHealth {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        }
    }

    /// Healthy and degraded providers are still eligible for selection.
    pub fn is_selectable(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Capability vector every provider advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCapabilities {
    pub supports_chat: bool,
    pub supports_long_context: bool,
    pub max_output_tokens: u32,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            supports_chat: true,
            supports_long_context: false,
            max_output_tokens: 1024,
        }
    }
}

impl ProviderCapabilities {
    /// Whether this provider can serve a request asking for
    /// `max_output_tokens` with a context that may need `long_context`.
    pub fn satisfies(&self, max_output_tokens: u32, long_context: bool) -> bool {
        self.supports_chat
            && self.max_output_tokens >= max_output_tokens
            && (!long_context || self.supports_long_context)
    }
}

/// Snapshot of one configured provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub model: String,
    pub capabilities: ProviderCapabilities,
    pub priority: i32,
    pub health: ProviderHealth,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

/// A health transition produced by the registry; the orchestrator decides
/// whether to publish it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChange {
    pub provider: String,
    pub from: ProviderHealth,
    pub to: ProviderHealth,
}
