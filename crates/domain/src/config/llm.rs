use serde::{Deserialize, Serialize};

use crate::provider::ProviderCapabilities;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered providers (adding a provider = adding config).
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Interval of the background probe that retries unavailable providers.
    #[serde(default = "d_60")]
    pub probe_interval_secs: u64,
    #[serde(default)]
    pub health: HealthThresholds,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            probe_interval_secs: d_60(),
            health: HealthThresholds::default(),
        }
    }
}

/// Failure-burst thresholds driving provider health transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "d_3")]
    pub degraded_failures: u32,
    #[serde(default = "d_60")]
    pub degraded_window_secs: u64,
    #[serde(default = "d_8")]
    pub unavailable_failures: u32,
    #[serde(default = "d_300")]
    pub unavailable_window_secs: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_failures: d_3(),
            degraded_window_secs: d_60(),
            unavailable_failures: d_8(),
            unavailable_window_secs: d_300(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    /// Lower is preferred.
    #[serde(default = "d_100")]
    pub priority: i32,
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
    #[serde(default)]
    pub auth: AuthConfig,
    /// Per-request HTTP timeout; the turn deadline still applies on top.
    #[serde(default = "d_20000u")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Offline stock replies keyed by intent; needs no credentials.
    Canned,
    OpenaiCompat,
    Anthropic,
}

impl ProviderKind {
    pub fn needs_base_url(self) -> bool {
        !matches!(self, Self::Canned)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key (e.g. `OPENAI_API_KEY`).
    #[serde(default)]
    pub env: Option<String>,
    /// Header name (e.g. "Authorization", "x-api-key").
    #[serde(default)]
    pub header: Option<String>,
    /// Header value prefix (e.g. "Bearer ").
    #[serde(default)]
    pub prefix: Option<String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_8() -> u32 {
    8
}
fn d_60() -> u64 {
    60
}
fn d_100() -> i32 {
    100
}
fn d_300() -> u64 {
    300
}
fn d_20000u() -> u64 {
    20_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_parses_with_partial_capabilities() {
        let toml_str = r#"
            [[providers]]
            name = "primary"
            kind = "openai_compat"
            base_url = "https://api.openai.com/v1"
            model = "gpt-4o-mini"
            priority = 1
            auth = { env = "OPENAI_API_KEY" }
            capabilities = { supports_long_context = true }
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        let p = &cfg.providers[0];
        assert_eq!(p.kind, ProviderKind::OpenaiCompat);
        assert_eq!(p.priority, 1);
        assert!(p.capabilities.supports_chat);
        assert!(p.capabilities.supports_long_context);
        assert_eq!(p.auth.env.as_deref(), Some("OPENAI_API_KEY"));
        assert_eq!(p.timeout_ms, 20_000);
    }

    #[test]
    fn health_thresholds_default() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.probe_interval_secs, 60);
        assert_eq!(cfg.health.degraded_failures, 3);
        assert_eq!(cfg.health.degraded_window_secs, 60);
        assert_eq!(cfg.health.unavailable_failures, 8);
        assert_eq!(cfg.health.unavailable_window_secs, 300);
    }

    #[test]
    fn canned_needs_no_base_url() {
        assert!(!ProviderKind::Canned.needs_base_url());
        assert!(ProviderKind::Anthropic.needs_base_url());
    }
}
