use serde::{Deserialize, Serialize};

use crate::capability::CodeLanguage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capabilities (fetch / exec / probe / device)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Interpreters `code_exec` may launch. Session permissions still apply.
    #[serde(default = "d_languages")]
    pub code_exec_languages: Vec<CodeLanguage>,
    /// Cap on captured stdout/stderr and fetched bodies, in bytes.
    #[serde(default = "d_65536")]
    pub output_cap_bytes: usize,
    /// Upper bound accepted for any `timeout_ms` argument.
    #[serde(default = "d_30000")]
    pub max_timeout_ms: u64,
    #[serde(default = "d_user_agent")]
    pub http_user_agent: String,
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            code_exec_languages: d_languages(),
            output_cap_bytes: d_65536(),
            max_timeout_ms: d_30000(),
            http_user_agent: d_user_agent(),
            probe: ProbeConfig::default(),
        }
    }
}

/// Local network probe defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Ports tried when the request names none.
    #[serde(default = "d_ports")]
    pub default_ports: Vec<u16>,
    #[serde(default = "d_1000")]
    pub connect_timeout_ms: u64,
    /// Largest host count a single probe may cover.
    #[serde(default = "d_256")]
    pub max_hosts: usize,
    /// Connection attempts in flight at once.
    #[serde(default = "d_64")]
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            default_ports: d_ports(),
            connect_timeout_ms: d_1000(),
            max_hosts: d_256(),
            concurrency: d_64(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_languages() -> Vec<CodeLanguage> {
    vec![CodeLanguage::Python, CodeLanguage::Javascript, CodeLanguage::Bash]
}
fn d_65536() -> usize {
    64 * 1024
}
fn d_30000() -> u64 {
    30_000
}
fn d_user_agent() -> String {
    concat!("ava/", env!("CARGO_PKG_VERSION")).into()
}
fn d_ports() -> Vec<u16> {
    vec![80, 443, 8080, 5000, 3000, 8000, 22, 21, 23]
}
fn d_1000() -> u64 {
    1000
}
fn d_256() -> usize {
    256
}
fn d_64() -> usize {
    64
}
