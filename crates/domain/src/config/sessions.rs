use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the session database. Created on startup.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// Default number of trailing turns returned by a transcript load.
    #[serde(default = "d_200")]
    pub transcript_soft_cap: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            transcript_soft_cap: d_200(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("ava.db")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle & turn policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Minutes without activity before a session is expired.
    #[serde(default = "d_30")]
    pub idle_timeout_minutes: u64,
    /// Hours an expired session is kept before it is physically removed.
    #[serde(default = "d_24")]
    pub purge_grace_hours: u64,
    /// Interval between idle sweeps.
    #[serde(default = "d_300")]
    pub sweep_interval_secs: u64,
    /// Maximum number of turns waiting behind the in-flight one.
    #[serde(default = "d_4")]
    pub queue_depth: usize,
    /// Trailing turns considered when building model context.
    #[serde(default = "d_20")]
    pub context_turns: usize,
    /// Approximate token budget for the model context (4 chars per token).
    #[serde(default = "d_4000")]
    pub context_token_budget: usize,
    /// Total wall-clock budget for one turn.
    #[serde(default = "d_30000")]
    pub turn_budget_ms: u64,
    /// Output tokens requested from the provider per turn.
    #[serde(default = "d_1024")]
    pub max_output_tokens: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: d_30(),
            purge_grace_hours: d_24(),
            sweep_interval_secs: d_300(),
            queue_depth: d_4(),
            context_turns: d_20(),
            context_token_budget: d_4000(),
            turn_budget_ms: d_30000(),
            max_output_tokens: d_1024(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcast & catalog
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Pending events kept per subscriber before the oldest are dropped.
    #[serde(default = "d_256")]
    pub queue_depth: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_depth: d_256(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// JSON document served read-only at `/api/catalog`. The built-in
    /// catalog is used when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn d_200() -> usize {
    200
}
fn d_30() -> u64 {
    30
}
fn d_24() -> u64 {
    24
}
fn d_300() -> u64 {
    300
}
fn d_4() -> usize {
    4
}
fn d_20() -> usize {
    20
}
fn d_4000() -> usize {
    4000
}
fn d_30000() -> u64 {
    30_000
}
fn d_1024() -> u32 {
    1024
}
fn d_256() -> usize {
    256
}
