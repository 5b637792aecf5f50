mod llm;
mod observability;
mod server;
mod sessions;
mod tools;

pub use llm::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::capability::CodeLanguage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Applies `AVA_*` overrides on top of the file values.
    ///
    /// `lookup` is normally `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AVA_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("AVA_IDLE_TIMEOUT_MINUTES") {
            self.sessions.idle_timeout_minutes = parse_env("AVA_IDLE_TIMEOUT_MINUTES", &v)?;
        }
        if let Some(v) = get("AVA_PURGE_GRACE_HOURS") {
            self.sessions.purge_grace_hours = parse_env("AVA_PURGE_GRACE_HOURS", &v)?;
        }
        if let Some(v) = get("AVA_BROADCAST_QUEUE_DEPTH") {
            self.broadcast.queue_depth = parse_env("AVA_BROADCAST_QUEUE_DEPTH", &v)?;
        }
        if let Some(v) = get("AVA_CODE_EXEC_LANGUAGES") {
            let mut langs = Vec::new();
            for part in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let lang = CodeLanguage::parse(part).ok_or_else(|| {
                    crate::Error::Config(format!(
                        "AVA_CODE_EXEC_LANGUAGES: unknown language {part:?}"
                    ))
                })?;
                if !langs.contains(&lang) {
                    langs.push(lang);
                }
            }
            self.tools.code_exec_languages = langs;
        }
        if let Some(v) = get("AVA_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("AVA_PORT") {
            self.server.port = parse_env("AVA_PORT", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("{key}: cannot parse {value:?}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: String, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field,
                message: message.into(),
            })
        };

        if self.server.port == 0 {
            error("server.port".into(), "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host".into(), "host must not be empty");
        }
        if self.server.max_concurrent_requests == 0 {
            error(
                "server.max_concurrent_requests".into(),
                "must allow at least one request",
            );
        }
        if self.sessions.idle_timeout_minutes == 0 {
            error(
                "sessions.idle_timeout_minutes".into(),
                "idle timeout must be greater than 0",
            );
        }
        if self.sessions.sweep_interval_secs == 0 {
            error(
                "sessions.sweep_interval_secs".into(),
                "sweep interval must be greater than 0",
            );
        }
        if self.sessions.turn_budget_ms == 0 {
            error("sessions.turn_budget_ms".into(), "turn budget must be greater than 0");
        }
        if self.sessions.context_turns == 0 {
            error("sessions.context_turns".into(), "must keep at least one turn");
        }
        if self.broadcast.queue_depth == 0 {
            error("broadcast.queue_depth".into(), "queue depth must be greater than 0");
        }
        if self.tools.max_timeout_ms > crate::capability::MAX_TIMEOUT_MS {
            error(
                "tools.max_timeout_ms".into(),
                "must not exceed 30000 ms",
            );
        }
        if self.tools.probe.max_hosts > 256 {
            error("tools.probe.max_hosts".into(), "must not exceed 256 hosts");
        }
        if self.llm.health.degraded_failures == 0
            || self.llm.health.unavailable_failures < self.llm.health.degraded_failures
        {
            error(
                "llm.health".into(),
                "unavailable_failures must be >= degraded_failures >= 1",
            );
        }

        let mut seen = HashSet::new();
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.name.is_empty() {
                error(
                    format!("llm.providers[{i}].name"),
                    "provider name must not be empty",
                );
            } else if !seen.insert(provider.name.as_str()) {
                error(
                    format!("llm.providers[{i}].name"),
                    "provider name must be unique",
                );
            }
            if provider.kind.needs_base_url() && provider.base_url.is_empty() {
                error(
                    format!("llm.providers[{i}].base_url"),
                    "provider base_url must not be empty",
                );
            }
        }

        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured; only canned replies are available".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env(&[
            ("AVA_DATA_DIR", "/var/lib/ava"),
            ("AVA_IDLE_TIMEOUT_MINUTES", "5"),
            ("AVA_PURGE_GRACE_HOURS", "1"),
            ("AVA_BROADCAST_QUEUE_DEPTH", "16"),
            ("AVA_CODE_EXEC_LANGUAGES", "python, bash,python"),
            ("AVA_PORT", "9000"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage.data_dir, PathBuf::from("/var/lib/ava"));
        assert_eq!(cfg.sessions.idle_timeout_minutes, 5);
        assert_eq!(cfg.sessions.purge_grace_hours, 1);
        assert_eq!(cfg.broadcast.queue_depth, 16);
        assert_eq!(
            cfg.tools.code_exec_languages,
            vec![CodeLanguage::Python, CodeLanguage::Bash]
        );
        assert_eq!(cfg.server.port, 9000);
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        let mut cfg = Config::default();
        assert!(cfg
            .apply_env_overrides(env(&[("AVA_PORT", "eighty")]))
            .is_err());
        assert!(cfg
            .apply_env_overrides(env(&[("AVA_CODE_EXEC_LANGUAGES", "python,ruby")]))
            .is_err());
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(env(&[("AVA_HOST", "  ")])).unwrap();
        assert_eq!(cfg.server.host, "127.0.0.1");
    }

    #[test]
    fn validate_flags_duplicate_and_incomplete_providers() {
        let toml_str = r#"
            [[llm.providers]]
            name = "a"
            kind = "openai_compat"

            [[llm.providers]]
            name = "a"
            kind = "canned"
        "#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        let issues = cfg.validate();
        let fields: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .map(|e| e.field.as_str())
            .collect();
        assert!(fields.contains(&"llm.providers[0].base_url"));
        assert!(fields.contains(&"llm.providers[1].name"));
    }

    #[test]
    fn default_config_has_only_warnings() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .all(|e| e.severity == ConfigSeverity::Warning));
    }
}
