use ava_domain::capability::CodeLanguage;
use ava_domain::config::{Config, ProviderKind};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn default_session_policy() {
    let config = Config::default();
    assert_eq!(config.sessions.idle_timeout_minutes, 30);
    assert_eq!(config.sessions.purge_grace_hours, 24);
    assert_eq!(config.sessions.sweep_interval_secs, 300);
    assert_eq!(config.sessions.queue_depth, 4);
    assert_eq!(config.sessions.context_turns, 20);
    assert_eq!(config.sessions.turn_budget_ms, 30_000);
    assert_eq!(config.storage.transcript_soft_cap, 200);
    assert_eq!(config.broadcast.queue_depth, 256);
}

#[test]
fn default_tool_bounds() {
    let config = Config::default();
    assert_eq!(config.tools.output_cap_bytes, 65_536);
    assert_eq!(config.tools.max_timeout_ms, 30_000);
    assert_eq!(config.tools.probe.connect_timeout_ms, 1000);
    assert_eq!(
        config.tools.probe.default_ports,
        vec![80, 443, 8080, 5000, 3000, 8000, 22, 21, 23]
    );
    assert_eq!(config.tools.code_exec_languages.len(), 3);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://localhost:*".to_string()));
    assert!(config
        .server
        .cors
        .allowed_origins
        .contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 8088

[storage]
data_dir = "/tmp/ava"

[sessions]
idle_timeout_minutes = 10

[tools]
code_exec_languages = ["python"]

[[llm.providers]]
name = "offline"
kind = "canned"
priority = 50

[[llm.providers]]
name = "claude"
kind = "anthropic"
base_url = "https://api.anthropic.com"
model = "claude-3-5-haiku-latest"
priority = 1
auth = { env = "ANTHROPIC_API_KEY" }

[catalog]
path = "catalog.json"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 8088);
    assert_eq!(config.sessions.idle_timeout_minutes, 10);
    assert_eq!(config.sessions.purge_grace_hours, 24);
    assert_eq!(config.tools.code_exec_languages, vec![CodeLanguage::Python]);
    assert_eq!(config.llm.providers.len(), 2);
    assert_eq!(config.llm.providers[1].kind, ProviderKind::Anthropic);
    assert!(config.catalog.path.is_some());
    assert!(config.validate().is_empty());
}

#[test]
fn operator_token_env_default() {
    let config = Config::default();
    assert_eq!(config.server.operator_token_env, "AVA_OPERATOR_TOKEN");
}
