use ava_domain::config::{Config, ConfigError, ConfigSeverity};

/// Print every validation issue followed by the settings that most often
/// surprise operators. Returns false when any issue is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    let (errors, warnings): (Vec<&ConfigError>, Vec<&ConfigError>) = issues
        .iter()
        .partition(|i| i.severity == ConfigSeverity::Error);

    for issue in errors.iter().chain(warnings.iter()) {
        println!("{issue}");
    }

    let operator_token = std::env::var(&config.server.operator_token_env)
        .map(|t| !t.is_empty())
        .unwrap_or(false);
    println!("database:        {}", config.storage.database_path().display());
    println!("providers:       {}", config.llm.providers.len());
    println!(
        "operator token:  {} ({})",
        if operator_token { "set" } else { "unset" },
        config.server.operator_token_env
    );

    if issues.is_empty() {
        println!("Config OK ({config_path})");
    } else {
        println!(
            "\n{} error(s), {} warning(s) in {config_path}",
            errors.len(),
            warnings.len()
        );
    }
    errors.is_empty()
}

/// Render the resolved config as TOML.
pub fn show(config: &Config) -> anyhow::Result<String> {
    toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("serializing config: {e}"))
}
