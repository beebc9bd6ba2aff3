use wg_domain::config::{Config, ConfigSeverity};

/// Print every validation issue.  Returns `false` when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!(
        "\n{} error(s), {} warning(s) in {config_path}",
        error_count, warning_count,
    );

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(output) => print!("{output}"),
        Err(e) => eprintln!("Failed to serialize config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_and_serialize() {
        let config = Config::default();
        assert!(validate(&config, "config.toml"));
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("[sessions]"));
        assert!(rendered.contains("[bot]"));
    }

    #[test]
    fn zero_reply_timeout_fails_validation() {
        let mut config = Config::default();
        config.sessions.reply_timeout_secs = 0;
        assert!(!validate(&config, "config.toml"));
    }
}
