use wg_domain::config::{Config, ConfigSeverity, PairingMode};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 8000);
}

#[test]
fn default_cors_allows_only_localhost() {
    let config = Config::default();
    assert!(config.server.cors.allowed_origins.contains(&"http://localhost:*".to_string()));
    assert!(config.server.cors.allowed_origins.contains(&"http://127.0.0.1:*".to_string()));
}

#[test]
fn default_paths_match_legacy_layout() {
    let config = Config::default();
    assert_eq!(config.sessions.session_root.to_str(), Some("./session"));
    assert_eq!(config.sessions.qr_root.to_str(), Some("./qr_codes"));
    assert_eq!(config.directory.numbers_path.to_str(), Some("./numbers.json"));
    assert_eq!(config.directory.admins_path.to_str(), Some("./admin.json"));
}

#[test]
fn full_file_parses() {
    let toml_str = r#"
[server]
host = "0.0.0.0"
port = 9000

[sessions]
session_root = "/var/lib/wagate/session"
pairing_mode = "code"
qr_ttl_secs = 120

[sessions.reconnect]
initial_delay_ms = 1000
max_delay_ms = 30000
backoff_factor = 2.0
max_attempts = 20

[directory]
owner_number = "+94 75 297 8237"

[engine]
bridge_url = "ws://engine:8790"

[bot]
prefix = "!"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.sessions.pairing_mode, PairingMode::Code);
    assert_eq!(config.sessions.qr_ttl_secs, 120);
    assert_eq!(config.sessions.reconnect.max_attempts, 20);
    assert_eq!(config.engine.bridge_url, "ws://engine:8790");
    assert_eq!(config.bot.prefix, "!");
    assert!(config
        .validate()
        .iter()
        .all(|i| i.severity != ConfigSeverity::Error));
}

#[test]
fn default_config_has_no_errors() {
    let issues = Config::default().validate();
    assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
    // Unbounded fixed-delay reconnect is flagged.
    assert!(issues.iter().any(|i| i.field == "sessions.reconnect"));
}

#[test]
fn bad_bridge_url_is_an_error() {
    let toml_str = r#"
[engine]
bridge_url = "http://engine:8790"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "engine.bridge_url" && i.severity == ConfigSeverity::Error));
}

#[test]
fn zero_min_identity_len_is_an_error() {
    let toml_str = r#"
[sessions]
min_identity_len = 0
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|i| i.field == "sessions.min_identity_len"));
}
