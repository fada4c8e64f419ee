//! Coverage for config parsing, defaults, and discovery.

use std::fs;

use watchpost::config::{
    discover_config, load_config, resolve_config_path, Config, ConfigFormat,
};

const TOML_CONFIG: &str = r#"
[schedule]
interval_ms = 5000

[[targets]]
description = "broker"
host = "localhost"
port = 15672
user = "guest"
password = "guest"

[[targets.rules]]
id = "queue-backlog"
request = { path = "/api/queues" }
predicate = "body.messages > 1000"
cooldown_ms = 600000

[[targets.rules.actions]]
description = "page on-call"
command = "notify-send"
args = ["backlog"]
timeout_secs = 30
"#;

fn parse(contents: &str, format: ConfigFormat) -> Config {
    match Config::parse(contents, format) {
        Ok(config) => config,
        Err(err) => panic!("config should parse: {err:#}"),
    }
}

#[test]
fn parse_toml_config() {
    let config = parse(TOML_CONFIG, ConfigFormat::Toml);
    assert_eq!(config.schedule.interval_ms, 5000);
    assert_eq!(config.targets.len(), 1);

    let target = &config.targets[0];
    assert_eq!(target.protocol, "http");
    assert_eq!(target.port, 15672);
    assert_eq!(target.password.as_deref(), Some("guest"));

    let rule = &target.rules[0];
    assert_eq!(rule.request.method, "GET");
    assert_eq!(rule.cooldown_ms, 600_000);
    assert_eq!(rule.actions[0].args, vec!["backlog".to_owned()]);
    assert_eq!(rule.actions[0].timeout_secs, Some(30));
}

#[test]
fn sections_default_when_omitted() {
    let config = parse("", ConfigFormat::Toml);
    assert_eq!(config.schedule.interval_ms, 60_000);
    assert_eq!(config.http.timeout_secs, 30);
    assert!(config.targets.is_empty());
}

#[test]
fn json_layout_accepts_legacy_keys() {
    let json = r#"{
        "servers": [{
            "description": "api",
            "protocol": "https",
            "host": "api.example.com",
            "port": 443,
            "rules": [{
                "id": "r1",
                "request": {"method": "post", "path": "/status"},
                "evaluator": "body.ok == false",
                "delay": 1500,
                "actions": [{"cmd": "logger", "args": ["down"]}]
            }]
        }]
    }"#;
    let config = parse(json, ConfigFormat::Json);
    let target = &config.targets[0];
    assert_eq!(target.protocol, "https");
    let rule = &target.rules[0];
    assert_eq!(rule.predicate, "body.ok == false");
    assert_eq!(rule.cooldown_ms, 1500);
    assert_eq!(rule.actions[0].command, "logger");
}

#[test]
fn rejects_tiny_interval() {
    let result = Config::parse("[schedule]\ninterval_ms = 10\n", ConfigFormat::Toml);
    assert!(result.is_err());
}

#[test]
fn rejects_out_of_range_http_timeout() {
    assert!(Config::parse("[http]\ntimeout_secs = 0\n", ConfigFormat::Toml).is_err());
    assert!(Config::parse("[http]\ntimeout_secs = 601\n", ConfigFormat::Toml).is_err());
}

#[test]
fn rejects_rule_without_predicate() {
    let toml = r#"
[[targets]]
host = "localhost"
port = 80

[[targets.rules]]
id = "r1"
request = { path = "/" }
"#;
    assert!(Config::parse(toml, ConfigFormat::Toml).is_err());
}

#[test]
fn load_config_picks_format_from_extension() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"schedule": {"interval_ms": 250}}"#).expect("write config");

    let loaded = load_config(&path);
    assert!(loaded.is_ok());
    let config = match loaded {
        Ok(config) => config,
        Err(err) => panic!("json config should load: {err:#}"),
    };
    assert_eq!(config.schedule.interval_ms, 250);
}

#[test]
fn load_config_reports_path_on_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    fs::write(&path, "[schedule\n").expect("write config");

    let err = match load_config(&path) {
        Ok(_) => panic!("malformed TOML should fail"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("config.toml"));
}

#[test]
fn discovery_prefers_toml_over_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("config.json"), "{}").expect("write json");
    fs::write(dir.path().join("config.toml"), "").expect("write toml");

    let found = discover_config(dir.path()).expect("discover");
    assert!(found.ends_with("config.toml"));
}

#[test]
fn discovery_falls_back_to_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("config.json"), "{}").expect("write json");

    let found = discover_config(dir.path()).expect("discover");
    assert!(found.ends_with("config.json"));
}

#[test]
fn discovery_error_lists_searched_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = match discover_config(dir.path()) {
        Ok(path) => panic!("nothing to discover, found {}", path.display()),
        Err(err) => err.to_string(),
    };
    assert!(err.contains("config.toml"));
    assert!(err.contains("config.json"));
}

#[test]
fn explicit_missing_path_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    assert!(resolve_config_path(Some(&missing)).is_err());
}
