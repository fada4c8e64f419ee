//! Eager validation of targets, rules and actions.

use std::collections::BTreeMap;
use std::time::Duration;

use watchpost::config::{Config, ConfigFormat};
use watchpost::credentials::Credentials;
use watchpost::registry::{ConfigError, Protocol, Registry};

fn credentials() -> Credentials {
    let mut vars = BTreeMap::new();
    vars.insert("BROKER_PASSWORD".to_owned(), "from-env".to_owned());
    Credentials::from_map(vars)
}

fn build(toml: &str) -> Result<Registry, ConfigError> {
    let config = match Config::parse(toml, ConfigFormat::Toml) {
        Ok(config) => config,
        Err(err) => panic!("fixture should parse: {err:#}"),
    };
    Registry::from_config(&config.targets, &credentials())
}

fn build_err(toml: &str) -> ConfigError {
    match build(toml) {
        Ok(registry) => panic!("expected a config error, got {registry:?}"),
        Err(err) => err,
    }
}

const VALID: &str = r#"
[[targets]]
description = "broker"
host = "localhost"
port = 15672
user = "guest"
password_env = "BROKER_PASSWORD"

[[targets.rules]]
id = "backlog"
request = { method = "get", path = "/api/queues?columns=messages" }
predicate = "body.messages > 1000"
cooldown_ms = 1500

[[targets.rules.actions]]
command = "logger"
args = ["backlog"]
timeout_secs = 5

[[targets]]
protocol = "HTTPS"
host = "api.example.com"
port = 443

[[targets.rules]]
id = "health"
request = { path = "/health" }
predicate = "!body.ok"
"#;

#[test]
fn builds_typed_registry() {
    let registry = build(VALID).expect("valid registry");
    assert_eq!(registry.targets().len(), 2);
    assert_eq!(registry.rule_count(), 2);

    let broker = &registry.targets()[0];
    assert_eq!(broker.label(), "broker");
    let auth = broker.auth.as_ref().expect("auth");
    assert_eq!(auth.user, "guest");
    assert_eq!(auth.password.as_deref(), Some("from-env"));

    let rule = &broker.rules[0];
    assert_eq!(rule.request.method, reqwest::Method::GET);
    assert_eq!(
        rule.request.url.as_str(),
        "http://localhost:15672/api/queues?columns=messages"
    );
    assert_eq!(rule.cooldown, Duration::from_millis(1500));
    assert_eq!(rule.actions[0].timeout, Some(Duration::from_secs(5)));
    assert_eq!(rule.predicate.source(), "body.messages > 1000");

    let api = &registry.targets()[1];
    assert_eq!(api.protocol, Protocol::Https);
    assert!(api.auth.is_none());
    assert_eq!(api.label(), "api.example.com:443");
}

#[test]
fn rules_iterate_in_declaration_order() {
    let registry = build(VALID).expect("valid registry");
    let ids: Vec<&str> = registry.rules().map(|(_, rule)| rule.id.as_str()).collect();
    assert_eq!(ids, vec!["backlog", "health"]);
}

#[test]
fn empty_target_list_is_rejected() {
    assert!(matches!(build_err(""), ConfigError::EmptyRegistry));
}

#[test]
fn default_registry_is_empty() {
    assert!(Registry::default().is_empty());
}

#[test]
fn rejects_bad_target_fields() {
    let unknown_protocol = "[[targets]]\nprotocol = \"ftp\"\nhost = \"h\"\nport = 1\n";
    assert!(matches!(
        build_err(unknown_protocol),
        ConfigError::InvalidTarget { ref reason, .. } if reason.contains("ftp")
    ));

    let empty_host = "[[targets]]\nhost = \" \"\nport = 1\n";
    assert!(matches!(build_err(empty_host), ConfigError::InvalidTarget { .. }));

    let zero_port = "[[targets]]\nhost = \"h\"\nport = 0\n";
    assert!(matches!(build_err(zero_port), ConfigError::InvalidTarget { .. }));
}

#[test]
fn rejects_duplicate_rule_ids_across_targets() {
    let toml = r#"
[[targets]]
host = "a"
port = 1
[[targets.rules]]
id = "same"
request = { path = "/" }
predicate = "true"

[[targets]]
host = "b"
port = 2
[[targets.rules]]
id = "same"
request = { path = "/" }
predicate = "true"
"#;
    assert!(matches!(build_err(toml), ConfigError::DuplicateRuleId(ref id) if id == "same"));
}

#[test]
fn rejects_bad_rule_fields() {
    let rule = |id: &str, method: &str, path: &str, predicate: &str| {
        format!(
            "[[targets]]\nhost = \"h\"\nport = 1\n[[targets.rules]]\nid = \"{id}\"\n\
             request = {{ method = \"{method}\", path = \"{path}\" }}\npredicate = \"{predicate}\"\n"
        )
    };

    assert!(matches!(
        build_err(&rule("", "GET", "/", "true")),
        ConfigError::InvalidRule { ref rule, .. } if rule == "targets[0].rules[0]"
    ));
    assert!(matches!(
        build_err(&rule("r", "FETCH", "/", "true")),
        ConfigError::InvalidRule { ref reason, .. } if reason.contains("method")
    ));
    assert!(matches!(
        build_err(&rule("r", "GET", "health", "true")),
        ConfigError::InvalidRule { ref reason, .. } if reason.contains("must start with")
    ));
    assert!(matches!(
        build_err(&rule("r", "GET", "/", "body.x >")),
        ConfigError::Predicate { ref rule, .. } if rule == "r"
    ));
}

#[test]
fn rejects_bad_actions() {
    let toml = r#"
[[targets]]
host = "h"
port = 1
[[targets.rules]]
id = "r"
request = { path = "/" }
predicate = "true"
[[targets.rules.actions]]
command = "true"
[[targets.rules.actions]]
command = "  "
"#;
    assert!(matches!(
        build_err(toml),
        ConfigError::InvalidAction { index: 1, .. }
    ));

    let zero_timeout = toml.replace("command = \"  \"", "command = \"x\"\ntimeout_secs = 0");
    assert!(matches!(
        build_err(&zero_timeout),
        ConfigError::InvalidAction { index: 1, .. }
    ));
}

#[test]
fn rejects_unresolved_credential() {
    let toml = "[[targets]]\nhost = \"h\"\nport = 1\nuser = \"u\"\npassword_env = \"NOT_DEFINED\"\n";
    assert!(matches!(
        build_err(toml),
        ConfigError::MissingCredential { ref variable, .. } if variable == "NOT_DEFINED"
    ));
}

#[test]
fn rejects_password_and_password_env_together() {
    let toml = "[[targets]]\nhost = \"h\"\nport = 1\nuser = \"u\"\npassword = \"p\"\npassword_env = \"BROKER_PASSWORD\"\n";
    assert!(matches!(build_err(toml), ConfigError::InvalidTarget { .. }));
}

#[test]
fn registry_debug_never_shows_passwords() {
    let registry = build(VALID).expect("valid registry");
    let debug = format!("{registry:?}");
    assert!(!debug.contains("from-env"));
}
