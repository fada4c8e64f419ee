//! Validated, immutable registry of targets and rules.
//!
//! [`Registry::from_config`] is the single place where raw config records
//! become typed values: URLs are parsed, methods checked, predicates
//! compiled and credentials resolved. After that nothing in a cycle can
//! fail because of a malformed definition.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use reqwest::Method;
use thiserror::Error;
use url::Url;

use crate::config::{ActionConfig, RuleConfig, TargetConfig};
use crate::credentials::Credentials;
use crate::predicate::{Predicate, PredicateError};

/// Methods a rule may use.
const ALLOWED_METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"];

/// Registry construction errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No targets are configured.
    #[error("registry is empty: no targets configured")]
    EmptyRegistry,

    /// A target record is malformed.
    #[error("target {target}: {reason}")]
    InvalidTarget {
        /// Target label, e.g. `targets[0] (broker)`.
        target: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A rule record is malformed.
    #[error("rule {rule}: {reason}")]
    InvalidRule {
        /// Rule id, or its position when the id is missing.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two rules share an id.
    #[error("duplicate rule id `{0}`")]
    DuplicateRuleId(String),

    /// A rule's predicate does not compile.
    #[error("rule {rule}: predicate does not compile: {source}")]
    Predicate {
        /// Rule id.
        rule: String,
        /// Compilation error.
        #[source]
        source: PredicateError,
    },

    /// An action record is malformed.
    #[error("rule {rule}: action {index}: {reason}")]
    InvalidAction {
        /// Rule id.
        rule: String,
        /// Zero-based position in the action list.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// A `password_env` credential is not defined anywhere.
    #[error("target {target}: credential `{variable}` is not set")]
    MissingCredential {
        /// Target label.
        target: String,
        /// The credential name that failed to resolve.
        variable: String,
    },
}

/// URL scheme of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    /// URL scheme string.
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// HTTP basic-auth credentials. The password never appears in `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name.
    pub user: String,
    /// Password, if any.
    pub password: Option<String>,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone)]
pub struct Target {
    /// Human-readable label.
    pub description: String,
    /// URL scheme.
    pub protocol: Protocol,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Basic auth, when a user is configured.
    pub auth: Option<BasicAuth>,
    /// Rules in declaration order.
    pub rules: Vec<Rule>,
}

impl Target {
    /// Label used in logs: the description, or `host:port` when it is empty.
    pub fn label(&self) -> String {
        if self.description.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.description.clone()
        }
    }
}

/// HTTP method, path and the full URL derived from the target.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Path as configured, including any query string.
    pub path: String,
    /// `{protocol}://{host}:{port}{path}`.
    pub url: Url,
}

/// A condition checked against a target.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Registry-wide unique id.
    pub id: String,
    /// Human-readable label.
    pub description: String,
    /// Request to perform.
    pub request: RequestSpec,
    /// Compiled predicate.
    pub predicate: Predicate,
    /// Suppression window after firing.
    pub cooldown: Duration,
    /// Commands to run when the rule fires.
    pub actions: Vec<Action>,
}

/// A command run when a rule fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Human-readable label.
    pub description: String,
    /// Executable name or path.
    pub command: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Optional wall-clock limit.
    pub timeout: Option<Duration>,
}

impl Action {
    /// Label used in logs: the description, or the command when it is empty.
    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.command
        } else {
            &self.description
        }
    }
}

/// Ordered, validated collection of targets.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    targets: Vec<Target>,
}

impl Registry {
    /// Validate raw target records into a registry.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, in declaration order.
    pub fn from_config(
        targets: &[TargetConfig],
        credentials: &Credentials,
    ) -> Result<Self, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let mut seen_ids = HashSet::new();
        let mut built = Vec::with_capacity(targets.len());
        for (index, raw) in targets.iter().enumerate() {
            let target = build_target(index, raw, credentials, &mut seen_ids)?;
            built.push(target);
        }
        Ok(Self { targets: built })
    }

    /// Targets in declaration order.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Whether no targets are registered.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Total number of rules across all targets.
    pub fn rule_count(&self) -> usize {
        self.targets.iter().map(|t| t.rules.len()).sum()
    }

    /// Every `(target, rule)` pair in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = (&Target, &Rule)> {
        self.targets
            .iter()
            .flat_map(|target| target.rules.iter().map(move |rule| (target, rule)))
    }
}

fn target_label(index: usize, raw: &TargetConfig) -> String {
    if raw.description.is_empty() {
        format!("targets[{index}]")
    } else {
        format!("targets[{index}] ({})", raw.description)
    }
}

fn build_target(
    index: usize,
    raw: &TargetConfig,
    credentials: &Credentials,
    seen_ids: &mut HashSet<String>,
) -> Result<Target, ConfigError> {
    let label = target_label(index, raw);
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        target: label.clone(),
        reason: reason.to_owned(),
    };

    let protocol = Protocol::parse(&raw.protocol).ok_or_else(|| {
        invalid(&format!(
            "unknown protocol `{}` (expected http or https)",
            raw.protocol
        ))
    })?;
    let host = raw.host.trim();
    if host.is_empty() {
        return Err(invalid("host must not be empty"));
    }
    if raw.port == 0 {
        return Err(invalid("port must be in [1, 65535]"));
    }

    let auth = resolve_auth(&label, raw, credentials)?;

    let mut rules = Vec::with_capacity(raw.rules.len());
    for (rule_index, rule) in raw.rules.iter().enumerate() {
        let rule = build_rule(index, rule_index, rule, protocol, host, raw.port)?;
        if !seen_ids.insert(rule.id.clone()) {
            return Err(ConfigError::DuplicateRuleId(rule.id));
        }
        rules.push(rule);
    }

    Ok(Target {
        description: raw.description.clone(),
        protocol,
        host: host.to_owned(),
        port: raw.port,
        auth,
        rules,
    })
}

fn resolve_auth(
    label: &str,
    raw: &TargetConfig,
    credentials: &Credentials,
) -> Result<Option<BasicAuth>, ConfigError> {
    let password = match (&raw.password, &raw.password_env) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::InvalidTarget {
                target: label.to_owned(),
                reason: "set either password or password_env, not both".to_owned(),
            })
        }
        (Some(password), None) => Some(password.clone()),
        (None, Some(variable)) => Some(credentials.get(variable).ok_or_else(|| {
            ConfigError::MissingCredential {
                target: label.to_owned(),
                variable: variable.clone(),
            }
        })?),
        (None, None) => None,
    };

    if raw.user.is_empty() {
        return Ok(None);
    }
    Ok(Some(BasicAuth {
        user: raw.user.clone(),
        password,
    }))
}

fn build_rule(
    target_index: usize,
    rule_index: usize,
    raw: &RuleConfig,
    protocol: Protocol,
    host: &str,
    port: u16,
) -> Result<Rule, ConfigError> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(ConfigError::InvalidRule {
            rule: format!("targets[{target_index}].rules[{rule_index}]"),
            reason: "id must not be empty".to_owned(),
        });
    }
    let invalid = |reason: String| ConfigError::InvalidRule {
        rule: id.to_owned(),
        reason,
    };

    let method_name = raw.request.method.trim().to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&method_name.as_str()) {
        return Err(invalid(format!(
            "invalid HTTP method `{}`",
            raw.request.method
        )));
    }
    let method = Method::from_bytes(method_name.as_bytes())
        .map_err(|e| invalid(format!("invalid HTTP method `{}`: {e}", raw.request.method)))?;

    let path = raw.request.path.as_str();
    if !path.starts_with('/') {
        return Err(invalid(format!("path `{path}` must start with `/`")));
    }
    let url = build_url(protocol, host, port, path)
        .map_err(|e| invalid(format!("invalid URL: {e}")))?;

    let predicate = Predicate::compile(&raw.predicate).map_err(|source| ConfigError::Predicate {
        rule: id.to_owned(),
        source,
    })?;

    let actions = raw
        .actions
        .iter()
        .enumerate()
        .map(|(index, action)| build_action(id, index, action))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Rule {
        id: id.to_owned(),
        description: raw.description.clone(),
        request: RequestSpec {
            method,
            path: path.to_owned(),
            url,
        },
        predicate,
        cooldown: Duration::from_millis(raw.cooldown_ms),
        actions,
    })
}

fn build_url(
    protocol: Protocol,
    host: &str,
    port: u16,
    path: &str,
) -> Result<Url, url::ParseError> {
    // Bare IPv6 literals need brackets inside a URL authority.
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };
    Url::parse(&format!("{}://{host}:{port}{path}", protocol.scheme()))
}

fn build_action(rule: &str, index: usize, raw: &ActionConfig) -> Result<Action, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAction {
        rule: rule.to_owned(),
        index,
        reason: reason.to_owned(),
    };
    if raw.command.trim().is_empty() {
        return Err(invalid("command must not be empty"));
    }
    if raw.timeout_secs == Some(0) {
        return Err(invalid("timeout_secs must be positive"));
    }
    Ok(Action {
        description: raw.description.clone(),
        command: raw.command.clone(),
        args: raw.args.clone(),
        timeout: raw.timeout_secs.map(Duration::from_secs),
    })
}
