//! Configuration loading and discovery.
//!
//! Loads `config.toml` (or `config.json`) into raw, loosely-checked structs.
//! The `[schedule]` and `[http]` sections use `#[serde(default)]` so they may
//! be omitted. Target/rule/action records are turned into validated
//! [`Registry`](crate::registry::Registry) entries by
//! [`Registry::from_config`](crate::registry::Registry::from_config).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV: &str = "WATCHPOST_CONFIG";

/// File names probed, in order, inside the configuration directory.
const CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", "config.json"];

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tick period for the `start` command.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Outbound HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Monitored endpoints, in declaration order.
    #[serde(default, alias = "servers")]
    pub targets: Vec<TargetConfig>,
}

/// Timing for periodic cycles.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Milliseconds between cycle starts.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

/// HTTP client settings shared by every fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A monitored endpoint as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Human-readable label used in logs.
    #[serde(default)]
    pub description: String,

    /// URL scheme: `http` or `https`.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Host name or IP address.
    #[serde(default)]
    pub host: String,

    /// TCP port.
    #[serde(default)]
    pub port: u16,

    /// Basic-auth user name. Empty disables authentication.
    #[serde(default)]
    pub user: String,

    /// Basic-auth password in plain text.
    #[serde(default)]
    pub password: Option<String>,

    /// Name of a credential holding the basic-auth password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Rules evaluated against this target, in order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// A check performed against a target.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Registry-wide unique identifier; the cooldown key.
    #[serde(default)]
    pub id: String,

    /// Human-readable label used in logs.
    #[serde(default)]
    pub description: String,

    /// The HTTP request to perform.
    pub request: RequestConfig,

    /// Predicate program evaluated against the response JSON.
    #[serde(alias = "evaluator")]
    pub predicate: String,

    /// Milliseconds during which repeated positive results are suppressed.
    #[serde(default, alias = "delay")]
    pub cooldown_ms: u64,

    /// Commands run, in order, when the rule fires.
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// HTTP method and path of a rule's request.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// HTTP method, e.g. `GET`.
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute path (including any query string), e.g. `/api/health`.
    pub path: String,
}

/// A remediation command.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionConfig {
    /// Human-readable label used in logs.
    #[serde(default)]
    pub description: String,

    /// Executable name or path. Not interpreted by a shell.
    #[serde(alias = "cmd")]
    pub command: String,

    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the process and fail the action after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Supported on-disk formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML, the default.
    Toml,
    /// JSON.
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension. Anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl Config {
    /// Parse configuration text in the given format and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not parse or fails validation.
    pub fn parse(contents: &str, format: ConfigFormat) -> anyhow::Result<Self> {
        let config: Config = match format {
            ConfigFormat::Toml => toml::from_str(contents).context("invalid TOML")?,
            ConfigFormat::Json => serde_json::from_str(contents).context("invalid JSON")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate that scalar settings are within sane bounds.
    ///
    /// Target, rule and action records are checked separately when the
    /// registry is built.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.schedule.interval_ms >= 100,
            "schedule.interval_ms must be >= 100"
        );
        anyhow::ensure!(
            (1..=600).contains(&self.http.timeout_secs),
            "http.timeout_secs must be in [1, 600]"
        );
        Ok(())
    }
}

/// Load configuration from a TOML or JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    Config::parse(&contents, ConfigFormat::from_path(path))
        .with_context(|| format!("failed to load config at {}", path.display()))
}

/// Directory searched when no explicit config path is given.
///
/// `$XDG_CONFIG_HOME/watchpost`, falling back to `~/.config/watchpost`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    config_dir_with(|key| std::env::var(key).ok())
}

/// Resolve the config directory using a custom env resolver (for testing).
fn config_dir_with(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(xdg) = env("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(xdg).join("watchpost"));
    }
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".config").join("watchpost"))
}

/// Find the first existing config file in `dir`.
///
/// # Errors
///
/// Returns an error listing the probed paths when none exists.
pub fn discover_config(dir: &Path) -> anyhow::Result<PathBuf> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_NAMES.iter().map(|name| dir.join(name)).collect();
    candidates
        .iter()
        .find(|path| path.is_file())
        .cloned()
        .ok_or_else(|| {
            let searched: Vec<String> = candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            anyhow::anyhow!("no configuration file found (searched {})", searched.join(", "))
        })
}

/// Resolve the config path: an explicit path wins, otherwise discovery.
///
/// # Errors
///
/// Returns an error if an explicit path does not point at a file, or if
/// discovery finds nothing.
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => {
            anyhow::ensure!(
                path.is_file(),
                "config file {} does not exist or is not a file",
                path.display()
            );
            Ok(path.to_path_buf())
        }
        None => discover_config(&config_dir()?),
    }
}

/// Directory for rotated JSON logs of the `start` command.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_logs_dir() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "watchpost")
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(dirs.data_dir().join("logs"))
}

// Default value functions for serde.

fn default_interval_ms() -> u64 {
    60_000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_protocol() -> String {
    "http".to_owned()
}

fn default_method() -> String {
    "GET".to_owned()
}
