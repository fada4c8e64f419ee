//! Credential lookup for target passwords.
//!
//! Targets may name a credential with `password_env` instead of writing the
//! password into the config file. Names resolve against an optional `.env`
//! file stored next to the config, then against the process environment.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Credentials loaded from a `.env` file, with process-environment fallback.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
    use_process_env: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .field("use_process_env", &self.use_process_env)
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map only, without env fallback.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            use_process_env: false,
        }
    }

    /// Credentials that resolve from the process environment only.
    pub fn from_process_env() -> Self {
        Self {
            vars: BTreeMap::new(),
            use_process_env: true,
        }
    }

    /// Returns a credential value for a key, if present.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.vars.get(key) {
            return Some(value.clone());
        }
        if self.use_process_env {
            return std::env::var(key).ok();
        }
        None
    }
}

/// Load credentials from a specific `.env` path, falling back to the process
/// environment for keys the file does not define.
///
/// # Errors
///
/// Returns an error if permissions are too broad or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials {
        vars,
        use_process_env: true,
    })
}

/// Load credentials for a config file: `<config dir>/.env` when it exists,
/// otherwise the process environment only.
///
/// # Errors
///
/// Returns an error if the `.env` file exists but is invalid.
pub fn load_for_config(config_path: &Path) -> anyhow::Result<Credentials> {
    let env_file = config_path
        .parent()
        .map(|dir| dir.join(".env"))
        .filter(|p| p.is_file());
    match env_file {
        Some(path) => load_credentials(&path),
        None => Ok(Credentials::from_process_env()),
    }
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    Ok(())
}
