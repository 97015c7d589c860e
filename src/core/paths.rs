//! Resolution of the on-disk directories Hopbox reads and writes (C2/C3/C15).
//!
//! Config (host records, global defaults) and state (tunnel state files,
//! event logs) are kept in separate roots, both resolvable via the standard
//! per-user directories with an environment variable escape hatch for tests
//! and for users who want to relocate everything (e.g. onto a removable
//! volume).

use std::path::PathBuf;

use crate::error::{Error, Result};

const CONFIG_ENV: &str = "HOPBOX_CONFIG_DIR";
const STATE_ENV: &str = "HOPBOX_STATE_DIR";

/// Root directory for durable configuration: `hosts/*.toml` and `global.toml`.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::config_dir().ok_or(Error::ConfigDirUnavailable)?;
    Ok(base.join("hopbox"))
}

/// Root directory for ephemeral/runtime state: tunnel state files, the
/// daemon control socket, and event logs.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(STATE_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .ok_or(Error::ConfigDirUnavailable)?;
    Ok(base.join("hopbox"))
}

pub fn hosts_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join("hosts"))
}

pub fn host_config_path(name: &str) -> Result<PathBuf> {
    Ok(hosts_dir()?.join(format!("{name}.toml")))
}

pub fn global_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("global.toml"))
}

pub fn tunnels_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("tunnels"))
}

pub fn tunnel_state_path(name: &str) -> Result<PathBuf> {
    Ok(tunnels_dir()?.join(format!("{name}.json")))
}

pub fn logs_dir() -> Result<PathBuf> {
    Ok(state_dir()?.join("logs"))
}

pub fn log_path(name: &str) -> Result<PathBuf> {
    Ok(logs_dir()?.join(format!("{name}.log")))
}

pub fn daemon_socket_path(name: &str) -> Result<PathBuf> {
    Ok(state_dir()?.join("control").join(format!("{name}.sock")))
}

/// Validate a host name against the rule shared across config file names
/// and socket paths: must be non-empty, match `[A-Za-z0-9][A-Za-z0-9_-]*`,
/// and contain no path separators.
pub fn validate_host_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !first_ok || !rest_ok {
        return Err(Error::InvalidHostName {
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_honors_env_override() {
        temp_env::with_var(CONFIG_ENV, Some("/tmp/hopbox-test-config"), || {
            assert_eq!(config_dir().unwrap(), PathBuf::from("/tmp/hopbox-test-config"));
        });
    }

    #[test]
    fn state_dir_honors_env_override() {
        temp_env::with_var(STATE_ENV, Some("/tmp/hopbox-test-state"), || {
            assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/hopbox-test-state"));
        });
    }

    #[test]
    fn validate_host_name_accepts_simple_names() {
        assert!(validate_host_name("prod-box_1").is_ok());
    }

    #[test]
    fn validate_host_name_rejects_path_separators() {
        assert!(validate_host_name("../etc").is_err());
        assert!(validate_host_name("a/b").is_err());
    }

    #[test]
    fn validate_host_name_rejects_empty() {
        assert!(validate_host_name("").is_err());
    }

    #[test]
    fn validate_host_name_rejects_leading_punctuation() {
        assert!(validate_host_name("-box").is_err());
    }
}
