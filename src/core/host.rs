//! Host registry (C2): per-host WireGuard/SSH configuration and the single
//! global record that tracks the default host.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::paths;

/// A single configured remote: its WireGuard parameters and the SSH
/// coordinates used to reach it for bootstrap, rotation, and upgrades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRecord {
    pub name: String,
    pub display_name: String,
    /// `host:port` of the remote WireGuard endpoint.
    pub endpoint: String,
    /// Base64-encoded client private key.
    pub client_private_key: String,
    /// Base64-encoded peer (agent) public key.
    pub peer_public_key: String,
    /// Client tunnel IP with mask, e.g. `10.10.0.1/24`.
    pub client_tunnel_ip: String,
    /// Agent tunnel IP, e.g. `10.10.0.2`.
    pub agent_tunnel_ip: String,
    pub ssh_user: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_key_path: Option<PathBuf>,
    /// Authorized-keys one-line serialisation of the pinned SSH host key.
    /// Empty before bootstrap completes.
    pub ssh_host_key: String,
}

impl HostRecord {
    /// Checks the invariants from the data model: valid name, both keys
    /// decode to 32 bytes, and the SSH host key is either empty or at
    /// least superficially well-formed (`<algo> <base64> [comment]`).
    pub fn validate(&self) -> Result<()> {
        paths::validate_host_name(&self.name)?;
        super::crypto::decode_base64_key("client_private_key", &self.client_private_key)?;
        super::crypto::decode_base64_key("peer_public_key", &self.peer_public_key)?;
        if !self.ssh_host_key.is_empty() {
            let mut parts = self.ssh_host_key.split_whitespace();
            let algo = parts.next();
            let key = parts.next();
            if algo.is_none() || key.is_none() {
                return Err(Error::InvalidKey {
                    field: "ssh_host_key",
                    reason: "expected `<algo> <base64> [comment]`".into(),
                });
            }
        }
        Ok(())
    }
}

/// Single record tracking cross-host state: currently just the default host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    pub default_host: Option<String>,
}

/// Validate a candidate host name per §4.2: non-empty, no leading `-`/`_`,
/// no characters outside `[A-Za-z0-9_-]`, no `..`, no path separator, no NUL.
pub fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidHostName { name: name.into() });
    }
    if name.starts_with('-') || name.starts_with('_') {
        return Err(Error::InvalidHostName { name: name.into() });
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(Error::InvalidHostName { name: name.into() });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(Error::InvalidHostName { name: name.into() });
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::WriteConfig {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|source| Error::WriteConfig {
        path: tmp_path.clone(),
        source,
    })?;
    file.write_all(contents.as_bytes())
        .map_err(|source| Error::WriteConfig { path: tmp_path.clone(), source })?;
    file.set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|source| Error::WriteConfig { path: tmp_path.clone(), source })?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(|source| Error::WriteConfig {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Persist a host record atomically (temp file + rename), mode 0600.
pub fn save(record: &HostRecord) -> Result<()> {
    validate(&record.name)?;
    record.validate()?;
    let path = paths::host_config_path(&record.name)?;
    let contents = toml::to_string_pretty(record).map_err(|err| {
        Error::other(format!("failed to serialize host record: {err}"))
    })?;
    write_atomic(&path, &contents, 0o600)
}

/// Load a host record by name. Fails with `UnknownHost` if missing.
pub fn load(name: &str) -> Result<HostRecord> {
    let path = paths::host_config_path(name)?;
    let contents = fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::UnknownHost { name: name.to_string() }
        } else {
            Error::ReadConfig { path: path.clone(), source }
        }
    })?;
    toml::from_str(&contents).map_err(|source| Error::ParseConfig { path, source })
}

/// Enumerate configured host names, sorted lexicographically. An empty or
/// missing hosts directory yields an empty list, not an error.
pub fn list() -> Result<Vec<String>> {
    let dir = paths::hosts_dir()?;
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(Error::ReadConfig { path: dir, source }),
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("toml") {
                path.file_stem().and_then(|s| s.to_str()).map(|s| s.to_string())
            } else {
                None
            }
        })
        .collect();
    names.sort();
    Ok(names)
}

/// Remove a host record. If it was the default host, clears the default.
pub fn delete(name: &str) -> Result<()> {
    let path = paths::host_config_path(name)?;
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::UnknownHost { name: name.to_string() });
        }
        Err(source) => return Err(Error::WriteConfig { path, source }),
    }
    let mut global = load_global()?;
    if global.default_host.as_deref() == Some(name) {
        global.default_host = None;
        save_global(&global)?;
    }
    Ok(())
}

pub fn set_default(name: &str) -> Result<()> {
    // Confirm the host exists before pointing the default at it.
    load(name)?;
    let mut global = load_global()?;
    global.default_host = Some(name.to_string());
    save_global(&global)
}

pub fn load_global() -> Result<GlobalConfig> {
    let path = paths::global_config_path()?;
    match fs::read_to_string(&path) {
        Ok(contents) => toml::from_str(&contents).map_err(|source| Error::ParseConfig { path, source }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(GlobalConfig::default()),
        Err(source) => Err(Error::ReadConfig { path, source }),
    }
}

pub fn save_global(global: &GlobalConfig) -> Result<()> {
    let path = paths::global_config_path()?;
    let contents = toml::to_string_pretty(global)
        .map_err(|err| Error::other(format!("failed to serialize global config: {err}")))?;
    write_atomic(&path, &contents, 0o644)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> HostRecord {
        let kp = super::super::crypto::Keypair::generate();
        let peer = super::super::crypto::Keypair::generate();
        HostRecord {
            name: name.to_string(),
            display_name: name.to_string(),
            endpoint: "example.com:51820".into(),
            client_private_key: kp.private_base64(),
            peer_public_key: peer.public_base64(),
            client_tunnel_ip: "10.10.0.1/24".into(),
            agent_tunnel_ip: "10.10.0.2".into(),
            ssh_user: "root".into(),
            ssh_host: "example.com".into(),
            ssh_port: 22,
            ssh_key_path: None,
            ssh_host_key: String::new(),
        }
    }

    fn with_env<F: FnOnce()>(f: F) {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("HOPBOX_CONFIG_DIR", Some(dir.path().to_str().unwrap()), f);
    }

    #[test]
    fn save_then_load_round_trips() {
        with_env(|| {
            let record = sample("alpha");
            save(&record).unwrap();
            let loaded = load("alpha").unwrap();
            assert_eq!(loaded, record);
        });
    }

    #[test]
    fn load_missing_host_is_unknown_host_error() {
        with_env(|| {
            let err = load("ghost").unwrap_err();
            assert!(matches!(err, Error::UnknownHost { .. }));
        });
    }

    #[test]
    fn list_is_sorted_and_empty_by_default() {
        with_env(|| {
            assert_eq!(list().unwrap(), Vec::<String>::new());
            save(&sample("zeta")).unwrap();
            save(&sample("alpha")).unwrap();
            assert_eq!(list().unwrap(), vec!["alpha".to_string(), "zeta".to_string()]);
        });
    }

    #[test]
    fn delete_clears_default_when_it_matches() {
        with_env(|| {
            save(&sample("alpha")).unwrap();
            set_default("alpha").unwrap();
            delete("alpha").unwrap();
            assert_eq!(load_global().unwrap().default_host, None);
        });
    }

    #[test]
    fn delete_missing_host_errors() {
        with_env(|| {
            let err = delete("ghost").unwrap_err();
            assert!(matches!(err, Error::UnknownHost { .. }));
        });
    }

    #[test]
    fn validate_rejects_bad_names() {
        assert!(validate("").is_err());
        assert!(validate("-leading").is_err());
        assert!(validate("_leading").is_err());
        assert!(validate("has/slash").is_err());
        assert!(validate("has..dot").is_err());
        assert!(validate("ok-name_1").is_ok());
    }

    #[test]
    fn saved_file_has_mode_0600() {
        with_env(|| {
            let record = sample("alpha");
            save(&record).unwrap();
            let path = paths::host_config_path("alpha").unwrap();
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        });
    }
}
