//! Tunnel state file (C3): the ephemeral, filesystem-mediated shared memory
//! between the daemon (sole writer) and every other client process
//! (readers). Serialized as single-line JSON rather than TOML because JSON
//! parses all-or-nothing on a torn read, while a multi-table TOML document
//! can parse a truncated-but-syntactically-valid prefix and silently hand
//! back a partial record.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::paths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelState {
    pub pid: u32,
    pub host: String,
    /// e.g. `<name>.hop`
    pub hostname_alias: String,
    pub interface: String,
    pub started_at: u64,
    pub last_healthy: u64,
    pub connected: bool,
    pub agent_api_addr: Option<String>,
    pub ssh_addr: Option<String>,
    #[serde(default)]
    pub service_ports: BTreeMap<String, String>,
}

impl TunnelState {
    pub fn new(host: impl Into<String>, interface: impl Into<String>) -> Self {
        let host = host.into();
        let now = unix_now();
        Self {
            pid: std::process::id(),
            hostname_alias: format!("{host}.hop"),
            host,
            interface: interface.into(),
            started_at: now,
            last_healthy: now,
            connected: true,
            agent_api_addr: None,
            ssh_addr: None,
            service_ports: BTreeMap::new(),
        }
    }

    /// True if `pid` refers to a process that is (as far as we can tell)
    /// still alive. Used to decide whether a stale state file may be
    /// overwritten.
    pub fn is_pid_alive(&self) -> bool {
        // kill(pid, 0) checks existence/permission without sending a signal.
        unsafe { libc::kill(self.pid as libc::pid_t, 0) == 0 }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Read the state file for `host`. A missing file, or one that fails to
/// parse (a torn read observed mid-rename, or a stale format), is treated
/// as "no state" rather than an error, per §4.3.
pub fn load(host: &str) -> Result<Option<TunnelState>> {
    let path = paths::tunnel_state_path(host)?;
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::Io { path, source }),
    }
}

/// True if a live tunnel is already recorded for `host`. A state file that
/// references a dead PID is not considered live and may be overwritten.
pub fn is_running(host: &str) -> Result<bool> {
    Ok(load(host)?.map(|s| s.is_pid_alive()).unwrap_or(false))
}

/// Write the state file as a single atomic temp-file + rename, mode 0600,
/// so concurrent readers always observe either the previous or the new
/// snapshot, never a torn one.
pub fn save(state: &TunnelState) -> Result<()> {
    let path = paths::tunnel_state_path(&state.host)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::Io { path: parent.to_path_buf(), source })?;
    }
    let contents = serde_json::to_string(state)
        .map_err(|err| Error::other(format!("failed to serialize tunnel state: {err}")))?;
    let tmp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp_path).map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
    file.write_all(contents.as_bytes())
        .map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
    drop(file);
    fs::rename(&tmp_path, &path).map_err(|source| Error::Io { path, source })?;
    Ok(())
}

/// Update `last_healthy` (and `connected`) and persist atomically. Used by
/// the connectivity monitor's callbacks.
pub fn mark_healthy(host: &str) -> Result<()> {
    if let Some(mut state) = load(host)? {
        state.last_healthy = unix_now();
        state.connected = true;
        save(&state)?;
    }
    Ok(())
}

pub fn mark_disconnected(host: &str) -> Result<()> {
    if let Some(mut state) = load(host)? {
        state.connected = false;
        save(&state)?;
    }
    Ok(())
}

/// Remove the state file for `host`. Idempotent: a missing file is not an
/// error.
pub fn remove(host: &str) -> Result<()> {
    let path = paths::tunnel_state_path(host)?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Io { path, source }),
    }
}

pub fn uptime(state: &TunnelState) -> Duration {
    Duration::from_secs(unix_now().saturating_sub(state.started_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env<F: FnOnce()>(f: F) {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("HOPBOX_STATE_DIR", Some(dir.path().to_str().unwrap()), f);
    }

    #[test]
    fn save_then_load_round_trips() {
        with_env(|| {
            let state = TunnelState::new("alpha", "utun5");
            save(&state).unwrap();
            let loaded = load("alpha").unwrap().unwrap();
            assert_eq!(loaded, state);
        });
    }

    #[test]
    fn missing_file_is_none_not_error() {
        with_env(|| {
            assert_eq!(load("ghost").unwrap(), None);
        });
    }

    #[test]
    fn garbage_contents_are_treated_as_no_state() {
        with_env(|| {
            let path = paths::tunnel_state_path("alpha").unwrap();
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"{not valid json").unwrap();
            assert_eq!(load("alpha").unwrap(), None);
        });
    }

    #[test]
    fn remove_is_idempotent() {
        with_env(|| {
            remove("ghost").unwrap();
            let state = TunnelState::new("alpha", "utun5");
            save(&state).unwrap();
            remove("alpha").unwrap();
            remove("alpha").unwrap();
            assert_eq!(load("alpha").unwrap(), None);
        });
    }

    #[test]
    fn is_running_false_for_dead_pid() {
        with_env(|| {
            let mut state = TunnelState::new("alpha", "utun5");
            state.pid = 999_999; // exceedingly unlikely to be a live pid
            save(&state).unwrap();
            assert!(!is_running("alpha").unwrap());
        });
    }

    #[test]
    fn mark_healthy_updates_timestamp_and_connected() {
        with_env(|| {
            let mut state = TunnelState::new("alpha", "utun5");
            state.connected = false;
            state.last_healthy = 0;
            save(&state).unwrap();
            mark_healthy("alpha").unwrap();
            let loaded = load("alpha").unwrap().unwrap();
            assert!(loaded.connected);
            assert!(loaded.last_healthy > 0);
        });
    }
}
