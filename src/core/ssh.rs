//! SSH bootstrap (C11): trust-on-first-use connect, signer discovery,
//! pinned re-verification, remote command execution, and the key-exchange
//! sequences used by `setup` and `rotate`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ssh2::{HostKeyType, Session};

use crate::error::{Error, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const DIAL_RETRIES: u32 = 3;
const DIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Discovers an SSH signer in the order the spec prescribes: agent, then an
/// explicit key path, then the standard default key files. The first
/// source that authenticates wins.
pub enum Signer {
    Agent,
    KeyPath(PathBuf),
}

/// Attempts authentication against `session` using each candidate signer
/// in order; returns the first one that succeeds.
pub fn authenticate(session: &Session, user: &str, explicit_key: Option<&Path>) -> Result<()> {
    if session.userauth_agent(user).is_ok() && session.authenticated() {
        return Ok(());
    }

    if let Some(key_path) = explicit_key {
        if try_key_file(session, user, key_path)? {
            return Ok(());
        }
    }

    for candidate in default_key_paths() {
        if candidate.exists() && try_key_file(session, user, &candidate)? {
            return Ok(());
        }
    }

    Err(Error::NoSshSigner)
}

fn try_key_file(session: &Session, user: &str, key_path: &Path) -> Result<bool> {
    if session.userauth_pubkey_file(user, None, key_path, None).is_ok() {
        return Ok(session.authenticated());
    }
    // The key is likely encrypted; prompt for a passphrase on the TTY.
    let passphrase = rpassword::prompt_password(format!(
        "Enter passphrase for {}: ",
        key_path.display()
    ))
    .map_err(|err| Error::SshAuth {
        user: user.to_string(),
        host: String::new(),
        reason: format!("failed to read passphrase: {err}"),
    })?;
    session
        .userauth_pubkey_file(user, None, key_path, Some(&passphrase))
        .ok();
    Ok(session.authenticated())
}

fn default_key_paths() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    let ssh_dir = home.join(".ssh");
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .into_iter()
        .map(|name| ssh_dir.join(name))
        .collect()
}

fn dial(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    let mut last_err = None;
    for attempt in 0..DIAL_RETRIES {
        match TcpStream::connect_timeout(
            &addr.parse().map_err(|_| Error::SshDial {
                host: host.to_string(),
                port,
                reason: "could not resolve address".into(),
            })?,
            DIAL_TIMEOUT,
        ) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < DIAL_RETRIES {
                    std::thread::sleep(DIAL_BACKOFF);
                }
            }
        }
    }
    Err(Error::SshDial {
        host: host.to_string(),
        port,
        reason: last_err.map(|e| e.to_string()).unwrap_or_default(),
    })
}

fn new_session(stream: TcpStream) -> Result<Session> {
    let mut session = Session::new().map_err(|err| Error::other(format!("failed to create SSH session: {err}")))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|err| Error::other(format!("SSH handshake failed: {err}")))?;
    Ok(session)
}

/// Serializes the session's captured host key in authorized-keys one-line
/// form: `<algo> <base64>`.
fn serialize_host_key(session: &Session) -> Result<String> {
    let (key_bytes, key_type) = session
        .host_key()
        .ok_or_else(|| Error::other("server did not present a host key"))?;
    let algo = algo_name(key_type);
    use base64::Engine as _;
    let encoded = base64::engine::general_purpose::STANDARD.encode(key_bytes);
    Ok(format!("{algo} {encoded}"))
}

fn algo_name(key_type: HostKeyType) -> &'static str {
    match key_type {
        HostKeyType::Rsa => "ssh-rsa",
        HostKeyType::Dss => "ssh-dss",
        HostKeyType::Ecdsa256 => "ecdsa-sha2-nistp256",
        HostKeyType::Ecdsa384 => "ecdsa-sha2-nistp384",
        HostKeyType::Ecdsa521 => "ecdsa-sha2-nistp521",
        HostKeyType::Ed25519 => "ssh-ed25519",
        HostKeyType::Unknown => "ssh-unknown",
    }
}

/// TOFU connect: dial and handshake, accepting whatever host key the
/// server presents. Used only for a host's first-ever bootstrap. Returns
/// the authenticated session and the serialized host key to pin.
pub fn tofu_connect(
    host: &str,
    port: u16,
    user: &str,
    explicit_key: Option<&Path>,
) -> Result<(Session, String)> {
    let stream = dial(host, port)?;
    let session = new_session(stream)?;
    let host_key = serialize_host_key(&session)?;
    authenticate(&session, user, explicit_key).map_err(|err| match err {
        Error::NoSshSigner => Error::SshAuth {
            user: user.to_string(),
            host: host.to_string(),
            reason: "no usable signer (agent, --key, default key files)".into(),
        },
        other => other,
    })?;
    Ok((session, host_key))
}

/// Pinned connect: reject any host key that does not match `pinned`.
pub fn pinned_connect(
    host: &str,
    port: u16,
    user: &str,
    explicit_key: Option<&Path>,
    pinned: &str,
) -> Result<Session> {
    let stream = dial(host, port)?;
    let session = new_session(stream)?;
    let presented = serialize_host_key(&session)?;
    if !host_key_matches(&presented, pinned) {
        return Err(Error::HostKeyMismatch {
            host: host.to_string(),
            name: host.to_string(),
        });
    }
    authenticate(&session, user, explicit_key)?;
    Ok(session)
}

/// Compares a presented host key against the pinned one recorded at setup
/// time. Exact match only — there is no fuzzy or prefix acceptance.
fn host_key_matches(presented: &str, pinned: &str) -> bool {
    presented == pinned
}

/// Runs `command`, capturing combined stdout+stderr. Returns the output on
/// exit 0, or a formatted error including the output on any other status.
pub fn run_remote(session: &Session, command: &str) -> Result<String> {
    let mut channel = session
        .channel_session()
        .map_err(|err| Error::other(format!("failed to open SSH channel: {err}")))?;
    channel
        .exec(command)
        .map_err(|err| Error::other(format!("failed to exec `{command}`: {err}")))?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .map_err(|err| Error::other(format!("failed to read remote output: {err}")))?;
    let mut stderr_output = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr_output)
        .ok();
    output.push_str(&stderr_output);

    channel
        .wait_close()
        .map_err(|err| Error::other(format!("failed to close SSH channel: {err}")))?;
    let status = channel.exit_status().unwrap_or(-1);
    if status != 0 {
        return Err(Error::RemoteCommandFailed {
            command: command.to_string(),
            status,
            output,
        });
    }
    Ok(output)
}

/// Uploads `data` to `remote_path` on the server using the "redirect cat"
/// approach: `cat > path && chmod mode path`, streamed on stdin.
pub fn upload(session: &Session, remote_path: &str, data: &[u8], mode: u32) -> Result<()> {
    let mut channel = session
        .channel_session()
        .map_err(|err| Error::other(format!("failed to open SSH channel: {err}")))?;
    let command = format!(
        "cat > {remote_path} && chmod {mode:o} {remote_path}",
    );
    channel
        .exec(&command)
        .map_err(|err| Error::other(format!("failed to exec upload command: {err}")))?;
    channel
        .write_all(data)
        .map_err(|err| Error::other(format!("failed to stream upload data: {err}")))?;
    channel
        .send_eof()
        .map_err(|err| Error::other(format!("failed to send EOF: {err}")))?;
    channel
        .wait_close()
        .map_err(|err| Error::other(format!("failed to close upload channel: {err}")))?;
    let status = channel.exit_status().unwrap_or(-1);
    if status != 0 {
        let mut output = String::new();
        let _ = channel.read_to_string(&mut output);
        return Err(Error::RemoteCommandFailed {
            command: "upload".to_string(),
            status,
            output,
        });
    }
    Ok(())
}

/// A pinned session plus the coordinates used to open it, so callers that
/// need to reconnect (e.g. after restarting the remote service) don't have
/// to thread the arguments through separately.
pub struct PinnedSession {
    pub session: Session,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

/// Thread-shareable wrapper; `ssh2::Session` is not `Sync`, but callers in
/// this crate only ever drive one session from one thread at a time.
pub type SharedSession = Arc<Mutex<Session>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_key_paths_lists_standard_names() {
        let paths = default_key_paths();
        if !paths.is_empty() {
            assert!(paths.iter().any(|p| p.ends_with("id_ed25519")));
            assert!(paths.iter().any(|p| p.ends_with("id_rsa")));
        }
    }

    #[test]
    fn host_key_matches_requires_an_exact_match() {
        assert!(host_key_matches("ssh-ed25519 AAA", "ssh-ed25519 AAA"));
        assert!(!host_key_matches("ssh-ed25519 AAA", "ssh-ed25519 BBB"));
        assert!(!host_key_matches("ssh-rsa AAA", "ssh-ed25519 AAA"));
    }

    #[test]
    fn algo_name_covers_every_host_key_type() {
        assert_eq!(algo_name(HostKeyType::Rsa), "ssh-rsa");
        assert_eq!(algo_name(HostKeyType::Dss), "ssh-dss");
        assert_eq!(algo_name(HostKeyType::Ecdsa256), "ecdsa-sha2-nistp256");
        assert_eq!(algo_name(HostKeyType::Ecdsa384), "ecdsa-sha2-nistp384");
        assert_eq!(algo_name(HostKeyType::Ecdsa521), "ecdsa-sha2-nistp521");
        assert_eq!(algo_name(HostKeyType::Ed25519), "ssh-ed25519");
        assert_eq!(algo_name(HostKeyType::Unknown), "ssh-unknown");
    }
}
