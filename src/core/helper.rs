//! Helper IPC client (C4): the contract the core uses to talk to the
//! privileged local helper that owns TUN creation and the system hosts
//! file. The helper itself runs out-of-process under elevated privilege;
//! this module only speaks its wire protocol.
//!
//! The wire format is the same line-delimited JSON-RPC-ish envelope used
//! elsewhere in the client (see [`crate::core::rpc`]): one JSON object per
//! request, one per response, newline-terminated, over a Unix domain
//! socket.

use std::io::{BufRead, BufReader, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};

/// A TUN device fd and the interface name the helper assigned it.
pub struct TunHandle {
    pub fd: RawFd,
    pub interface_name: String,
}

// SAFETY: ownership transfer only, no implicit Drop behavior is assumed by
// callers of `from_raw_fd` beyond what `std::fs::File`/raw-fd consumers do.
impl TunHandle {
    /// Wrap the fd in an owned `std::fs::File` so normal `Read`/`Write`
    /// (and Drop-close) semantics apply.
    pub fn into_file(self) -> std::fs::File {
        unsafe { std::fs::File::from_raw_fd(self.fd) }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct Response {
    result: serde_json::Value,
    error: Option<String>,
}

/// Client for the privileged helper's local socket.
pub struct HelperClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl HelperClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: Duration::from_secs(10),
        }
    }

    fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let socket = self.socket_path.display().to_string();
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|_| Error::HelperUnreachable {
            socket: socket.clone(),
        })?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|_| Error::HelperUnreachable { socket: socket.clone() })?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|_| Error::HelperUnreachable { socket: socket.clone() })?;

        let request = Request { method, params };
        let mut line = serde_json::to_vec(&request)
            .map_err(|err| Error::other(format!("failed to encode helper request: {err}")))?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .map_err(|_| Error::HelperUnreachable { socket: socket.clone() })?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .map_err(|_| Error::HelperUnreachable { socket: socket.clone() })?;
        if response_line.is_empty() {
            return Err(Error::HelperUnreachable { socket });
        }

        let response: Response = serde_json::from_str(&response_line)
            .map_err(|err| Error::other(format!("malformed helper response: {err}")))?;
        if let Some(message) = response.error {
            return Err(Error::other(format!("helper call `{method}` failed: {message}")));
        }
        Ok(response.result)
    }

    /// `IsReachable() → bool`. Never fails: a connection error is `false`.
    pub fn is_reachable(&self) -> bool {
        self.call("IsReachable", json!({})).is_ok()
    }

    /// `CreateTUN(mtu) → (fd, interface_name)`.
    pub fn create_tun(&self, mtu: u16) -> Result<TunHandle> {
        let result = self.call("CreateTUN", json!({ "mtu": mtu }))?;
        let fd = result
            .get("fd")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| Error::TunCreateFailed {
                reason: "helper response missing `fd`".into(),
            })?;
        let interface_name = result
            .get("interface_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::TunCreateFailed {
                reason: "helper response missing `interface_name`".into(),
            })?
            .to_string();
        Ok(TunHandle {
            fd: fd as RawFd,
            interface_name,
        })
    }

    /// `ConfigureTUN(iface, local_cidr, peer_cidr)`.
    pub fn configure_tun(&self, iface: &str, local_cidr: &str, peer_cidr: &str) -> Result<()> {
        self.call(
            "ConfigureTUN",
            json!({ "interface": iface, "local_cidr": local_cidr, "peer_cidr": peer_cidr }),
        )?;
        Ok(())
    }

    /// `CleanupTUN(iface)`. Idempotent.
    pub fn cleanup_tun(&self, iface: &str) -> Result<()> {
        self.call("CleanupTUN", json!({ "interface": iface }))?;
        Ok(())
    }

    /// `AddHost(ip, hostname)`. Idempotent by hostname: a repeat call
    /// replaces the prior entry for the same hostname.
    pub fn add_host(&self, ip: &str, hostname: &str) -> Result<()> {
        self.call("AddHost", json!({ "ip": ip, "hostname": hostname }))?;
        Ok(())
    }

    /// `RemoveHost(hostname)`. Must leave other managed entries intact.
    pub fn remove_host(&self, hostname: &str) -> Result<()> {
        self.call("RemoveHost", json!({ "hostname": hostname }))?;
        Ok(())
    }

    pub fn version(&self) -> Result<String> {
        let result = self.call("Version", json!({}))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::other("helper Version response was not a string"))
    }
}
