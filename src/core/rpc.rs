//! Agent RPC client (C8): a versioned JSON-over-HTTP request/response
//! protocol, tunnel-aware in its addressing (prefers a loopback proxy
//! address recorded in the tunnel state file over an in-process dial).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::host::HostRecord;
use crate::core::state::TunnelState;
use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const AGENT_API_PORT: u16 = 4200;

#[derive(Serialize)]
struct Envelope<'a> {
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct EnvelopeResponse {
    result: Value,
    #[serde(default)]
    error: String,
}

/// Resolves the base URL for the agent's `/rpc`/`/health` endpoints: the
/// loopback address recorded by a live daemon if present, otherwise a
/// direct address derived from the host record (reachable when the caller
/// already owns a netstack dial path, e.g. during migration).
pub fn resolve_base_url(state: Option<&TunnelState>, record: &HostRecord) -> String {
    if let Some(addr) = state.and_then(|s| s.agent_api_addr.as_deref()) {
        format!("http://{addr}")
    } else {
        format!("http://{}:{AGENT_API_PORT}", record.agent_tunnel_ip)
    }
}

/// Client for the agent's control-plane RPC surface.
pub struct RpcClient {
    base_url: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `POST /rpc` with the `{"method", "params"}` envelope. A non-empty
    /// `error` field in the response surfaces as [`Error::RpcError`].
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let url = format!("{}/rpc", self.base_url);
        let envelope = Envelope { method, params };
        let response = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(&envelope)
            .map_err(|err| Error::RpcTransport {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        let body: EnvelopeResponse = response
            .into_json()
            .map_err(|err| Error::RpcMalformed {
                method: method.to_string(),
                reason: err.to_string(),
            })?;
        if !body.error.is_empty() {
            return Err(Error::RpcError {
                method: method.to_string(),
                message: body.error,
            });
        }
        Ok(body.result)
    }

    /// `GET /health` → `{status, tunnel, version?}`.
    pub fn health(&self) -> Result<HealthResponse> {
        let url = format!("{}/health", self.base_url);
        let response = ureq::get(&url)
            .timeout(self.timeout)
            .call()
            .map_err(|err| Error::RpcTransport {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        response.into_json().map_err(|err| Error::RpcMalformed {
            method: "health".into(),
            reason: err.to_string(),
        })
    }

    /// `logs.stream {name}`: copies the streamed response body to a
    /// caller-supplied writer using an effectively unbounded read deadline.
    pub fn stream_logs(&self, name: &str, mut out: impl std::io::Write) -> Result<()> {
        let url = format!("{}/rpc", self.base_url);
        let envelope = Envelope {
            method: "logs.stream",
            params: serde_json::json!({ "name": name }),
        };
        let response = ureq::post(&url)
            .timeout(Duration::from_secs(3600))
            .send_json(&envelope)
            .map_err(|err| Error::RpcTransport {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        std::io::copy(&mut response.into_reader(), &mut out).map_err(|source| Error::Io {
            path: std::path::PathBuf::from("logs-stream"),
            source,
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub tunnel: bool,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub running: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRef {
    pub short_id: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackageSpec {
    pub name: String,
    pub backend: String,
    pub version: Option<String>,
}

impl RpcClient {
    pub fn workspace_sync(&self, yaml: &str) -> Result<()> {
        self.call("workspace.sync", serde_json::json!({ "yaml": yaml }))?;
        Ok(())
    }

    pub fn packages_install(&self, packages: &[PackageSpec]) -> Result<()> {
        self.call("packages.install", serde_json::json!({ "packages": packages }))?;
        Ok(())
    }

    pub fn services_list(&self) -> Result<Vec<ServiceStatus>> {
        let result = self.call("services.list", serde_json::json!({}))?;
        serde_json::from_value(result).map_err(|err| Error::RpcMalformed {
            method: "services.list".into(),
            reason: err.to_string(),
        })
    }

    pub fn services_restart(&self, name: &str) -> Result<()> {
        self.call("services.restart", serde_json::json!({ "name": name }))?;
        Ok(())
    }

    pub fn services_stop(&self, name: &str) -> Result<()> {
        self.call("services.stop", serde_json::json!({ "name": name }))?;
        Ok(())
    }

    pub fn snap_create(&self) -> Result<String> {
        let result = self.call("snap.create", serde_json::json!({}))?;
        result
            .get("snapshot_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::RpcMalformed {
                method: "snap.create".into(),
                reason: "missing `snapshot_id`".into(),
            })
    }

    pub fn snap_restore(&self, id: &str, restore_path: Option<&str>) -> Result<()> {
        self.call(
            "snap.restore",
            serde_json::json!({ "id": id, "restore_path": restore_path }),
        )?;
        Ok(())
    }

    pub fn snap_list(&self) -> Result<Vec<SnapshotRef>> {
        let result = self.call("snap.list", serde_json::json!({}))?;
        serde_json::from_value(result).map_err(|err| Error::RpcMalformed {
            method: "snap.list".into(),
            reason: err.to_string(),
        })
    }

    pub fn run_script(&self, name: &str) -> Result<()> {
        self.call("run.script", serde_json::json!({ "name": name }))?;
        Ok(())
    }
}
