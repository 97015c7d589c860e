//! `up [workspace.yaml] [-f|--foreground]` (§4.12.1): starts the daemon if
//! one isn't already running for the host, waits for readiness, then runs
//! the post-up phases (agent probe, workspace sync, packages install).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::daemon::{self, DaemonClient};
use crate::core::diagnostics::{Diagnostic, Outcome, Severity};
use crate::core::host::HostRecord;
use crate::core::reporter::Reporter;
use crate::core::rpc::{self, PackageSpec, RpcClient};
use crate::core::state;
use crate::core::steps::{Phase, Step, Workflow};
use crate::error::{Error, Result};

const WAIT_READY_TIMEOUT: Duration = Duration::from_secs(15);
const PROBE_RETRY_INTERVAL: Duration = Duration::from_millis(500);
const PROBE_DEADLINE: Duration = Duration::from_secs(10);

pub struct WorkspaceManifest {
    pub host: Option<String>,
    pub yaml: String,
    pub packages: Vec<PackageSpec>,
}

fn load_manifest(path: &Path) -> Option<WorkspaceManifest> {
    let yaml = std::fs::read_to_string(path).ok()?;
    let value: serde_yaml_like::Value = serde_yaml_like::from_str(&yaml).unwrap_or_default();
    Some(WorkspaceManifest {
        host: value.host,
        yaml,
        packages: value.packages,
    })
}

/// Brings a host's daemon up (spawning it if necessary) and runs the
/// post-up phases. `hop_binary`/`workspace` are only used if a daemon must
/// be spawned.
pub fn run(
    host_name_override: Option<&str>,
    workspace_path: Option<&Path>,
    hop_binary: &Path,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<()>> {
    let manifest = workspace_path.and_then(load_manifest);
    let host_name = super::resolve_host_for_up(
        host_name_override,
        manifest.as_ref().and_then(|m| m.host.as_deref()),
    )?;

    let record = crate::core::host::load(&host_name)?;

    let client = DaemonClient::connect(&host_name)?;
    let already_running = client.status().is_ok();
    if !already_running {
        daemon::spawn_detached(hop_binary, &host_name, workspace_path)?;
        client.wait_for_ready(Some(WAIT_READY_TIMEOUT))?;
    }

    let diagnostics = run_post_up(&record, manifest, reporter)?;
    Ok(Outcome::with_diagnostics((), diagnostics))
}

/// Runs the tunnel in-process (no daemon spawn) and loops until cancelled,
/// used by `up --foreground`.
pub fn run_foreground(
    record: &HostRecord,
    workspace_path: Option<&Path>,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<()>> {
    let manifest = workspace_path.and_then(load_manifest);
    let socket_path = crate::core::paths::daemon_socket_path(&record.name)?;
    let cancel = CancelToken::new();
    let install_cancel = cancel.clone();
    ctrlc_like::on_interrupt(move || install_cancel.cancel());

    let diagnostics = run_post_up(record, manifest, reporter)?;
    daemon::run(record, &socket_path, cancel, reporter)?;
    Ok(Outcome::with_diagnostics((), diagnostics))
}

fn run_post_up(
    record: &HostRecord,
    manifest: Option<WorkspaceManifest>,
    reporter: &mut dyn Reporter,
) -> Result<Vec<Diagnostic>> {
    let state = state::load(&record.name)?;
    let base_url = rpc::resolve_base_url(state.as_ref(), record);
    let client_version = env!("CARGO_PKG_VERSION").to_string();

    let cancel = CancelToken::new();
    let diagnostics = Arc::new(Mutex::new(Vec::new()));
    let mut steps = vec![Step::non_fatal("Agent probe", {
        let rpc_client = RpcClient::new(base_url.clone());
        let client_version = client_version.clone();
        let diagnostics = diagnostics.clone();
        move |cancel| {
            let deadline = Instant::now() + PROBE_DEADLINE;
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                match rpc_client.health() {
                    Ok(health) => {
                        if let Some(agent_version) = health.version {
                            if agent_version != client_version {
                                diagnostics.lock().unwrap().push(
                                    Diagnostic::new(
                                        Severity::Warning,
                                        format!(
                                            "agent version {agent_version} differs from client version {client_version}"
                                        ),
                                    )
                                    .with_help("run `hop upgrade --agent-only` to bring the agent in line"),
                                );
                            }
                        }
                        return Ok(());
                    }
                    Err(_) if Instant::now() < deadline => {
                        std::thread::sleep(PROBE_RETRY_INTERVAL);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    })];

    if let Some(manifest) = manifest {
        let yaml = manifest.yaml.clone();
        let rpc_client_sync = RpcClient::new(base_url.clone());
        steps.push(Step::non_fatal("Workspace sync", move |_cancel| {
            rpc_client_sync.workspace_sync(&yaml)
        }));

        if !manifest.packages.is_empty() {
            let rpc_client_pkgs = RpcClient::new(base_url.clone());
            steps.push(Step::non_fatal("Packages install", move |_cancel| {
                rpc_client_pkgs.packages_install(&manifest.packages)
            }));
        }
    }

    let workflow = Workflow::new(vec![Phase::new("Post-up", steps)]);
    workflow.run(&cancel, reporter)?;
    Ok(Arc::try_unwrap(diagnostics)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default())
}

/// Minimal inline YAML reader covering the one field the spec requires
/// (`host:` plus an optional `packages:` list); avoids pulling in a full
/// YAML crate for two scalar/list fields.
mod serde_yaml_like {
    use crate::core::rpc::PackageSpec;

    #[derive(Default)]
    pub struct Value {
        pub host: Option<String>,
        pub packages: Vec<PackageSpec>,
    }

    pub fn from_str(input: &str) -> Result<Value, ()> {
        let mut value = Value::default();
        let mut in_packages = false;
        for line in input.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("host:") {
                value.host = Some(rest.trim().trim_matches('"').to_string());
                in_packages = false;
                continue;
            }
            if trimmed == "packages:" {
                in_packages = true;
                continue;
            }
            if !in_packages {
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("- ") {
                let mut spec = PackageSpec {
                    name: String::new(),
                    backend: "brew".to_string(),
                    version: None,
                };
                apply_field(&mut spec, rest.trim());
                value.packages.push(spec);
            } else if let Some(spec) = value.packages.last_mut() {
                apply_field(spec, trimmed);
            } else {
                in_packages = false;
            }
        }
        Ok(value)
    }

    fn apply_field(spec: &mut PackageSpec, field: &str) {
        let Some((key, raw)) = field.split_once(':') else {
            return;
        };
        let val = raw.trim().trim_matches('"').to_string();
        match key.trim() {
            "name" => spec.name = val,
            "backend" => spec.backend = val,
            "version" => spec.version = Some(val),
            _ => {}
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn reads_the_host_scalar() {
            let value = from_str("host: staging\n").unwrap();
            assert_eq!(value.host.as_deref(), Some("staging"));
            assert!(value.packages.is_empty());
        }

        #[test]
        fn reads_a_packages_sequence_with_defaults() {
            let input = "host: staging\npackages:\n  - name: ripgrep\n  - name: jq\n    backend: apt\n    version: \"1.7\"\n";
            let value = from_str(input).unwrap();
            assert_eq!(value.packages.len(), 2);
            assert_eq!(value.packages[0].name, "ripgrep");
            assert_eq!(value.packages[0].backend, "brew");
            assert_eq!(value.packages[0].version, None);
            assert_eq!(value.packages[1].name, "jq");
            assert_eq!(value.packages[1].backend, "apt");
            assert_eq!(value.packages[1].version.as_deref(), Some("1.7"));
        }

        #[test]
        fn a_host_line_after_packages_still_parses() {
            let input = "packages:\n  - name: ripgrep\nhost: staging\n";
            let value = from_str(input).unwrap();
            assert_eq!(value.host.as_deref(), Some("staging"));
            assert_eq!(value.packages.len(), 1);
        }
    }
}

/// Thin indirection so a Ctrl-C handler can be wired without pulling a
/// signal-handling crate into the dependency graph; `up --foreground`
/// installs a SIGINT/SIGTERM handler via libc directly.
mod ctrlc_like {
    use std::sync::Mutex;

    static HANDLER: Mutex<Option<Box<dyn FnMut() + Send>>> = Mutex::new(None);

    pub fn on_interrupt(handler: impl FnMut() + Send + 'static) {
        *HANDLER.lock().unwrap() = Some(Box::new(handler));
        unsafe {
            libc::signal(libc::SIGINT, handle as usize);
            libc::signal(libc::SIGTERM, handle as usize);
        }
    }

    extern "C" fn handle(_sig: libc::c_int) {
        if let Ok(mut guard) = HANDLER.lock() {
            if let Some(handler) = guard.as_mut() {
                handler();
            }
        }
    }
}
