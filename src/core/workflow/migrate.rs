//! `to <target> --addr …` (§4.12.4): workspace migration. Snapshots the
//! source, bootstraps the target, brings up a throwaway netstack tunnel to
//! restore onto it, then switches the default host — with compensating
//! cleanup if anything after bootstrap fails.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::diagnostics::Outcome;
use crate::core::host;
use crate::core::reporter::Reporter;
use crate::core::rpc::RpcClient;
use crate::core::tunnel::netstack::{NetstackEngine, NetstackStream};
use crate::core::tunnel::TunnelConfig;
use crate::error::{Error, Result};

use super::setup::{self, SetupArgs};

const AGENT_API_PORT: u16 = 4200;
const PROBE_DEADLINE: Duration = Duration::from_secs(10);
const PROBE_RETRY: Duration = Duration::from_millis(500);
const NETSTACK_START_TIMEOUT: Duration = Duration::from_secs(300);

pub struct MigrateArgs {
    pub target: String,
    pub addr: String,
    pub user: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
}

/// Prompts `y/N` on the current terminal. Used for the pre-flight
/// confirmation, which must happen outside the step runner so the TOFU
/// passphrase prompt afterwards can also own the terminal.
fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).ok();
    answer.trim().eq_ignore_ascii_case("y")
}

/// Sends a bare-bones HTTP/1.1 request over an already-dialled
/// [`NetstackStream`] and returns the response body. `RpcClient` can't be
/// reused here since it drives requests through `ureq`'s own OS-socket
/// transport, which cannot see addresses that only exist inside the
/// embedded netstack.
fn http_request(stream: &mut NetstackStream, method: &str, path: &str, body: &str) -> Result<String> {
    let request = if body.is_empty() {
        format!("{method} {path} HTTP/1.1\r\nHost: hopbox\r\nConnection: close\r\n\r\n")
    } else {
        format!(
            "{method} {path} HTTP/1.1\r\nHost: hopbox\r\nConnection: close\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
    };
    stream
        .write_all(request.as_bytes())
        .map_err(|source| Error::Io { path: PathBuf::from("netstack-stream"), source })?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|source| Error::Io { path: PathBuf::from("netstack-stream"), source })?;
    parse_http_response(&raw)
}

/// Splits a raw HTTP/1.1 response into its body, rejecting anything but a
/// `200` status line.
fn parse_http_response(raw: &[u8]) -> Result<String> {
    let text = String::from_utf8_lossy(raw);
    let mut parts = text.splitn(2, "\r\n\r\n");
    let status_line = parts.next().unwrap_or_default();
    let payload = parts.next().unwrap_or_default();

    let status_ok = status_line
        .lines()
        .next()
        .map(|line| line.contains(" 200 "))
        .unwrap_or(false);
    if !status_ok {
        return Err(Error::other(format!("agent returned a non-200 response: {status_line}")));
    }
    Ok(payload.to_string())
}

/// Whether the target host's saved config should be rolled back after a
/// failed migration: only once bootstrap actually wrote it, and only if the
/// final default-host switch never happened (past that point the target is
/// the live host and must be kept).
fn should_rollback_target(migration_failed: bool, target_config_saved: bool, migration_done: bool) -> bool {
    migration_failed && target_config_saved && !migration_done
}

pub fn run(source_host: &str, args: MigrateArgs, reporter: &mut dyn Reporter) -> Result<Outcome<()>> {
    if source_host == args.target {
        return Err(Error::other("migration target must differ from the source host"));
    }

    println!(
        "This will snapshot `{source_host}`, bootstrap `{}` at {}, restore the snapshot, and make it the new default host.",
        args.target, args.addr
    );
    if !confirm("Proceed?") {
        return Err(Error::UserDeclined);
    }

    let source_record = host::load(source_host)?;

    let mut target_config_saved = false;
    let mut migration_done = false;
    let mut diagnostics = Vec::new();

    let result = (|| -> Result<()> {
        // Snapshot phase: runs against the source over its existing tunnel.
        let source_state = crate::core::state::load(source_host)?;
        let source_base_url = crate::core::rpc::resolve_base_url(source_state.as_ref(), &source_record);
        let source_client = RpcClient::new(source_base_url);

        let snapshot_id = source_client.snap_create()?;
        reporter.report(crate::core::events::Event::Message {
            severity: crate::core::diagnostics::Severity::Info,
            text: format!("created snapshot {snapshot_id} on {source_host}"),
        });

        // Bootstrap phase: TOFU-connect to the target and save its record.
        let setup_outcome = setup::run(
            SetupArgs {
                name: args.target.clone(),
                addr: args.addr.clone(),
                user: args.user.clone(),
                port: args.port,
                key_path: args.key_path.clone(),
            },
            reporter,
        )?;
        let target_record = setup_outcome.value;
        diagnostics.extend(setup_outcome.diagnostics);
        target_config_saved = true;

        // Restore phase: bring up a throwaway netstack tunnel to the
        // target and restore the snapshot over it.
        let config = TunnelConfig::from_host_record(&target_record)?;
        let engine = Arc::new(NetstackEngine::new(config.clone()));
        let engine_for_thread = engine.clone();
        let cancel = CancelToken::new();
        let engine_cancel = cancel.clone();
        let handle = std::thread::spawn(move || {
            let _ = engine_for_thread.start(engine_cancel);
        });
        engine.wait_ready(NETSTACK_START_TIMEOUT)?;

        let agent_addr: SocketAddr = format!("{}:{AGENT_API_PORT}", config.peer_ip_only())
            .parse()
            .map_err(|_| Error::InvalidTunnelAddr {
                value: config.peer_ip.clone(),
                reason: "not a valid socket address".into(),
            })?;

        let deadline = Instant::now() + PROBE_DEADLINE;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match engine.dial(&cancel, agent_addr) {
                Ok(mut probe_stream) => {
                    if http_request(&mut probe_stream, "GET", "/health", "").is_ok() {
                        break;
                    }
                }
                Err(_) => {}
            }
            if Instant::now() > deadline {
                cancel.cancel();
                let _ = handle.join();
                return Err(Error::other("target agent did not become healthy in time"));
            }
            std::thread::sleep(PROBE_RETRY);
        }

        let restore_body = format!(r#"{{"method":"snap.restore","params":{{"id":"{snapshot_id}"}}}}"#);
        let restore_result = engine
            .dial(&cancel, agent_addr)
            .and_then(|mut stream| http_request(&mut stream, "POST", "/rpc", &restore_body));

        cancel.cancel();
        let _ = handle.join();

        if let Err(err) = restore_result {
            reporter.report(crate::core::events::Event::Message {
                severity: crate::core::diagnostics::Severity::Error,
                text: format!(
                    "restore failed: {err}. The snapshot `{snapshot_id}` is preserved on `{source_host}`; retry with `hop host default {source_host}` then re-run `to` once the issue is resolved."
                ),
            });
            return Err(err);
        }

        // Switch phase.
        host::set_default(&args.target)?;
        migration_done = true;
        Ok(())
    })();

    if should_rollback_target(result.is_err(), target_config_saved, migration_done) {
        let _ = host::delete(&args.target);
    }

    result?;
    Ok(Outcome::with_diagnostics((), diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_http_response_extracts_body_on_200() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        assert_eq!(parse_http_response(raw).unwrap(), "hello");
    }

    #[test]
    fn parse_http_response_rejects_non_200() {
        let raw = b"HTTP/1.1 500 Internal Server Error\r\n\r\noops";
        assert!(parse_http_response(raw).is_err());
    }

    #[test]
    fn should_rollback_target_only_before_the_switch_completes() {
        assert!(should_rollback_target(true, true, false));
        assert!(!should_rollback_target(true, false, false), "never wrote a target config, nothing to undo");
        assert!(!should_rollback_target(true, true, true), "migration completed, target is now live");
        assert!(!should_rollback_target(false, true, true));
    }
}
