//! TCP proxy (C6): loopback listeners that forward streams into the
//! netstack-dialled tunnel, so short-lived client processes that exec a
//! real `ssh`/HTTP client (which only know how to use the OS network
//! stack) can still reach the agent.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use crate::core::cancel::CancelToken;
use crate::core::tunnel::netstack::NetstackEngine;
use crate::error::{Error, Result};

/// One forward rule: a label for diagnostics, a loopback address to bind
/// locally, and the tunnel-side address to dial on each accepted
/// connection.
#[derive(Debug, Clone)]
pub struct ForwardRule {
    pub label: String,
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}

/// Runs one listener per [`ForwardRule`] against a shared netstack engine.
pub struct TcpProxy {
    engine: Arc<NetstackEngine>,
    listeners: Vec<(String, SocketAddr, thread::JoinHandle<()>)>,
    cancel: CancelToken,
}

impl TcpProxy {
    /// Starts a listener for every rule. Returns the bound address for
    /// each rule in the same order (which may differ from the requested
    /// address if port 0 was passed).
    pub fn start(engine: Arc<NetstackEngine>, rules: &[ForwardRule]) -> Result<Self> {
        let cancel = CancelToken::new();
        let mut listeners = Vec::with_capacity(rules.len());
        for rule in rules {
            let listener = TcpListener::bind(rule.local_addr).map_err(|source| Error::Io {
                path: std::path::PathBuf::from(rule.local_addr.to_string()),
                source,
            })?;
            let bound_addr = listener.local_addr().map_err(|source| Error::Io {
                path: std::path::PathBuf::from(rule.local_addr.to_string()),
                source,
            })?;
            listener
                .set_nonblocking(true)
                .map_err(|source| Error::Io { path: std::path::PathBuf::from("listener"), source })?;

            let engine = engine.clone();
            let remote_addr = rule.remote_addr;
            let cancel = cancel.clone();
            let handle = thread::spawn(move || {
                accept_loop(listener, engine, remote_addr, cancel);
            });
            listeners.push((rule.label.clone(), bound_addr, handle));
        }
        Ok(Self { engine, listeners, cancel })
    }

    /// The bound address for the rule at `label`, if any.
    pub fn local_addr(&self, label: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|(l, _, _)| l == label)
            .map(|(_, addr, _)| *addr)
    }

    /// Cancels every listener and all active copies. Idempotent.
    pub fn stop(self) {
        self.cancel.cancel();
        let _ = self.engine;
        for (_, _, handle) in self.listeners {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    engine: Arc<NetstackEngine>,
    remote_addr: SocketAddr,
    cancel: CancelToken,
) {
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => {
                let engine = engine.clone();
                let cancel = cancel.clone();
                thread::spawn(move || {
                    // Errors here are expected on client disconnect and are
                    // deliberately swallowed.
                    let _ = pump(stream, engine, remote_addr, cancel);
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(20));
            }
            Err(_) => break,
        }
    }
}

/// Bidirectionally copies between `local` and a tunnel-dialled stream to
/// `remote_addr` until either side closes. A single thread alternates
/// between the two directions using non-blocking reads on both ends, since
/// [`crate::core::tunnel::netstack::NetstackStream`] is not `Send`-shareable
/// across a reader/writer thread split.
fn pump(
    mut local: TcpStream,
    engine: Arc<NetstackEngine>,
    remote_addr: SocketAddr,
    cancel: CancelToken,
) -> Result<()> {
    let mut remote = engine.dial(&cancel, remote_addr)?;
    local
        .set_nonblocking(true)
        .map_err(|source| Error::Io { path: std::path::PathBuf::from("proxy-stream"), source })?;

    let mut buf = [0u8; 8192];
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let mut did_work = false;

        match local.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                did_work = true;
                if remote.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => break,
        }

        match remote.try_read(&mut buf) {
            Ok(0) => {
                if remote.is_closed() {
                    break;
                }
            }
            Ok(n) => {
                did_work = true;
                if local.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }

        if !did_work {
            thread::sleep(std::time::Duration::from_millis(5));
        }
    }
    Ok(())
}
