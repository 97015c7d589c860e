//! Kernel-TUN tunnel engine: owns an fd handed out by the privileged
//! helper, performs the WireGuard handshake, and pumps packets between the
//! TUN device and a UDP socket bound to the peer endpoint.

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::helper::HelperClient;
use crate::error::{Error, Result};

use super::wireguard::{handshake_initiator, TransportSession};
use super::TunnelConfig;

struct ReadyFlag {
    ready: Mutex<bool>,
}

impl ReadyFlag {
    fn new() -> Self {
        Self { ready: Mutex::new(false) }
    }

    fn signal(&self) {
        *self.ready.lock().unwrap() = true;
    }

    fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap()
    }
}

/// Tunnel engine backed by a real TUN network interface, created via the
/// privileged helper (C4). After `start`, the orchestrator is expected to
/// call back into the helper to assign addresses and install the hosts-file
/// alias (§4.9 step 4).
pub struct KernelEngine {
    config: TunnelConfig,
    helper: HelperClient,
    interface_name: Arc<Mutex<String>>,
    ready: Arc<ReadyFlag>,
    stop: CancelToken,
}

impl KernelEngine {
    pub fn new(config: TunnelConfig, helper: HelperClient) -> Self {
        Self {
            config,
            helper,
            interface_name: Arc::new(Mutex::new(String::new())),
            ready: Arc::new(ReadyFlag::new()),
            stop: CancelToken::new(),
        }
    }

    pub fn start(&mut self, cancel: CancelToken) -> Result<()> {
        if !self.helper.is_reachable() {
            return Err(Error::HelperUnreachable {
                socket: "helper".into(),
            });
        }
        let tun = self.helper.create_tun(self.config.mtu)?;
        *self.interface_name.lock().unwrap() = tun.interface_name.clone();

        let handshake = handshake_initiator(
            &self.config.client_private_key_hex,
            &self.config.peer_public_key_hex,
        )?;
        let session = Arc::new(TransportSession::new(handshake));

        let udp = UdpSocket::bind("0.0.0.0:0").map_err(|source| Error::Io {
            path: std::path::PathBuf::from("udp-socket"),
            source,
        })?;
        udp.connect(self.config.endpoint).map_err(|source| Error::Io {
            path: std::path::PathBuf::from(self.config.endpoint.to_string()),
            source,
        })?;
        udp.set_read_timeout(Some(Duration::from_millis(250)))
            .map_err(|source| Error::Io { path: std::path::PathBuf::from("udp-socket"), source })?;

        let mut tun_file = tun.into_file();
        set_nonblocking(tun_file.as_raw_fd())?;

        self.ready.signal();

        let keepalive = self.config.keepalive;
        let mut last_keepalive = Instant::now();
        let mut buf = vec![0u8; self.config.mtu as usize + 64];

        loop {
            if cancel.is_cancelled() || self.stop.is_cancelled() {
                break;
            }
            let mut did_work = false;
            match tun_file.read(&mut buf) {
                Ok(n) if n > 0 => {
                    did_work = true;
                    let (counter, ciphertext) = session.seal(&buf[..n]);
                    let mut frame = Vec::with_capacity(8 + ciphertext.len());
                    frame.extend_from_slice(&counter.to_le_bytes());
                    frame.extend_from_slice(&ciphertext);
                    let _ = udp.send(&frame);
                }
                _ => {}
            }
            let mut recv_buf = vec![0u8; self.config.mtu as usize + 64];
            if let Ok(n) = udp.recv(&mut recv_buf) {
                if n > 8 {
                    did_work = true;
                    let counter = u64::from_le_bytes(recv_buf[..8].try_into().unwrap());
                    if let Ok(plaintext) = session.open(counter, &recv_buf[8..n]) {
                        let _ = tun_file.write_all(&plaintext);
                    }
                }
            }
            if last_keepalive.elapsed() >= keepalive {
                let (counter, ciphertext) = session.seal(&[]);
                let mut frame = Vec::with_capacity(8 + ciphertext.len());
                frame.extend_from_slice(&counter.to_le_bytes());
                frame.extend_from_slice(&ciphertext);
                let _ = udp.send(&frame);
                last_keepalive = Instant::now();
            }
            if !did_work {
                thread::sleep(Duration::from_millis(10));
            }
        }

        let iface = self.interface_name.lock().unwrap().clone();
        let _ = self.helper.cleanup_tun(&iface);
        Ok(())
    }

    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.ready.is_ready() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(20));
        }
        Err(Error::HandshakeTimeout {
            endpoint: self.config.endpoint.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn interface_name(&self) -> String {
        self.interface_name.lock().unwrap().clone()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

fn set_nonblocking(fd: std::os::fd::RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(Error::Io {
            path: std::path::PathBuf::from("tun-fd"),
            source: std::io::Error::last_os_error(),
        });
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(Error::Io {
            path: std::path::PathBuf::from("tun-fd"),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}
