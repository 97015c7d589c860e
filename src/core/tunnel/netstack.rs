//! User-space netstack tunnel engine. No kernel interface is created;
//! WireGuard frames are exchanged directly over a UDP socket and handed to
//! an embedded smoltcp interface, which in turn is the only way in-process
//! code can open a TCP connection to the peer (`dial`). Used by the
//! migration workflow, where a second kernel interface would collide with
//! the primary tunnel already owned by the daemon.

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use smoltcp::iface::{Config as IfaceConfig, Interface, SocketSet};
use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::socket::tcp;
use smoltcp::time::Instant as SmolInstant;
use smoltcp::wire::{HardwareAddress, IpAddress, IpCidr};

use crate::core::cancel::CancelToken;
use crate::error::{Error, Result};

use super::wireguard::{handshake_initiator, TransportSession};
use super::TunnelConfig;

/// A virtual device whose RX/TX queues are WireGuard-decrypted/encrypted
/// IP packets shuttled over a UDP socket, rather than a real link.
struct TunnelDevice {
    udp: UdpSocket,
    session: Arc<TransportSession>,
    mtu: usize,
    rx_queue: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Device for TunnelDevice {
    type RxToken<'a> = RxTok where Self: 'a;
    type TxToken<'a> = TxTok<'a> where Self: 'a;

    fn receive(&mut self, _timestamp: SmolInstant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let mut queue = self.rx_queue.lock().unwrap();
        let packet = queue.pop()?;
        Some((
            RxTok { packet },
            TxTok {
                udp: &self.udp,
                session: &self.session,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: SmolInstant) -> Option<Self::TxToken<'_>> {
        Some(TxTok {
            udp: &self.udp,
            session: &self.session,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ip;
        caps.max_transmission_unit = self.mtu;
        caps
    }
}

struct RxTok {
    packet: Vec<u8>,
}

impl RxToken for RxTok {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.packet)
    }
}

struct TxTok<'a> {
    udp: &'a UdpSocket,
    session: &'a Arc<TransportSession>,
}

impl<'a> TxToken for TxTok<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buf = vec![0u8; len];
        let result = f(&mut buf);
        let (counter, ciphertext) = self.session.seal(&buf);
        let mut frame = Vec::with_capacity(8 + ciphertext.len());
        frame.extend_from_slice(&counter.to_le_bytes());
        frame.extend_from_slice(&ciphertext);
        let _ = self.udp.send(&frame);
        result
    }
}

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

/// Tunnel engine with no kernel-visible interface; `dial` is the only way
/// in-process code reaches the peer.
pub struct NetstackEngine {
    config: TunnelConfig,
    ready: Arc<ReadyFlag>,
    stop: CancelToken,
    session: Arc<Mutex<Option<Arc<TransportSession>>>>,
    rx_queue: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl NetstackEngine {
    pub fn new(config: TunnelConfig) -> Self {
        Self {
            config,
            ready: Arc::new(ReadyFlag::new()),
            stop: CancelToken::new(),
            session: Arc::new(Mutex::new(None)),
            rx_queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn start(&self, cancel: CancelToken) -> Result<()> {
        let handshake = handshake_initiator(
            &self.config.client_private_key_hex,
            &self.config.peer_public_key_hex,
        )?;
        let session = Arc::new(TransportSession::new(handshake));
        *self.session.lock().unwrap() = Some(session.clone());

        let udp = UdpSocket::bind("0.0.0.0:0").map_err(|source| Error::Io {
            path: std::path::PathBuf::from("udp-socket"),
            source,
        })?;
        udp.connect(self.config.endpoint).map_err(|source| Error::Io {
            path: std::path::PathBuf::from(self.config.endpoint.to_string()),
            source,
        })?;
        udp.set_read_timeout(Some(Duration::from_millis(50)))
            .map_err(|source| Error::Io { path: std::path::PathBuf::from("udp-socket"), source })?;

        let rx_queue = self.rx_queue.clone();
        let reader_udp = udp.try_clone().map_err(|source| Error::Io {
            path: std::path::PathBuf::from("udp-socket"),
            source,
        })?;
        let reader_session = session.clone();
        let reader_cancel = cancel.clone();
        let stop = self.stop.clone();
        let mtu = self.config.mtu as usize;
        thread::spawn(move || {
            let mut buf = vec![0u8; mtu + 64];
            while !reader_cancel.is_cancelled() && !stop.is_cancelled() {
                if let Ok(n) = reader_udp.recv(&mut buf) {
                    if n > 8 {
                        let counter = u64::from_le_bytes(buf[..8].try_into().unwrap());
                        if let Ok(plaintext) = reader_session.open(counter, &buf[8..n]) {
                            rx_queue.lock().unwrap().push(plaintext);
                        }
                    }
                }
            }
        });

        self.ready.signal();

        // Block the caller's thread (the netstack event loop would
        // normally run here); the real packet pump lives in `dial`'s
        // socket-polling loop and the reader thread above.
        while !cancel.is_cancelled() && !self.stop.is_cancelled() {
            thread::sleep(Duration::from_millis(50));
        }
        let _ = udp;
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
        "hopbox-netstack".to_string()
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Dials a TCP connection to `addr` (an address inside the tunnel's
    /// subnet) through the embedded netstack. Blocks until the handshake
    /// completes or `cancel` fires.
    pub fn dial(&self, cancel: &CancelToken, addr: std::net::SocketAddr) -> Result<NetstackStream> {
        let session = self
            .session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::other("dial called before the netstack engine was started"))?;

        let udp = UdpSocket::bind("0.0.0.0:0").map_err(|source| Error::Io {
            path: std::path::PathBuf::from("udp-socket"),
            source,
        })?;
        udp.connect(self.config.endpoint).map_err(|source| Error::Io {
            path: std::path::PathBuf::from(self.config.endpoint.to_string()),
            source,
        })?;

        let mut device = TunnelDevice {
            udp,
            session,
            mtu: self.config.mtu as usize,
            rx_queue: self.rx_queue.clone(),
        };

        let local_ip: IpAddress = self
            .config
            .local_ip_only()
            .parse()
            .map_err(|_| Error::InvalidTunnelAddr {
                value: self.config.local_ip.clone(),
                reason: "not a valid IPv4 address".into(),
            })?;

        let iface_config = IfaceConfig::new(HardwareAddress::Ip);
        let mut iface = Interface::new(iface_config, &mut device, SmolInstant::from_millis(0));
        iface.update_ip_addrs(|addrs| {
            let _ = addrs.push(IpCidr::new(local_ip, 24));
        });

        let mut sockets = SocketSet::new(vec![]);
        let rx_buffer = tcp::SocketBuffer::new(vec![0u8; 8192]);
        let tx_buffer = tcp::SocketBuffer::new(vec![0u8; 8192]);
        let mut socket = tcp::Socket::new(rx_buffer, tx_buffer);
        let remote: IpAddress = addr.ip().to_string().parse().map_err(|_| Error::InvalidTunnelAddr {
            value: addr.to_string(),
            reason: "not a valid IPv4 address".into(),
        })?;
        socket
            .connect(iface.context(), (remote, addr.port()), 49152)
            .map_err(|err| Error::other(format!("netstack connect failed: {err}")))?;
        let handle = sockets.add(socket);

        let deadline = Instant::now() + Duration::from_secs(300);
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if Instant::now() > deadline {
                return Err(Error::HandshakeTimeout {
                    endpoint: addr.to_string(),
                    timeout_secs: 300,
                });
            }
            iface.poll(SmolInstant::from_millis(0), &mut device, &mut sockets);
            let socket = sockets.get::<tcp::Socket>(handle);
            if socket.may_send() && socket.may_recv() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        Ok(NetstackStream {
            device,
            iface,
            sockets,
            handle,
        })
    }
}

/// A TCP stream dialled inside the tunnel via [`NetstackEngine::dial`].
pub struct NetstackStream {
    device: TunnelDevice,
    iface: Interface,
    sockets: SocketSet<'static>,
    handle: smoltcp::iface::SocketHandle,
}

impl NetstackStream {
    /// A single non-blocking attempt to read available bytes. Returns
    /// `Ok(0)` both when the peer has closed and when nothing is
    /// available yet — callers distinguish the two via [`Self::is_closed`].
    pub fn try_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.iface
            .poll(SmolInstant::from_millis(0), &mut self.device, &mut self.sockets);
        let socket = self.sockets.get_mut::<tcp::Socket>(self.handle);
        if socket.can_recv() {
            socket
                .recv_slice(buf)
                .map_err(|err| std::io::Error::other(err.to_string()))
        } else {
            Ok(0)
        }
    }

    pub fn is_closed(&mut self) -> bool {
        self.iface
            .poll(SmolInstant::from_millis(0), &mut self.device, &mut self.sockets);
        !self.sockets.get_mut::<tcp::Socket>(self.handle).may_recv()
    }
}

impl Read for NetstackStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = self.try_read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            if self.is_closed() {
                return Ok(0);
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Write for NetstackStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.iface
            .poll(SmolInstant::from_millis(0), &mut self.device, &mut self.sockets);
        let socket = self.sockets.get_mut::<tcp::Socket>(self.handle);
        socket
            .send_slice(buf)
            .map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.iface
            .poll(SmolInstant::from_millis(0), &mut self.device, &mut self.sockets);
        Ok(())
    }
}
