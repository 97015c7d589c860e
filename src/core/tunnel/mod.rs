//! Tunnel engines (C5): two realizations of the same contract, a WireGuard
//! data plane reachable either through a kernel TUN interface or through an
//! in-process user-space netstack. Per the design notes, which engine is
//! live is known at the call site (`up` uses kernel, `to` uses netstack),
//! so a tagged enum is used instead of a trait-object interface.

pub mod kernel;
pub mod netstack;
pub mod wireguard;

use std::net::SocketAddr;
use std::time::Duration;

use crate::core::cancel::CancelToken;
use crate::core::crypto;
use crate::core::host::HostRecord;
use crate::error::{Error, Result};

pub use kernel::KernelEngine;
pub use netstack::NetstackEngine;

pub const DEFAULT_MTU: u16 = 1420;
pub const PERSISTENT_KEEPALIVE: Duration = Duration::from_secs(25);
pub const DEFAULT_WIREGUARD_PORT: u16 = 51820;

/// Parameters for one WireGuard session, derived from a [`HostRecord`] by a
/// pure transform: decode keys from base64, re-encode as hex. Fails on
/// invalid key length; never fails for any other reason.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub endpoint: SocketAddr,
    pub client_private_key_hex: String,
    pub peer_public_key_hex: String,
    /// `10.10.0.1/24`-style local address.
    pub local_ip: String,
    /// `10.10.0.2`-style peer address, without mask.
    pub peer_ip: String,
    pub keepalive: Duration,
    pub mtu: u16,
}

impl TunnelConfig {
    pub fn from_host_record(record: &HostRecord) -> Result<Self> {
        let endpoint: SocketAddr = record.endpoint.parse().map_err(|_| Error::InvalidTunnelAddr {
            value: record.endpoint.clone(),
            reason: "expected `host:port`".into(),
        })?;
        let client_private_key_hex =
            crypto::base64_to_hex("client_private_key", &record.client_private_key)?;
        let peer_public_key_hex = crypto::base64_to_hex("peer_public_key", &record.peer_public_key)?;
        Ok(Self {
            endpoint,
            client_private_key_hex,
            peer_public_key_hex,
            local_ip: record.client_tunnel_ip.clone(),
            peer_ip: record.agent_tunnel_ip.clone(),
            keepalive: PERSISTENT_KEEPALIVE,
            mtu: DEFAULT_MTU,
        })
    }

    /// The peer address without its mask, for routing/dialling purposes.
    pub fn peer_ip_only(&self) -> &str {
        &self.peer_ip
    }

    pub fn local_ip_only(&self) -> &str {
        self.local_ip.split('/').next().unwrap_or(&self.local_ip)
    }
}

/// Which data-plane realization is backing a running tunnel.
pub enum TunnelEngine {
    Kernel(KernelEngine),
    Netstack(NetstackEngine),
}

impl TunnelEngine {
    /// Runs until `cancel` fires or a fatal error occurs.
    pub fn start(&mut self, cancel: CancelToken) -> Result<()> {
        match self {
            TunnelEngine::Kernel(engine) => engine.start(cancel),
            TunnelEngine::Netstack(engine) => engine.start(cancel),
        }
    }

    /// Blocks until the tunnel is usable, or the timeout elapses.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        match self {
            TunnelEngine::Kernel(engine) => engine.wait_ready(timeout),
            TunnelEngine::Netstack(engine) => engine.wait_ready(timeout),
        }
    }

    /// Non-empty only after `wait_ready` has returned successfully.
    pub fn interface_name(&self) -> String {
        match self {
            TunnelEngine::Kernel(engine) => engine.interface_name(),
            TunnelEngine::Netstack(engine) => engine.interface_name(),
        }
    }

    /// Idempotent; unblocks a concurrent `start`.
    pub fn stop(&self) {
        match self {
            TunnelEngine::Kernel(engine) => engine.stop(),
            TunnelEngine::Netstack(engine) => engine.stop(),
        }
    }
}
