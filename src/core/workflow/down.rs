//! `down` (§4.12.2): resolves the host, opens daemon IPC, and issues
//! `Shutdown`. A missing daemon is reported as "no tunnel running", not an
//! internal error.

use crate::core::daemon::DaemonClient;
use crate::core::diagnostics::Outcome;
use crate::error::{Error, Result};

pub fn run(host_name_override: Option<&str>) -> Result<Outcome<()>> {
    let host_name = super::resolve_host(host_name_override)?;
    let client = DaemonClient::connect(&host_name)?;
    client
        .shutdown()
        .map_err(|_| Error::NoTunnelRunning { name: host_name })?;
    Ok(Outcome::new(()))
}
