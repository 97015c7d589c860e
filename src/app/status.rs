use std::time::{SystemTime, UNIX_EPOCH};

use crate::core::daemon::DaemonClient;
use crate::core::workflow;
use crate::error::Result;

pub fn run(host_override: Option<&str>) -> Result<()> {
    let host_name = workflow::resolve_host(host_override)?;
    let client = DaemonClient::connect(&host_name)?;
    match client.status() {
        Ok(status) => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(status.started_at);
            println!("host:      {host_name}");
            println!("interface: {}", status.interface);
            println!("pid:       {}", status.pid);
            println!("connected: {}", status.connected);
            println!("uptime:    {}s", now.saturating_sub(status.started_at));
            Ok(())
        }
        Err(_) => {
            println!("host:      {host_name}");
            println!("tunnel:    not running");
            Ok(())
        }
    }
}
