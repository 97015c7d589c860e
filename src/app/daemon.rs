use crate::cli::DaemonCommands;
use crate::core::daemon::DaemonClient;
use crate::core::reporter::{JsonlLogReporter, Reporter};
use crate::core::workflow;
use crate::error::{Error, Result};

pub fn run(cmd: DaemonCommands, reporter: &mut dyn Reporter) -> Result<()> {
    match cmd {
        DaemonCommands::Start { host, workspace } => start(&host, workspace.as_deref()),
        DaemonCommands::Stop { host } => {
            let host_name = workflow::resolve_host(host.as_deref())?;
            let client = DaemonClient::connect(&host_name)?;
            client.shutdown().map_err(|_| Error::NoTunnelRunning { name: host_name })
        }
        DaemonCommands::Status { host } => {
            let _ = reporter;
            crate::app::status::run(host.as_deref())
        }
    }
}

/// Entry point for the detached process spawned by `up`: installs the
/// interrupt handler, runs the post-up phases, then blocks in the daemon's
/// own lifecycle until shutdown. Logs to the per-host JSONL event log
/// rather than a terminal, since there usually isn't one attached.
fn start(host: &str, workspace: Option<&std::path::Path>) -> Result<()> {
    let record = crate::core::host::load(host)?;
    let log_path = crate::core::paths::log_path(host)?;
    let mut log_reporter = JsonlLogReporter::open(&log_path).map_err(|source| Error::Io {
        path: log_path,
        source,
    })?;

    let outcome = crate::core::workflow::up::run_foreground(&record, workspace, &mut log_reporter)?;
    crate::app::emit_outcome(outcome, &mut log_reporter);
    Ok(())
}
