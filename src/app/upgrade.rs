use crate::cli::UpgradeArgs as CliUpgradeArgs;
use crate::core::reporter::Reporter;
use crate::core::workflow::upgrade::{self, UpgradeArgs};
use crate::error::{Error, Result};

const HELPER_PATH: &str = "/usr/local/libexec/hopbox-helper";

pub fn run(args: CliUpgradeArgs, host_override: Option<&str>, reporter: &mut dyn Reporter) -> Result<()> {
    let current_exe = std::env::current_exe().map_err(|source| Error::Io {
        path: std::path::PathBuf::from("/proc/self/exe"),
        source,
    })?;
    let helper_path = std::env::var("HOPBOX_HELPER_BINARY")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from(HELPER_PATH));

    let outcome = upgrade::run(
        UpgradeArgs {
            version: args.version,
            local: args.local,
            client_only: args.client_only,
            agent_only: args.agent_only,
            helper_only: args.helper_only,
        },
        host_override,
        current_exe,
        helper_path,
        reporter,
    )?;
    super::emit_outcome(outcome, reporter);
    Ok(())
}
