use crate::cli::MigrateArgs as CliMigrateArgs;
use crate::core::reporter::Reporter;
use crate::core::workflow;
use crate::core::workflow::migrate::{self, MigrateArgs};
use crate::error::Result;

pub fn run(args: CliMigrateArgs, host_override: Option<&str>, reporter: &mut dyn Reporter) -> Result<()> {
    let source_host = workflow::resolve_host(host_override)?;
    let outcome = migrate::run(
        &source_host,
        MigrateArgs {
            target: args.target,
            addr: args.addr,
            user: args.user,
            port: args.port,
            key_path: args.key_path,
        },
        reporter,
    )?;
    super::emit_outcome(outcome, reporter);
    Ok(())
}
