use crate::cli::HostConnectArgs;
use crate::core::reporter::Reporter;
use crate::core::workflow::setup::{self, SetupArgs};
use crate::error::Result;

pub fn run(args: HostConnectArgs, reporter: &mut dyn Reporter) -> Result<()> {
    let outcome = setup::run(
        SetupArgs {
            name: args.name,
            addr: args.addr,
            user: args.user,
            port: args.port,
            key_path: args.key_path,
        },
        reporter,
    )?;
    let record = super::emit_outcome(outcome, reporter);
    println!("registered `{}` ({})", record.name, record.endpoint);
    Ok(())
}
