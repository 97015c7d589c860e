use crate::cli::HostCommands;
use crate::core::host;
use crate::core::reporter::Reporter;
use crate::core::workflow::setup::{self, SetupArgs};
use crate::error::Result;

pub fn run(cmd: HostCommands, reporter: &mut dyn Reporter) -> Result<()> {
    match cmd {
        HostCommands::Add(args) => {
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
        HostCommands::Rm { name } => {
            host::delete(&name)?;
            println!("removed `{name}`");
            Ok(())
        }
        HostCommands::Ls => {
            let names = host::list()?;
            let default = host::load_global()?.default_host;
            if names.is_empty() {
                println!("no hosts configured");
            }
            for name in names {
                let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
                println!("{marker} {name}");
            }
            Ok(())
        }
        HostCommands::Default { name } => match name {
            Some(name) => {
                host::set_default(&name)?;
                println!("default host set to `{name}`");
                Ok(())
            }
            None => {
                match host::load_global()?.default_host {
                    Some(name) => println!("{name}"),
                    None => println!("no default host configured"),
                }
                Ok(())
            }
        },
    }
}
