//! CLI command handlers (C14): translate parsed flags into calls on the
//! workflow orchestrators and render their events/diagnostics. Every public
//! `run_*` here returns `core::error::Result<()>`; `main` is the only place
//! that turns that into a process exit code.

mod daemon;
mod host;
mod migrate;
mod rotate;
mod setup;
mod status;
mod up;
mod upgrade;

use crate::cli::{Cli, Commands};
use crate::core::diagnostics::Outcome;
use crate::core::events::Event;
use crate::core::reporter::{Reporter, TerminalReporter};
use crate::error::Result;

/// Renders an [`Outcome`]'s diagnostics through `reporter` (as ordinary
/// `Message` events, since they carry the same severity/text shape) and
/// hands back the value the caller actually wanted.
pub(crate) fn emit_outcome<T>(outcome: Outcome<T>, reporter: &mut dyn Reporter) -> T {
    for diagnostic in outcome.diagnostics {
        let text = match diagnostic.help {
            Some(help) => format!("{} ({help})", diagnostic.message),
            None => diagnostic.message,
        };
        reporter.report(Event::Message { severity: diagnostic.severity, text });
    }
    outcome.value
}

pub fn run(cli: Cli) -> Result<()> {
    let host_override = cli.host.as_deref();
    let mut reporter = TerminalReporter::with_verbose(cli.verbose);

    match cli.command {
        None => {
            print_help();
            Ok(())
        }
        Some(Commands::Setup(args)) => setup::run(args, &mut reporter),
        Some(Commands::Up(args)) => up::run(args, host_override, &mut reporter),
        Some(Commands::Down) => {
            let outcome = crate::core::workflow::down::run(host_override)?;
            emit_outcome(outcome, &mut reporter);
            Ok(())
        }
        Some(Commands::Status) => status::run(host_override),
        Some(Commands::Rotate) => rotate::run(host_override, &mut reporter).map(|_| ()),
        Some(Commands::Upgrade(args)) => upgrade::run(args, host_override, &mut reporter),
        Some(Commands::To(args)) => migrate::run(args, host_override, &mut reporter),
        Some(Commands::Host(cmd)) => host::run(cmd, &mut reporter),
        Some(Commands::Daemon(cmd)) => daemon::run(cmd, &mut reporter),
    }
}

fn print_help() {
    use clap::CommandFactory;
    let mut command = Cli::command();
    let _ = command.print_help();
    println!();
}
