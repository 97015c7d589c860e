use std::error::Error as StdError;
use std::process::ExitCode;

use clap::Parser;
use hopbox::cli::Cli;

/// Exit codes are deliberately binary (§6): 0 for success, 1 for any other
/// error. Diagnostics are printed to stderr by the reporter before this
/// returns; this is only responsible for the final process exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match hopbox::app::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = StdError::source(&err);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
