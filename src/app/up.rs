use crate::cli::UpArgs;
use crate::core::reporter::Reporter;
use crate::core::workflow::up;
use crate::error::Result;

const DEFAULT_MANIFEST: &str = "workspace.yaml";

pub fn run(args: UpArgs, host_override: Option<&str>, reporter: &mut dyn Reporter) -> Result<()> {
    let workspace_path = args
        .workspace
        .or_else(|| {
            let default = std::path::PathBuf::from(DEFAULT_MANIFEST);
            default.is_file().then_some(default)
        });

    let current_exe = std::env::current_exe().map_err(|source| crate::error::Error::Io {
        path: std::path::PathBuf::from("/proc/self/exe"),
        source,
    })?;

    if args.foreground {
        let host_name = crate::core::workflow::resolve_host(host_override)?;
        let record = crate::core::host::load(&host_name)?;
        let outcome = up::run_foreground(&record, workspace_path.as_deref(), reporter)?;
        super::emit_outcome(outcome, reporter);
        return Ok(());
    }

    let outcome = up::run(host_override, workspace_path.as_deref(), &current_exe, reporter)?;
    super::emit_outcome(outcome, reporter);
    Ok(())
}
