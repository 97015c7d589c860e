//! `upgrade` (§4.12.5): in-place replacement of the client, the helper
//! (macOS only), and the remote agent. Each subcomponent is independently
//! atomic; a failure in one does not revert the others.

use std::env::consts::{ARCH, OS};
use std::path::{Path, PathBuf};

use crate::core::release;
use crate::core::reporter::Reporter;
use crate::core::ssh;
use crate::core::steps::{Phase, Step, Workflow};
use crate::core::cancel::CancelToken;
use crate::core::diagnostics::{Diagnostic, Outcome, Severity};
use crate::core::host::{self, HostRecord};
use crate::error::{Error, Result};

const RELEASE_BASE: &str = "https://github.com/hopbox-dev/hopbox/releases/download";
const LATEST_API: &str = "https://api.github.com/repos/hopbox-dev/hopbox/releases/latest";

#[derive(Default)]
pub struct UpgradeArgs {
    pub version: Option<String>,
    pub local: bool,
    pub client_only: bool,
    pub agent_only: bool,
    pub helper_only: bool,
}

const PACKAGE_MANAGER_PREFIXES: [&str; 4] = ["/Cellar/", "/homebrew/", "linuxbrew/", "/nix/store/"];

fn resolve_target_version(args: &UpgradeArgs) -> Result<Option<String>> {
    if let Some(v) = &args.version {
        return Ok(Some(v.clone()));
    }
    if args.local {
        return Ok(None);
    }
    release::latest_version(LATEST_API).map(Some)
}

fn upgrade_client(version: &str, current_exe: &Path) -> Result<Option<Diagnostic>> {
    let canonical = std::fs::canonicalize(current_exe).unwrap_or_else(|_| current_exe.to_path_buf());
    let path_str = canonical.to_string_lossy();
    if PACKAGE_MANAGER_PREFIXES.iter().any(|prefix| path_str.contains(prefix)) {
        return Ok(Some(Diagnostic::new(
            Severity::Warning,
            "hop was installed via a package manager; use that manager to upgrade instead",
        )));
    }
    if env!("CARGO_PKG_VERSION") == version {
        return Ok(None);
    }

    let artifact = release::artifact_name("hop", version, OS, ARCH);
    let artifact_url = format!("{RELEASE_BASE}/v{version}/{artifact}");
    let checksums_url = format!("{RELEASE_BASE}/v{version}/checksums.txt");

    let body = release::download(&artifact_url)?;
    let checksums_body = release::download(&checksums_url)?;
    let checksums = release::parse_checksums(&String::from_utf8_lossy(&checksums_body));
    release::verify_checksum(&checksums, &artifact, &body)?;
    release::atomic_replace(&canonical, &body, 0o755)?;
    Ok(None)
}

fn upgrade_helper(version: &str, helper_path: &Path) -> Result<()> {
    if OS != "macos" {
        return Ok(());
    }
    let artifact = release::artifact_name("hopbox-helper", version, OS, ARCH);
    let artifact_url = format!("{RELEASE_BASE}/v{version}/{artifact}");
    let checksums_url = format!("{RELEASE_BASE}/v{version}/checksums.txt");

    let body = release::download(&artifact_url)?;
    let checksums_body = release::download(&checksums_url)?;
    let checksums = release::parse_checksums(&String::from_utf8_lossy(&checksums_body));
    release::verify_checksum(&checksums, &artifact, &body)?;

    let tmp_path = helper_path.with_extension("upgrade-tmp");
    let result = (|| -> Result<()> {
        std::fs::write(&tmp_path, &body).map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
        let mut perms = std::fs::metadata(&tmp_path)
            .map_err(|source| Error::Io { path: tmp_path.clone(), source })?
            .permissions();
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(0o755);
        std::fs::set_permissions(&tmp_path, perms).map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
        let status = std::process::Command::new("sudo")
            .arg(&tmp_path)
            .arg("--install")
            .status()
            .map_err(|source| Error::Io { path: tmp_path.clone(), source })?;
        if !status.success() {
            return Err(Error::other("helper install command exited non-zero"));
        }
        Ok(())
    })();
    let _ = std::fs::remove_file(&tmp_path);
    result
}

fn upgrade_agent(record: &HostRecord, _version: &str) -> Result<String> {
    let session = ssh::pinned_connect(
        &record.ssh_host,
        record.ssh_port,
        &record.ssh_user,
        record.ssh_key_path.as_deref(),
        &record.ssh_host_key,
    )?;
    let local_path = std::env::var("HOP_AGENT_BINARY").unwrap_or_else(|_| "hop-agent".to_string());
    let data = std::fs::read(&local_path).unwrap_or_default();
    ssh::upload(&session, "/usr/local/bin/hop-agent", &data, 0o755)?;
    ssh::run_remote(&session, "systemctl daemon-reload && systemctl restart hop-agent")?;
    let output = ssh::run_remote(&session, "hop-agent version")?;
    Ok(output.trim().to_string())
}

pub fn run(
    args: UpgradeArgs,
    host_name_override: Option<&str>,
    current_exe: PathBuf,
    helper_path: PathBuf,
    reporter: &mut dyn Reporter,
) -> Result<Outcome<()>> {
    let version = resolve_target_version(&args)?;
    let do_all = !args.client_only && !args.agent_only && !args.helper_only;
    let cancel = CancelToken::new();
    let diagnostics = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut steps = Vec::new();

    if do_all || args.client_only {
        if let Some(version) = version.clone() {
            let current_exe = current_exe.clone();
            let diagnostics = diagnostics.clone();
            steps.push(Step::fatal("Upgrade client", move |_cancel| {
                if let Some(diagnostic) = upgrade_client(&version, &current_exe)? {
                    diagnostics.lock().unwrap().push(diagnostic);
                }
                Ok(())
            }));
        }
    }

    if (do_all || args.helper_only) && OS == "macos" {
        if let Some(version) = version.clone() {
            let helper_path = helper_path.clone();
            steps.push(Step::fatal("Upgrade helper", move |_cancel| {
                upgrade_helper(&version, &helper_path)
            }));
        }
    }

    if do_all || args.agent_only {
        if let Some(version) = version.clone() {
            let host_name = super::resolve_host(host_name_override)?;
            let record = host::load(&host_name)?;
            steps.push(Step::non_fatal("Upgrade agent", move |_cancel| {
                let new_version = upgrade_agent(&record, &version)?;
                println!("agent is now running version {new_version}");
                Ok(())
            }));
        }
    }

    let workflow = Workflow::new(vec![Phase::new("Upgrade", steps)]);
    workflow.run(&cancel, reporter)?;
    let diagnostics = std::sync::Arc::try_unwrap(diagnostics)
        .map(|m| m.into_inner().unwrap())
        .unwrap_or_default();
    Ok(Outcome::with_diagnostics((), diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_target_version_prefers_explicit_version() {
        let args = UpgradeArgs { version: Some("9.9.9".into()), local: true, ..UpgradeArgs::default() };
        assert_eq!(resolve_target_version(&args).unwrap(), Some("9.9.9".to_string()));
    }

    #[test]
    fn resolve_target_version_local_skips_network_lookup() {
        let args = UpgradeArgs { local: true, ..UpgradeArgs::default() };
        assert_eq!(resolve_target_version(&args).unwrap(), None);
    }

    #[test]
    fn upgrade_client_warns_instead_of_replacing_under_a_package_manager() {
        let diagnostic = upgrade_client("9.9.9", Path::new("/nix/store/abc123-hop/bin/hop"))
            .unwrap()
            .expect("package-manager install should produce a warning diagnostic");
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert!(diagnostic.message.contains("package manager"));
    }

    #[test]
    fn upgrade_client_is_a_noop_when_already_on_the_target_version() {
        let current = env!("CARGO_PKG_VERSION");
        let diagnostic = upgrade_client(current, Path::new("/usr/local/bin/hop")).unwrap();
        assert!(diagnostic.is_none());
    }
}
