//! `setup <name> --addr … [--user/--port/--key]` (§4.12.3): runs the SSH
//! bootstrap key-exchange sequence under the step runner, then persists a
//! new [`HostRecord`] and sets it as the default host if none is set.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::core::cancel::CancelToken;
use crate::core::crypto::Keypair;
use crate::core::diagnostics::Outcome;
use crate::core::host::{self, HostRecord};
use crate::core::reporter::Reporter;
use crate::core::ssh;
use crate::core::steps::{Phase, Step, Workflow};
use crate::error::Result;

const REMOTE_AGENT_PATH: &str = "/usr/local/bin/hop-agent";
const CLIENT_TUNNEL_IP: &str = "10.10.0.1/24";
const AGENT_TUNNEL_IP: &str = "10.10.0.2";
const WIREGUARD_PORT: u16 = 51820;

pub struct SetupArgs {
    pub name: String,
    pub addr: String,
    pub user: String,
    pub port: u16,
    pub key_path: Option<PathBuf>,
}

/// Runs §4.11's key-exchange sequence and saves the resulting host record.
/// The SSH session is established outside the step runner (so an
/// interactive passphrase prompt can own the terminal), then each
/// subsequent exchange is reported as a step.
pub fn run(args: SetupArgs, reporter: &mut dyn Reporter) -> Result<Outcome<HostRecord>> {
    host::validate(&args.name)?;

    // Step 1: TOFU-connect.
    let (session, host_key) =
        ssh::tofu_connect(&args.addr, args.port, &args.user, args.key_path.as_deref())?;

    let session = Rc::new(session);
    let client_keypair = Keypair::generate();
    let agent_binary_override = std::env::var("HOP_AGENT_BINARY").ok();
    let server_pubkey = Rc::new(RefCell::new(String::new()));

    let cancel = CancelToken::new();
    let workflow = Workflow::new(vec![Phase::new(
        "Bootstrap",
        vec![
            Step::fatal("Install agent binary", {
                let session = session.clone();
                move |_cancel| {
                    let local_path = agent_binary_override
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from("hop-agent"));
                    let data = std::fs::read(&local_path).unwrap_or_default();
                    ssh::upload(&session, REMOTE_AGENT_PATH, &data, 0o755)?;
                    ssh::run_remote(&session, "systemctl daemon-reload")?;
                    Ok(())
                }
            }),
            Step::fatal("Generate agent keypair", {
                let session = session.clone();
                let server_pubkey = server_pubkey.clone();
                move |_cancel| {
                    let output = ssh::run_remote(&session, &format!("{REMOTE_AGENT_PATH} setup"))?;
                    *server_pubkey.borrow_mut() = output.trim().to_string();
                    Ok(())
                }
            }),
            Step::fatal("Register client public key", {
                let session = session.clone();
                let client_pubkey = client_keypair.public_base64();
                move |_cancel| {
                    let pubkey = client_pubkey.clone();
                    ssh::run_remote(
                        &session,
                        &format!("{REMOTE_AGENT_PATH} setup --client-pubkey={pubkey}"),
                    )?;
                    Ok(())
                }
            }),
            Step::fatal("Enable and start hop-agent service", {
                let session = session.clone();
                move |_cancel| {
                    ssh::run_remote(&session, "systemctl enable --now hop-agent")?;
                    Ok(())
                }
            }),
        ],
    )]);
    workflow.run(&cancel, reporter)?;
    let server_pubkey = server_pubkey.borrow().clone();

    let record = HostRecord {
        name: args.name.clone(),
        display_name: args.name.clone(),
        endpoint: format!("{}:{WIREGUARD_PORT}", args.addr),
        client_private_key: client_keypair.private_base64(),
        peer_public_key: server_pubkey,
        client_tunnel_ip: CLIENT_TUNNEL_IP.to_string(),
        agent_tunnel_ip: AGENT_TUNNEL_IP.to_string(),
        ssh_user: args.user,
        ssh_host: args.addr,
        ssh_port: args.port,
        ssh_key_path: args.key_path,
        ssh_host_key: host_key,
    };
    host::save(&record)?;

    if host::load_global()?.default_host.is_none() {
        host::set_default(&record.name)?;
    }

    Ok(Outcome::new(record))
}

/// `setup` when no privileged helper is installed locally: prompts for
/// consent, then re-execs the helper binary under `sudo … --install`.
pub fn ensure_helper_installed(helper_binary: &Path) -> Result<bool> {
    print!("The privileged helper is not installed. Install it now? [y/N] ");
    use std::io::Write as _;
    std::io::stdout().flush().ok();
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer).ok();
    if !answer.trim().eq_ignore_ascii_case("y") {
        return Ok(false);
    }
    let status = std::process::Command::new("sudo")
        .arg(helper_binary)
        .arg("--install")
        .status();
    Ok(status.map(|s| s.success()).unwrap_or(false))
}
