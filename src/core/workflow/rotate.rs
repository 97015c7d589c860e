//! `rotate` (§4.12.6 / §4.11 rotate sequence): regenerates the agent's
//! WireGuard keypair and issues a matching new client keypair, without
//! blocking on a currently running tunnel (a warning is emitted instead).

use std::rc::Rc;

use crate::core::cancel::CancelToken;
use crate::core::crypto::Keypair;
use crate::core::diagnostics::Outcome;
use crate::core::host::{self, HostRecord};
use crate::core::reporter::Reporter;
use crate::core::ssh;
use crate::core::state;
use crate::core::steps::{Phase, Step, Workflow};
use crate::error::Result;

const REMOTE_AGENT_PATH: &str = "/usr/local/bin/hop-agent";

pub fn run(host_name_override: Option<&str>, reporter: &mut dyn Reporter) -> Result<Outcome<HostRecord>> {
    let host_name = super::resolve_host(host_name_override)?;
    let mut record = host::load(&host_name)?;

    if state::is_running(&host_name)? {
        reporter.report(crate::core::events::Event::Message {
            severity: crate::core::diagnostics::Severity::Warning,
            text: format!("a tunnel for `{host_name}` is currently running; it will need to reconnect after rotation"),
        });
    }

    let session = ssh::pinned_connect(
        &record.ssh_host,
        record.ssh_port,
        &record.ssh_user,
        record.ssh_key_path.as_deref(),
        &record.ssh_host_key,
    )?;
    let session = Rc::new(session);

    let new_client_keypair = Keypair::generate();
    let new_server_pubkey = Rc::new(std::cell::RefCell::new(String::new()));

    let cancel = CancelToken::new();
    let workflow = Workflow::new(vec![Phase::new(
        "Rotate",
        vec![
            Step::fatal("Regenerate agent keypair", {
                let session = session.clone();
                let new_server_pubkey = new_server_pubkey.clone();
                move |_cancel| {
                    ssh::run_remote(
                        &session,
                        &format!("cp /etc/hopbox/agent.key /etc/hopbox/agent.key.bak 2>/dev/null; {REMOTE_AGENT_PATH} rotate"),
                    )?;
                    let output = ssh::run_remote(
                        &session,
                        &format!("{REMOTE_AGENT_PATH} rotate --show-pubkey"),
                    )?;
                    *new_server_pubkey.borrow_mut() = output.trim().to_string();
                    Ok(())
                }
            }),
            Step::fatal("Register new client public key", {
                let session = session.clone();
                let pubkey = new_client_keypair.public_base64();
                move |_cancel| {
                    ssh::run_remote(
                        &session,
                        &format!("{REMOTE_AGENT_PATH} setup --client-pubkey={pubkey}"),
                    )?;
                    Ok(())
                }
            }),
            Step::fatal("Restart hop-agent service", {
                let session = session.clone();
                move |_cancel| {
                    ssh::run_remote(&session, "systemctl restart hop-agent")?;
                    Ok(())
                }
            }),
        ],
    )]);
    workflow.run(&cancel, reporter)?;

    record.client_private_key = new_client_keypair.private_base64();
    record.peer_public_key = new_server_pubkey.borrow().clone();
    host::save(&record)?;

    Ok(Outcome::new(record))
}
