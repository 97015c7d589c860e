//! Exercises the host registry and the `up`/`resolve_host` tier logic
//! together through their public API, against a throwaway config
//! directory. No network or SSH is involved — these are the pure,
//! deterministic parts of the workflow layer.

use hopbox::core::crypto::Keypair;
use hopbox::core::host::{self, HostRecord};
use hopbox::core::workflow::{resolve_host, resolve_host_for_up};
use hopbox::error::Error;

fn sample(name: &str) -> HostRecord {
    let client = Keypair::generate();
    let peer = Keypair::generate();
    HostRecord {
        name: name.to_string(),
        display_name: name.to_string(),
        endpoint: "198.51.100.10:51820".into(),
        client_private_key: client.private_base64(),
        peer_public_key: peer.public_base64(),
        client_tunnel_ip: "10.10.0.1/24".into(),
        agent_tunnel_ip: "10.10.0.2".into(),
        ssh_user: "root".into(),
        ssh_host: "198.51.100.10".into(),
        ssh_port: 22,
        ssh_key_path: None,
        ssh_host_key: String::new(),
    }
}

fn with_fresh_config<F: FnOnce()>(f: F) {
    let dir = tempfile::tempdir().unwrap();
    temp_env::with_var("HOPBOX_CONFIG_DIR", Some(dir.path().to_str().unwrap()), f);
}

#[test]
fn resolve_host_errors_without_a_default() {
    with_fresh_config(|| {
        let err = resolve_host(None).unwrap_err();
        assert!(matches!(err, Error::NoDefaultHost));
    });
}

#[test]
fn resolve_host_prefers_explicit_flag_over_default() {
    with_fresh_config(|| {
        host::save(&sample("alpha")).unwrap();
        host::set_default("alpha").unwrap();
        host::save(&sample("beta")).unwrap();

        assert_eq!(resolve_host(Some("beta")).unwrap(), "beta");
        assert_eq!(resolve_host(None).unwrap(), "alpha");
    });
}

#[test]
fn resolve_host_for_up_falls_back_to_sole_configured_host() {
    with_fresh_config(|| {
        host::save(&sample("only-host")).unwrap();
        assert_eq!(resolve_host_for_up(None, None).unwrap(), "only-host");
    });
}

#[test]
fn resolve_host_for_up_prefers_manifest_host_over_sole_host() {
    with_fresh_config(|| {
        host::save(&sample("only-host")).unwrap();
        host::save(&sample("manifest-host")).unwrap();
        assert_eq!(
            resolve_host_for_up(None, Some("manifest-host")).unwrap(),
            "manifest-host"
        );
    });
}

#[test]
fn resolve_host_for_up_errors_with_multiple_hosts_and_no_default() {
    with_fresh_config(|| {
        host::save(&sample("alpha")).unwrap();
        host::save(&sample("beta")).unwrap();
        let err = resolve_host_for_up(None, None).unwrap_err();
        assert!(matches!(err, Error::NoDefaultHost));
    });
}

#[test]
fn deleting_the_default_host_clears_it() {
    with_fresh_config(|| {
        host::save(&sample("alpha")).unwrap();
        host::set_default("alpha").unwrap();
        host::delete("alpha").unwrap();
        assert!(resolve_host(None).is_err());
        assert!(host::list().unwrap().is_empty());
    });
}
