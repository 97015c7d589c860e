//! Exercises the parsed shape of the CLI surface described in §6, without
//! spawning the binary: `Cli::try_parse_from` alone exercises clap's
//! derive wiring (flag names, defaults, subcommand nesting).

use clap::Parser;
use hopbox::cli::{Cli, Commands, DaemonCommands, HostCommands};

fn parse(args: &[&str]) -> Cli {
    let mut full = vec!["hop"];
    full.extend_from_slice(args);
    Cli::try_parse_from(full).expect("args should parse")
}

#[test]
fn no_args_leaves_command_unset() {
    let cli = parse(&[]);
    assert!(cli.command.is_none());
}

#[test]
fn setup_requires_addr_and_defaults_user_and_port() {
    let cli = parse(&["setup", "prod", "-a", "prod.example.com"]);
    match cli.command {
        Some(Commands::Setup(args)) => {
            assert_eq!(args.name, "prod");
            assert_eq!(args.addr, "prod.example.com");
            assert_eq!(args.user, "root");
            assert_eq!(args.port, 22);
            assert!(args.key_path.is_none());
        }
        _ => panic!("expected Setup"),
    }
}

#[test]
fn setup_rejects_missing_addr() {
    let full = vec!["hop", "setup", "prod"];
    assert!(Cli::try_parse_from(full).is_err());
}

#[test]
fn global_host_flag_applies_regardless_of_subcommand_position() {
    let cli = parse(&["-H", "prod", "status"]);
    assert_eq!(cli.host.as_deref(), Some("prod"));
    assert!(matches!(cli.command, Some(Commands::Status)));
}

#[test]
fn up_accepts_optional_workspace_and_foreground_flag() {
    let cli = parse(&["up", "workspace.yaml", "-f"]);
    match cli.command {
        Some(Commands::Up(args)) => {
            assert_eq!(args.workspace.unwrap().to_str().unwrap(), "workspace.yaml");
            assert!(args.foreground);
        }
        _ => panic!("expected Up"),
    }
}

#[test]
fn upgrade_only_flags_are_mutually_independent() {
    let cli = parse(&["upgrade", "--client-only", "--version", "1.2.3"]);
    match cli.command {
        Some(Commands::Upgrade(args)) => {
            assert!(args.client_only);
            assert!(!args.agent_only);
            assert!(!args.helper_only);
            assert_eq!(args.version.as_deref(), Some("1.2.3"));
        }
        _ => panic!("expected Upgrade"),
    }
}

#[test]
fn host_subcommands_parse_add_rm_ls_default() {
    match parse(&["host", "ls"]).command {
        Some(Commands::Host(HostCommands::Ls)) => {}
        _ => panic!("expected Host(Ls)"),
    }
    match parse(&["host", "rm", "prod"]).command {
        Some(Commands::Host(HostCommands::Rm { name })) => assert_eq!(name, "prod"),
        _ => panic!("expected Host(Rm)"),
    }
    match parse(&["host", "default", "prod"]).command {
        Some(Commands::Host(HostCommands::Default { name })) => {
            assert_eq!(name.as_deref(), Some("prod"));
        }
        _ => panic!("expected Host(Default)"),
    }
}

#[test]
fn daemon_start_accepts_optional_workspace() {
    match parse(&["daemon", "start", "prod", "--workspace", "ws.yaml"]).command {
        Some(Commands::Daemon(DaemonCommands::Start { host, workspace })) => {
            assert_eq!(host, "prod");
            assert_eq!(workspace.unwrap().to_str().unwrap(), "ws.yaml");
        }
        _ => panic!("expected Daemon(Start)"),
    }
}

#[test]
fn to_requires_target_and_addr() {
    let cli = parse(&["to", "staging", "-a", "staging.example.com"]);
    match cli.command {
        Some(Commands::To(args)) => {
            assert_eq!(args.target, "staging");
            assert_eq!(args.addr, "staging.example.com");
        }
        _ => panic!("expected To"),
    }
}
