//! Command-line surface (§6): flags and subcommands only — all behavior
//! lives in `app` and `core`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hop", version, about = "Self-hostable remote-development runtime client")]
pub struct Cli {
    /// Emit verbose diagnostics (debug-level events) to stderr.
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Target a host other than the configured default.
    #[arg(short = 'H', long, global = true, value_name = "NAME")]
    pub host: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bootstrap a new remote host over SSH and register it as a hop target.
    Setup(HostConnectArgs),

    /// Bring the tunnel (and configured workspace) up.
    Up(UpArgs),

    /// Tear the tunnel down.
    Down,

    /// Print the tunnel's current status.
    Status,

    /// Rotate the WireGuard keypair shared with the current host.
    Rotate,

    /// Upgrade the client, helper, and/or remote agent.
    Upgrade(UpgradeArgs),

    /// Migrate the current workspace to a newly bootstrapped host.
    To(MigrateArgs),

    /// Manage the local host registry.
    #[command(subcommand)]
    Host(HostCommands),

    /// Manage the background daemon directly.
    #[command(subcommand)]
    Daemon(DaemonCommands),
}

#[derive(Args)]
pub struct HostConnectArgs {
    /// Name to register this host under.
    pub name: String,

    /// SSH-reachable address or hostname of the remote machine.
    #[arg(short = 'a', long = "addr")]
    pub addr: String,

    #[arg(short = 'u', long = "user", default_value = "root")]
    pub user: String,

    #[arg(short = 'p', long = "port", default_value_t = 22)]
    pub port: u16,

    #[arg(short = 'k', long = "key")]
    pub key_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct UpArgs {
    /// Path to a workspace manifest (defaults to `workspace.yaml` in the
    /// current directory if present).
    pub workspace: Option<PathBuf>,

    /// Run the tunnel in the foreground instead of spawning a daemon.
    #[arg(short = 'f', long)]
    pub foreground: bool,
}

#[derive(Args, Default)]
pub struct UpgradeArgs {
    #[arg(long)]
    pub version: Option<String>,

    /// Skip fetching a release; only touch components with --*-only flags.
    #[arg(long)]
    pub local: bool,

    #[arg(long)]
    pub client_only: bool,

    #[arg(long)]
    pub agent_only: bool,

    #[arg(long)]
    pub helper_only: bool,
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Name to register the migration target under.
    pub target: String,

    #[arg(short = 'a', long = "addr")]
    pub addr: String,

    #[arg(short = 'u', long = "user", default_value = "root")]
    pub user: String,

    #[arg(short = 'p', long = "port", default_value_t = 22)]
    pub port: u16,

    #[arg(short = 'k', long = "key")]
    pub key_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum HostCommands {
    /// Bootstrap and register a new host (identical to `hop setup`).
    Add(HostConnectArgs),
    /// Forget a registered host.
    Rm { name: String },
    /// List registered hosts.
    Ls,
    /// Show or set the default host.
    Default { name: Option<String> },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Run the daemon in the foreground for `host` (used internally by
    /// `hop up`'s detached spawn; not generally invoked directly).
    Start {
        host: String,
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    Stop {
        host: Option<String>,
    },
    Status {
        host: Option<String>,
    },
}
