use std::path::PathBuf;

use thiserror::Error;

/// Convenient result alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Hopbox client error type.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration ---
    #[error("No host named `{name}` is configured. Run `hop host ls` to see known hosts.")]
    UnknownHost { name: String },
    #[error(
        "Host name `{name}` is invalid: must match [A-Za-z0-9][A-Za-z0-9_-]* and contain no path separators."
    )]
    InvalidHostName { name: String },
    #[error(
        "No default host is configured and none was given with -H. Run `hop setup` or `hop host default <name>`."
    )]
    NoDefaultHost,
    #[error("Failed to read configuration file at {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write configuration file at {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Configuration at {path} could not be parsed: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Unable to determine the user configuration directory.")]
    ConfigDirUnavailable,

    // --- Validation ---
    #[error("Invalid key encoding for {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },
    #[error("Invalid tunnel address `{value}`: {reason}")]
    InvalidTunnelAddr { value: String, reason: String },

    // --- SSH ---
    #[error("Failed to connect to {host}:{port} over SSH: {reason}")]
    SshDial {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("SSH authentication failed for {user}@{host}: {reason}")]
    SshAuth {
        user: String,
        host: String,
        reason: String,
    },
    #[error(
        "Host key for {host} does not match the pinned key recorded during bootstrap. \
         Re-run `hop setup {name}` to accept the new key if this change is expected."
    )]
    HostKeyMismatch { host: String, name: String },
    #[error("Remote command `{command}` exited with status {status}: {output}")]
    RemoteCommandFailed {
        command: String,
        status: i32,
        output: String,
    },
    #[error("No usable SSH signer was found (tried agent, --key, and default key paths).")]
    NoSshSigner,

    // --- Tunnel ---
    #[error("The privileged helper is not reachable at {socket}.")]
    HelperUnreachable { socket: String },
    #[error("Failed to create a TUN interface via the helper: {reason}")]
    TunCreateFailed { reason: String },
    #[error("WireGuard handshake with {endpoint} timed out after {timeout_secs}s.")]
    HandshakeTimeout { endpoint: String, timeout_secs: u64 },
    #[error("A tunnel for host `{name}` is already running (pid {pid}).")]
    TunnelAlreadyRunning { name: String, pid: u32 },
    #[error("No tunnel is running for host `{name}`.")]
    NoTunnelRunning { name: String },

    // --- RPC ---
    #[error("Transport error talking to the agent RPC endpoint {url}: {reason}")]
    RpcTransport { url: String, reason: String },
    #[error("Agent RPC call `{method}` returned an error: {message}")]
    RpcError { method: String, message: String },
    #[error("Malformed JSON response from agent RPC call `{method}`: {reason}")]
    RpcMalformed { method: String, reason: String },

    // --- Integrity ---
    #[error("Checksum mismatch for {artifact}: expected {expected}, got {actual}.")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },
    #[error("No checksum entry found for `{artifact}` in checksums.txt.")]
    ChecksumMissing { artifact: String },

    // --- User abort ---
    #[error("Operation cancelled.")]
    Cancelled,
    #[error("Aborted: user declined to proceed.")]
    UserDeclined,

    // --- IO / misc ---
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to determine the current working directory: {source}")]
    WorkingDirectoryUnavailable {
        #[source]
        source: std::io::Error,
    },
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other {
            message: message.into(),
        }
    }
}
