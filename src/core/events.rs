use std::time::{Duration, SystemTime};

use super::diagnostics::Severity;

/// Connectivity state tracked by the health monitor (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    Disconnected,
}

/// A single transition observed by the connectivity monitor.
#[derive(Debug, Clone)]
pub struct ConnEvent {
    pub state: ConnState,
    pub at: SystemTime,
    /// Populated only on a Disconnected → Connected transition: how long
    /// the outage lasted.
    pub outage_duration: Option<Duration>,
}

/// Outcome of a single step run by the step runner (C10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Success,
    /// Step failed but was marked non-fatal; the runner continues.
    Warned { message: String },
    /// Step failed and was fatal; the runner aborts the workflow.
    Failed { message: String },
}

/// Structured progress event emitted during long-running operations.
#[derive(Debug, Clone)]
pub enum Event {
    /// A textual progress update with a severity level.
    Message { severity: Severity, text: String },
    /// A new phase of a workflow has begun.
    PhaseStarted { phase: String, step_count: usize },
    /// A step within the current phase has begun.
    StepStarted { phase: String, step: String },
    /// A step within the current phase has finished.
    StepFinished {
        phase: String,
        step: String,
        outcome: StepOutcome,
        duration_ms: u64,
    },
    /// The tunnel's data plane became usable.
    TunnelReady { interface: String },
    /// The tunnel was torn down.
    TunnelStopped { interface: String },
    /// A connectivity transition observed by the health monitor.
    Connectivity(ConnEvent),
    /// The daemon wrote or refreshed the tunnel state file.
    StateWritten { host: String },
    /// The daemon removed the tunnel state file on shutdown.
    StateRemoved { host: String },
}
