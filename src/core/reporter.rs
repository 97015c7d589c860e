use std::fs::{self, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

use super::events::{ConnState, Event, StepOutcome};
use super::diagnostics::Severity;

/// Implemented by callers that wish to observe progress events emitted by
/// Hopbox operations (C15).
pub trait Reporter {
    fn report(&mut self, event: Event);
}

impl Reporter for () {
    fn report(&mut self, _event: Event) {}
}

/// Fan an event out to every reporter in the list. Used so the daemon can
/// drive both a `JsonlLogReporter` and, in `--foreground` mode, a
/// `TerminalReporter` from the same event stream.
pub struct BroadcastReporter<'a> {
    reporters: Vec<&'a mut dyn Reporter>,
}

impl<'a> BroadcastReporter<'a> {
    pub fn new(reporters: Vec<&'a mut dyn Reporter>) -> Self {
        Self { reporters }
    }
}

impl<'a> Reporter for BroadcastReporter<'a> {
    fn report(&mut self, event: Event) {
        for reporter in self.reporters.iter_mut() {
            reporter.report(event.clone());
        }
    }
}

/// Renders events to stdout/stderr. TTY mode shows an animated spinner for
/// the currently running step (at most one visible at a time); non-TTY mode
/// prints append-only lines with status glyphs. Both modes execute the same
/// sequential event stream and leave the same final output, differing only
/// in how the "in-progress" state is displayed.
pub struct TerminalReporter {
    is_tty: bool,
    verbose: bool,
    spinner_tick: usize,
    current_step: Option<String>,
}

const SPINNER_FRAMES: [&str; 4] = ["-", "\\", "|", "/"];

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self {
            is_tty: io::stdout().is_terminal(),
            verbose: false,
            spinner_tick: 0,
            current_step: None,
        }
    }

    /// When `verbose`, prints the otherwise-silent bookkeeping events
    /// (state file writes/removals) as plain status lines.
    pub fn with_verbose(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::new()
        }
    }

    fn begin_step(&mut self, phase: &str, step: &str) {
        self.current_step = Some(step.to_string());
        if self.is_tty {
            let frame = SPINNER_FRAMES[self.spinner_tick % SPINNER_FRAMES.len()];
            self.spinner_tick += 1;
            print!("\r{frame} [{phase}] {step}...");
            let _ = io::stdout().flush();
        } else {
            println!("[{phase}] {step}... ");
        }
    }

    fn finish_step(&mut self, phase: &str, step: &str, outcome: &StepOutcome, duration_ms: u64) {
        let glyph = match outcome {
            StepOutcome::Success => "✓",
            StepOutcome::Warned { .. } => "!",
            StepOutcome::Failed { .. } => "✗",
        };
        if self.is_tty {
            print!("\r\x1b[2K");
        }
        println!("{glyph} [{phase}] {step} ({duration_ms}ms)");
        if let StepOutcome::Warned { message } | StepOutcome::Failed { message } = outcome {
            println!("  {message}");
        }
        self.current_step = None;
    }
}

impl Reporter for TerminalReporter {
    fn report(&mut self, event: Event) {
        match event {
            Event::Message { severity, text } => match severity {
                Severity::Info => println!("{text}"),
                Severity::Warning => eprintln!("warning: {text}"),
                Severity::Error => eprintln!("error: {text}"),
            },
            Event::PhaseStarted { phase, step_count } => {
                println!("== {phase} ({step_count} step{}) ==", if step_count == 1 { "" } else { "s" });
            }
            Event::StepStarted { phase, step } => self.begin_step(&phase, &step),
            Event::StepFinished {
                phase,
                step,
                outcome,
                duration_ms,
            } => self.finish_step(&phase, &step, &outcome, duration_ms),
            Event::TunnelReady { interface } => println!("tunnel ready on {interface}"),
            Event::TunnelStopped { interface } => println!("tunnel stopped ({interface})"),
            Event::Connectivity(conn) => match conn.state {
                ConnState::Connected => match conn.outage_duration {
                    Some(d) => println!("reconnected after {}s", d.as_secs()),
                    None => println!("connected"),
                },
                ConnState::Disconnected => eprintln!("disconnected"),
            },
            Event::StateWritten { host } => {
                if self.verbose {
                    println!("state written for `{host}`");
                }
            }
            Event::StateRemoved { host } => {
                if self.verbose {
                    println!("state removed for `{host}`");
                }
            }
        }
    }
}

/// Appends one JSON object per event to a log file, flushing after every
/// line. Mirrors the teacher's append-only JSONL event log idiom.
pub struct JsonlLogReporter {
    path: PathBuf,
}

impl JsonlLogReporter {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Touch the file so callers can rely on its existence immediately.
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path })
    }

    fn append_line(&self, value: serde_json::Value) {
        let Ok(mut file) = OpenOptions::new().append(true).open(&self.path) else {
            return;
        };
        let mut record = value;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("ts".to_string(), json!(now_unix()));
        }
        if serde_json::to_writer(&mut file, &record).is_ok() {
            let _ = file.write_all(b"\n");
            let _ = file.flush();
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Reporter for JsonlLogReporter {
    fn report(&mut self, event: Event) {
        let (kind, detail) = match &event {
            Event::Message { severity, text } => (
                "message",
                json!({"severity": format!("{severity:?}"), "text": text}),
            ),
            Event::PhaseStarted { phase, step_count } => {
                ("phase_started", json!({"phase": phase, "step_count": step_count}))
            }
            Event::StepStarted { phase, step } => {
                ("step_started", json!({"phase": phase, "step": step}))
            }
            Event::StepFinished {
                phase,
                step,
                outcome,
                duration_ms,
            } => (
                "step_finished",
                json!({
                    "phase": phase,
                    "step": step,
                    "outcome": format!("{outcome:?}"),
                    "duration_ms": duration_ms,
                }),
            ),
            Event::TunnelReady { interface } => ("tunnel_ready", json!({"interface": interface})),
            Event::TunnelStopped { interface } => {
                ("tunnel_stopped", json!({"interface": interface}))
            }
            Event::Connectivity(conn) => (
                "connectivity",
                json!({
                    "state": format!("{:?}", conn.state),
                    "outage_secs": conn.outage_duration.map(|d| d.as_secs()),
                }),
            ),
            Event::StateWritten { host } => ("state_written", json!({"host": host})),
            Event::StateRemoved { host } => ("state_removed", json!({"host": host})),
        };
        let mut record = detail;
        if let Some(obj) = record.as_object_mut() {
            obj.insert("kind".to_string(), json!(kind));
        }
        self.append_line(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_reporter_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("host.log");
        let mut reporter = JsonlLogReporter::open(&path).unwrap();
        reporter.report(Event::Message {
            severity: Severity::Info,
            text: "hello".into(),
        });
        reporter.report(Event::TunnelReady {
            interface: "utun5".into(),
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "message");
        assert_eq!(first["text"], "hello");
    }
}
