//! Step runner (C10): executes an ordered sequence of phases, each an
//! ordered non-empty sequence of steps, streaming progress events to a
//! [`Reporter`] and honoring fatal/non-fatal step outcomes plus
//! cooperative cancellation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::core::cancel::CancelToken;
use crate::core::events::{Event, StepOutcome};
use crate::core::reporter::Reporter;
use crate::error::{Error, Result};

/// A single unit of work within a [`Phase`]. `fatal` controls what happens
/// when `run` returns `Err`: a fatal step aborts the whole workflow, a
/// non-fatal step is recorded as a warning and the runner proceeds to the
/// next step.
pub struct Step {
    pub title: String,
    pub fatal: bool,
    pub run: Box<dyn FnOnce(&CancelToken) -> Result<()>>,
}

impl Step {
    pub fn fatal(title: impl Into<String>, run: impl FnOnce(&CancelToken) -> Result<()> + 'static) -> Self {
        Self {
            title: title.into(),
            fatal: true,
            run: Box::new(run),
        }
    }

    pub fn non_fatal(title: impl Into<String>, run: impl FnOnce(&CancelToken) -> Result<()> + 'static) -> Self {
        Self {
            title: title.into(),
            fatal: false,
            run: Box::new(run),
        }
    }
}

/// An ordered, non-empty sequence of steps under one title.
pub struct Phase {
    pub title: String,
    pub steps: Vec<Step>,
}

impl Phase {
    pub fn new(title: impl Into<String>, steps: Vec<Step>) -> Self {
        Self { title: title.into(), steps }
    }
}

/// An ordered sequence of phases, executed strictly in order: each step's
/// effects are visible to the next before it starts.
pub struct Workflow {
    pub phases: Vec<Phase>,
}

impl Workflow {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { phases }
    }

    /// Runs every phase's steps in order. Returns `Ok(())` only if no fatal
    /// step failed and the workflow was not cancelled. Cancellation mid-step
    /// is observed at the next step boundary and propagated as
    /// [`Error::Cancelled`].
    pub fn run(self, cancel: &CancelToken, reporter: &mut dyn Reporter) -> Result<()> {
        for phase in self.phases {
            reporter.report(Event::PhaseStarted {
                phase: phase.title.clone(),
                step_count: phase.steps.len(),
            });
            for step in phase.steps {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                reporter.report(Event::StepStarted {
                    phase: phase.title.clone(),
                    step: step.title.clone(),
                });
                let started = Instant::now();
                let title = step.title.clone();
                let fatal = step.fatal;
                let run = step.run;
                let outcome = catch_unwind(AssertUnwindSafe(|| run(cancel)));
                let duration_ms = started.elapsed().as_millis() as u64;

                let step_outcome = match outcome {
                    Ok(Ok(())) => StepOutcome::Success,
                    Ok(Err(err)) if fatal => StepOutcome::Failed { message: err.to_string() },
                    Ok(Err(err)) => StepOutcome::Warned { message: err.to_string() },
                    Err(panic) => StepOutcome::Failed {
                        message: panic_message(&panic),
                    },
                };

                let is_fatal_failure = matches!(step_outcome, StepOutcome::Failed { .. });

                reporter.report(Event::StepFinished {
                    phase: phase.title.clone(),
                    step: title,
                    outcome: step_outcome.clone(),
                    duration_ms,
                });

                if is_fatal_failure {
                    let message = match step_outcome {
                        StepOutcome::Failed { message } => message,
                        _ => unreachable!(),
                    };
                    return Err(Error::other(message));
                }
            }
        }
        Ok(())
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct CollectingReporter {
        events: Arc<Mutex<Vec<Event>>>,
    }

    impl Reporter for CollectingReporter {
        fn report(&mut self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn non_fatal_step_warns_and_continues() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = CollectingReporter { events: events.clone() };
        let cancel = CancelToken::new();

        let workflow = Workflow::new(vec![Phase::new(
            "Setup",
            vec![
                Step::non_fatal("risky", |_| Err(Error::other("boom"))),
                Step::fatal("followup", |_| Ok(())),
            ],
        )]);

        workflow.run(&cancel, &mut reporter).unwrap();

        let events = events.lock().unwrap();
        let finished: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::StepFinished { step, outcome, .. } => Some((step.clone(), outcome.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 2);
        assert!(matches!(finished[0].1, StepOutcome::Warned { .. }));
        assert!(matches!(finished[1].1, StepOutcome::Success));
    }

    #[test]
    fn fatal_step_aborts_remaining_steps() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = CollectingReporter { events: events.clone() };
        let cancel = CancelToken::new();
        let ran_second = Arc::new(Mutex::new(false));
        let ran_second_clone = ran_second.clone();

        let workflow = Workflow::new(vec![Phase::new(
            "Setup",
            vec![
                Step::fatal("boom", |_| Err(Error::other("fatal"))),
                Step::fatal("never", move |_| {
                    *ran_second_clone.lock().unwrap() = true;
                    Ok(())
                }),
            ],
        )]);

        let result = workflow.run(&cancel, &mut reporter);
        assert!(result.is_err());
        assert!(!*ran_second.lock().unwrap());
    }

    #[test]
    fn cancellation_before_a_step_short_circuits() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = CollectingReporter { events: events.clone() };
        let cancel = CancelToken::new();
        cancel.cancel();

        let workflow = Workflow::new(vec![Phase::new(
            "Setup",
            vec![Step::fatal("never", |_| Ok(()))],
        )]);

        let result = workflow.run(&cancel, &mut reporter);
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn panicking_step_is_captured_as_fatal() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut reporter = CollectingReporter { events: events.clone() };
        let cancel = CancelToken::new();

        let workflow = Workflow::new(vec![Phase::new(
            "Setup",
            vec![Step::non_fatal("panics", |_| panic!("unexpected"))],
        )]);

        let result = workflow.run(&cancel, &mut reporter);
        assert!(result.is_err());
    }
}
