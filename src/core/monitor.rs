//! Connectivity monitor (C7): a periodic health probe driving a two-state
//! machine (Connected/Disconnected) with hysteresis — at most one
//! `OnStateChange` callback fires per transition, from the same thread that
//! detected it.

use std::time::{Duration, Instant};

use crate::core::cancel::CancelToken;
use crate::core::events::{ConnEvent, ConnState};

const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Anything capable of performing the health probe. Implemented by an
/// `ureq`-backed HTTP client bound to either the netstack or the loopback
/// proxy; abstracted here so the monitor's state machine can be tested
/// without a real network call.
pub trait HealthProbe {
    /// Returns `Ok(())` for a successful (2xx) probe, `Err(..)` for any
    /// non-2xx response or transport failure.
    fn probe(&self, timeout: Duration) -> Result<(), String>;
}

/// Configuration for one monitor run.
pub struct MonitorConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Runs the probe loop until `cancel` fires. `on_healthy` is called after
/// every successful probe while already Connected; `on_state_change` is
/// called exactly once per transition.
pub fn run<P, H, S>(
    probe: &P,
    config: &MonitorConfig,
    cancel: &CancelToken,
    mut on_healthy: H,
    mut on_state_change: S,
) where
    P: HealthProbe,
    H: FnMut(Instant),
    S: FnMut(ConnEvent),
{
    let mut state = ConnState::Connected;
    let mut disconnected_since: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let now = Instant::now();
        let system_now = std::time::SystemTime::now();
        match probe.probe(config.probe_timeout) {
            Ok(()) => {
                if state == ConnState::Disconnected {
                    let outage = disconnected_since.map(|since| now.duration_since(since));
                    state = ConnState::Connected;
                    disconnected_since = None;
                    on_state_change(ConnEvent {
                        state: ConnState::Connected,
                        at: system_now,
                        outage_duration: outage,
                    });
                } else {
                    on_healthy(now);
                }
            }
            Err(_) => {
                if state == ConnState::Connected {
                    state = ConnState::Disconnected;
                    disconnected_since = Some(now);
                    on_state_change(ConnEvent {
                        state: ConnState::Disconnected,
                        at: system_now,
                        outage_duration: None,
                    });
                }
            }
        }

        if cancel.wait_timeout(config.probe_interval) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedProbe {
        results: Mutex<Vec<Result<(), String>>>,
    }

    impl HealthProbe for ScriptedProbe {
        fn probe(&self, _timeout: Duration) -> Result<(), String> {
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(())
            } else {
                results.remove(0)
            }
        }
    }

    #[test]
    fn emits_exactly_one_event_per_transition() {
        let probe = ScriptedProbe {
            results: Mutex::new(vec![Ok(()), Err("x".into()), Err("x".into()), Ok(()), Ok(())]),
        };
        let cancel = CancelToken::new();
        let events = Mutex::new(Vec::new());
        let healthy_count = AtomicUsize::new(0);

        let config = MonitorConfig {
            probe_interval: Duration::from_millis(1),
            probe_timeout: Duration::from_millis(10),
        };

        let mut ticks = 0;
        run(
            &probe,
            &config,
            &cancel,
            |_| {
                healthy_count.fetch_add(1, Ordering::SeqCst);
            },
            |event| {
                events.lock().unwrap().push(event);
                ticks += 1;
                if ticks >= 2 {
                    cancel.cancel();
                }
            },
        );

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].state, ConnState::Disconnected);
        assert_eq!(events[1].state, ConnState::Connected);
        assert!(events[1].outage_duration.is_some());
    }

    #[test]
    fn on_healthy_fires_only_while_connected() {
        let probe = ScriptedProbe {
            results: Mutex::new(vec![Ok(()), Ok(())]),
        };
        let cancel = CancelToken::new();
        let count = AtomicUsize::new(0);
        let config = MonitorConfig {
            probe_interval: Duration::from_millis(1),
            probe_timeout: Duration::from_millis(10),
        };
        let mut ticks = 0;
        run(
            &probe,
            &config,
            &cancel,
            |_| {
                count.fetch_add(1, Ordering::SeqCst);
                ticks += 1;
                if ticks >= 2 {
                    cancel.cancel();
                }
            },
            |_| {},
        );
        assert!(count.load(Ordering::SeqCst) >= 2);
    }
}
