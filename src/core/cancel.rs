//! A minimal cooperative cancellation context, threaded top-to-bottom
//! through every blocking I/O path per §5. Deliberately not a full executor
//! or async runtime: every long-running loop in this crate polls a
//! `CancelToken` at each blocking-call boundary and stops within the
//! bounded wake latency the spec allows (≤ 500 ms).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    signal: Arc<(Mutex<()>, Condvar)>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            signal: Arc::new((Mutex::new(()), Condvar::new())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.signal;
        let _guard = lock.lock().unwrap();
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Block for up to `timeout`, waking early if cancelled. Returns `true`
    /// if cancellation occurred during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let (lock, cvar) = &*self.signal;
        let guard = lock.lock().unwrap();
        let (_guard, _result) = cvar.wait_timeout(guard, timeout).unwrap();
        self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn cancel_wakes_a_waiting_thread() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_timeout_expires_without_cancel() {
        let token = CancelToken::new();
        let cancelled = token.wait_timeout(Duration::from_millis(20));
        assert!(!cancelled);
    }
}
