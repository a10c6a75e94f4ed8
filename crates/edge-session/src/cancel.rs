//! Cooperative cancellation with an optional absolute deadline.
//!
//! Every blocking step in the session layer (dial, handshake, socket reads
//! and writes, backoff sleeps) takes a [`CancelToken`]. Sleeps wake early on
//! cancellation; socket timeouts are clamped to the remaining deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// Socket timeouts of zero are rejected by the OS API, so clamping never
/// goes below this.
const MIN_CLAMPED_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

struct Signal {
    cancelled: AtomicBool,
    // Dropping the sender disconnects every receiver, waking all sleepers.
    trigger: Mutex<Option<Sender<()>>>,
    wake: Receiver<()>,
}

/// Cheap to clone; clones share one cancellation signal.
#[derive(Clone)]
pub struct CancelToken {
    signal: Arc<Signal>,
    deadline: Option<Instant>,
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            signal: Arc::new(Signal {
                cancelled: AtomicBool::new(false),
                trigger: Mutex::new(Some(tx)),
                wake: rx,
            }),
            deadline: None,
        }
    }

    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::Release);
        let mut trigger = match self.signal.trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        trigger.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Same signal, deadline tightened to `at` if that is earlier.
    #[must_use]
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= at => current,
            _ => at,
        };
        Self {
            signal: Arc::clone(&self.signal),
            deadline: Some(deadline),
        }
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if self.remaining() == Some(Duration::ZERO) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// `timeout` bounded by the time left before the deadline.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        let bounded = match self.remaining() {
            Some(left) if left < timeout => left,
            _ => timeout,
        };
        bounded.max(MIN_CLAMPED_TIMEOUT)
    }

    /// Sleeps for `duration`, returning early with an error on cancellation
    /// or when the deadline passes first.
    pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
        self.check()?;
        let (wait, hits_deadline) = match self.remaining() {
            Some(left) if left <= duration => (left, true),
            _ => (duration, false),
        };
        match self.signal.wake.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) if hits_deadline => Err(Interrupted::DeadlineExceeded),
            Err(RecvTimeoutError::Timeout) => Ok(()),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(Interrupted::Cancelled),
        }
    }

    /// Blocks until the token is cancelled. Deadlines are ignored.
    pub fn wait(&self) {
        while !self.is_cancelled() {
            let _ = self.signal.wake.recv();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_completes_without_cancellation() {
        let token = CancelToken::new();
        let start = Instant::now();
        token.sleep(Duration::from_millis(20)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn cancel_wakes_sleepers_promptly() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let result = sleeper.sleep(Duration::from_secs(30));
            (result, start.elapsed())
        });
        thread::sleep(Duration::from_millis(30));
        token.cancel();
        let (result, elapsed) = handle.join().unwrap();
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(token.check(), Err(Interrupted::Cancelled));
    }

    #[test]
    fn deadline_cuts_sleep_short() {
        let token = CancelToken::new().with_timeout(Duration::from_millis(20));
        let start = Instant::now();
        assert_eq!(
            token.sleep(Duration::from_secs(10)),
            Err(Interrupted::DeadlineExceeded)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn with_deadline_keeps_the_earlier_one() {
        let now = Instant::now();
        let early = CancelToken::new().with_deadline(now + Duration::from_millis(10));
        let narrowed = early.with_deadline(now + Duration::from_secs(60));
        assert_eq!(narrowed.deadline(), early.deadline());
    }

    #[test]
    fn clamp_never_returns_zero() {
        let token = CancelToken::new().with_deadline(Instant::now());
        assert_eq!(token.clamp(Duration::from_secs(5)), MIN_CLAMPED_TIMEOUT);
        let open = CancelToken::new();
        assert_eq!(open.clamp(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn wait_returns_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = thread::spawn(move || waiter.wait());
        token.cancel();
        handle.join().unwrap();
    }
}
