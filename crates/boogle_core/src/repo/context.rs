//! Per-call deadline and cancellation carried into repository operations.
//!
//! # Responsibility
//! - Let callers bound how long an operation may wait for a connection and
//!   how long its statement may run.
//! - Provide a cooperative cancellation flag shared across threads.
//!
//! # Invariants
//! - An expired or cancelled context fails before touching storage.
//! - Interruption is checked by SQLite's progress handler while a statement
//!   runs; the handler is removed before the connection returns to the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cloneable cancellation flag. Cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why an operation stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interruption {
    Cancelled,
    DeadlineExceeded,
}

/// Deadline and cancellation for one repository call.
///
/// `CallContext::default()` has neither, so the call waits for the pool's
/// configured connection timeout and lets statements run to completion.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CallContext {
    /// Context without deadline or cancellation.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attaches a cancellation token to this context.
    pub fn cancelled_by(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Time left before the deadline; `None` when no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.deadline.is_some() || self.cancel.is_some()
    }

    pub(crate) fn interruption(&self) -> Option<Interruption> {
        check(self.deadline, self.cancel.as_ref())
    }

    /// Builds the callback handed to SQLite's progress handler.
    ///
    /// Returns `true` (abort the statement) once the context is interrupted.
    pub(crate) fn interrupt_probe(&self) -> impl FnMut() -> bool + Send + 'static {
        let deadline = self.deadline;
        let cancel = self.cancel.clone();
        move || check(deadline, cancel.as_ref()).is_some()
    }
}

fn check(deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Option<Interruption> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Some(Interruption::Cancelled);
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return Some(Interruption::DeadlineExceeded);
    }
    None
}
