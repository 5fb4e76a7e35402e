//! Call context: cancellation and deadlines.
//!
//! Every public engine operation takes a [`CallContext`]. The engine is
//! runtime-agnostic, so the context is a plain atomic flag plus an
//! optional monotonic deadline rather than an async cancellation type;
//! condvar waits and lock acquisitions poll it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngineError, EngineResult};

/// Cancellation signal and deadline for one engine call.
///
/// Cloning shares the underlying flag: a clone handed to another thread
/// can cancel the original. Deadline expiry surfaces as
/// [`EngineError::Canceled`], the same as an explicit cancel - in both
/// cases the caller withdrew the operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    canceled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that never cancels and never times out.
    #[must_use]
    pub fn background() -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A context that times out `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// A context with an absolute deadline.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            canceled: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Signal cancellation to every clone of this context.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Has this context been canceled (explicitly or by deadline)?
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        if self.canceled.load(Ordering::Acquire) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Error out if the context is canceled or past its deadline.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Canceled`].
    pub fn check(&self) -> EngineResult<()> {
        if self.is_canceled() {
            return Err(EngineError::Canceled);
        }
        Ok(())
    }

    /// Time left until the deadline, if one is set.
    ///
    /// Returns `Duration::ZERO` once the deadline has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
