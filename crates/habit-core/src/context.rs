//! Per-request deadline and cancellation
//!
//! Every coordinator call takes a `Context`. Transactions check it before each
//! store call and before commit, so an abandoned or slow request gives up its
//! transaction instead of committing late.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Context {
    deadline: Instant,
    budget: Duration,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// A context that expires `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            budget: timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derive a context whose deadline is at most `max` from now.
    ///
    /// The cancellation flag is shared with the parent.
    pub fn clamped(&self, max: Duration) -> Self {
        let capped = Instant::now() + max;
        if capped < self.deadline {
            Self {
                deadline: capped,
                budget: max,
                cancelled: Arc::clone(&self.cancelled),
            }
        } else {
            self.clone()
        }
    }

    /// Signal every clone of this context to stop
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fail if the context was cancelled or its deadline passed
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Error::DeadlineExceeded(self.budget));
        }
        Ok(())
    }
}
