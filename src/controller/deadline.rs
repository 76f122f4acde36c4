//! Per-pass time budget
//!
//! The reconciler checks the deadline before each store-touching step. A step
//! already in flight is never interrupted, so a pass that runs out of time
//! leaves the store in a state the next pass can resume from.

use std::time::Duration;

use tokio::time::Instant;

use crate::Error;

/// Deadline for one reconcile pass
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline of `budget` from now
    pub fn start(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Fail with [`Error::DeadlineExceeded`] if no time is left for `step`
    pub fn check(&self, step: &str) -> Result<(), Error> {
        if self.started.elapsed() >= self.budget {
            return Err(Error::deadline_exceeded(step, self.budget));
        }
        Ok(())
    }
}
