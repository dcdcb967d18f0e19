//! Shared-budget deadlines for multi-phase waits.
//!
//! A synchronous command exchange waits several times (slot, transmit,
//! response). All phases draw from one budget: the clock starts when the
//! `Deadline` is created and is never reset between phases.

use compio::time::timeout;
use std::future::Future;
use std::time::{Duration, Instant};

/// A fixed point in time derived from a budget.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Duration,
    expires_at: Instant,
}

/// The deadline passed before the wrapped operation completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed;

impl Deadline {
    /// Start the clock for `budget`.
    pub fn after(budget: Duration) -> Self {
        Self {
            budget,
            expires_at: Instant::now() + budget,
        }
    }

    /// The full budget this deadline was created with.
    pub const fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before expiry (zero once expired).
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Returns true once the budget is used up.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Run `fut` with whatever is left of the budget.
    ///
    /// # Returns
    ///
    /// * `Ok(output)` if the future completed in time
    /// * `Err(Elapsed)` if the budget ran out first (the future is dropped)
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Elapsed>
    where
        F: Future,
    {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(Elapsed);
        }
        timeout(remaining, fut).await.map_err(|_| Elapsed)
    }
}
