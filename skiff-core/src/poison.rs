//! RAII guard that detects abandoned waits.
//!
//! # The Problem
//!
//! A synchronous command exchange parks a command in a single-flight slot and
//! then waits for the daemon's answer. If the waiting future is dropped (the
//! caller was cancelled, a surrounding `select!` picked another branch), the
//! exchange is abandoned mid-flight: the response, if it ever arrives, can no
//! longer be attributed to anyone.
//!
//! # The Solution
//!
//! `PoisonGuard` is armed before the first await of the critical section.
//! `disarm()` consumes it without touching the shared flag. A guard dropped
//! while still armed sets the flag, and the connection owning the flag treats
//! itself as unusable from then on. A busy connection is therefore never
//! reported as poisoned; only an abandoned one is.
//!
//! ```rust
//! use skiff_core::poison::PoisonGuard;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let poisoned = AtomicBool::new(false);
//! {
//!     let guard = PoisonGuard::new(&poisoned);
//!     // ... awaits that may be cancelled ...
//!     guard.disarm();
//! }
//! assert!(!poisoned.load(Ordering::Acquire));
//! ```
//!
//! # Critical Rules
//!
//! 1. **Disarm on every path that returns normally, errors included**
//! 2. **Never reset the flag by hand after an abandoned wait**
//! 3. **Once poisoned, the connection must be closed**

use std::sync::atomic::{AtomicBool, Ordering};

/// A RAII guard that marks a connection as poisoned if dropped before disarmed.
#[must_use = "dropping the guard immediately poisons the connection"]
pub struct PoisonGuard<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> PoisonGuard<'a> {
    /// Arm a guard over `flag`. The flag is left as is until the guard is
    /// dropped armed.
    #[inline]
    pub const fn new(flag: &'a AtomicBool) -> Self {
        Self { flag, armed: true }
    }

    /// Disarm the guard; the exchange completed.
    #[inline]
    pub fn disarm(mut self) {
        self.armed = false;
    }

    /// Returns true while the guard still poisons on drop.
    #[inline]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }
}

impl Drop for PoisonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::Release);
        }
    }
}
