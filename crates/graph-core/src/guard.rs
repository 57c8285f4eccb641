//! Non-reentrant entry flag
//!
//! Wraps entry points that hand control to external code (recipient
//! callhooks, messenger deliveries) before their own state updates are
//! committed. A nested entry fails with [`GraphError::ReentrantCall`]
//! instead of deadlocking on the protocol lock.

use crate::error::{GraphError, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-flag reentrancy guard
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

/// Held while inside a guarded section; releases the flag on drop
#[derive(Debug)]
pub struct Entered<'a> {
    guard: &'a ReentrancyGuard,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the guarded section
    pub fn enter(&self) -> Result<Entered<'_>> {
        self.entered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| GraphError::ReentrantCall)?;
        Ok(Entered { guard: self })
    }

    pub fn is_entered(&self) -> bool {
        self.entered.load(Ordering::Acquire)
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
