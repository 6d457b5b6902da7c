//! Cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ReduceError;

/// Process-wide abort flag, cheap to clone and share across threads.
///
/// Long loops poll it every few thousand items and unwind through their
/// normal error path once it is raised.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    /// New, lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Whether the signal has been raised.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// `Err(Aborted)` once raised.
    pub fn check(&self) -> Result<(), ReduceError> {
        if self.is_raised() {
            Err(ReduceError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Polls one or more signals every `interval` ticks.
#[derive(Debug)]
pub(crate) struct AbortPoller<'a> {
    signals: [&'a AbortSignal; 2],
    interval: usize,
    ticks: usize,
}

impl<'a> AbortPoller<'a> {
    pub(crate) fn new(caller: &'a AbortSignal, internal: &'a AbortSignal, interval: usize) -> Self {
        Self {
            signals: [caller, internal],
            interval: interval.max(1),
            ticks: 0,
        }
    }

    /// Count one item; check the signals on every `interval`-th call.
    pub(crate) fn tick(&mut self) -> Result<(), ReduceError> {
        self.ticks += 1;
        if self.ticks % self.interval == 0 {
            self.check()?;
        }
        Ok(())
    }

    pub(crate) fn check(&self) -> Result<(), ReduceError> {
        self.signals.iter().try_for_each(|signal| signal.check())
    }
}
