//! Byte accounting for reduction phases

use std::collections::HashMap;

use super::MemoryProfile;

/// Tracks live and peak bytes of named allocations.
///
/// The current phase is whatever [`MemoryLedger::enter_phase`] set last;
/// every allocation raises that phase's peak.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    /// Current bytes held
    current: usize,

    /// Maximum seen
    peak: usize,

    /// Live allocations by label, so `release` frees the right size
    live: HashMap<&'static str, usize>,

    /// Phase peaks, in first-seen order
    phases: Vec<(&'static str, usize)>,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start attributing peaks to `phase`.
    pub fn enter_phase(&mut self, phase: &'static str) {
        if self.phases.last().map(|(name, _)| *name) != Some(phase) {
            self.phases.push((phase, self.current));
        }
    }

    /// Record `bytes` held under `label`. Re-allocating a label replaces its size.
    pub fn allocate(&mut self, label: &'static str, bytes: usize) {
        let previous = self.live.insert(label, bytes).unwrap_or(0);
        self.current = self.current - previous + bytes;
        self.update_peak();
    }

    /// Free the bytes held under `label`; returns how many were freed.
    pub fn release(&mut self, label: &'static str) -> usize {
        let bytes = self.live.remove(label).unwrap_or(0);
        self.current = self.current.saturating_sub(bytes);
        bytes
    }

    /// Bytes held under `label`.
    pub fn held(&self, label: &str) -> usize {
        self.live.get(label).copied().unwrap_or(0)
    }

    fn update_peak(&mut self) {
        self.peak = self.peak.max(self.current);
        if let Some((_, phase_peak)) = self.phases.last_mut() {
            *phase_peak = (*phase_peak).max(self.current);
        }
    }

    /// Bytes currently held.
    pub fn current_bytes(&self) -> usize {
        self.current
    }

    /// Maximum bytes held at once.
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }

    /// Snapshot as a profile.
    pub fn profile(&self) -> MemoryProfile {
        MemoryProfile {
            peak_bytes: self.peak,
            live_bytes: self.current,
            phases: self.phases.clone(),
        }
    }
}
