//! Phase-scoped memory accounting
//!
//! Tracks the bytes held by hit buffers and ranked stores so the reducer can
//! report its peak and confirm that each phase released what it allocated.

mod allocator;

pub use allocator::MemoryLedger;

/// Summary of one reduction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryProfile {
    /// Highest total seen.
    pub peak_bytes: usize,

    /// Bytes still held when the profile was taken.
    pub live_bytes: usize,

    /// Peak per phase, in the order phases were first seen.
    pub phases: Vec<(&'static str, usize)>,
}

impl MemoryProfile {
    /// Verify the peak stayed under `bound`.
    pub fn satisfies_bound(&self, bound: usize) -> bool {
        self.peak_bytes <= bound
    }

    /// Human-readable report.
    pub fn report(&self) -> String {
        let mut out = format!(
            "Peak memory: {} bytes\nLive at end: {} bytes\nPhases:",
            self.peak_bytes, self.live_bytes
        );
        for (phase, peak) in &self.phases {
            out.push_str(&format!("\n  {phase}: {peak}"));
        }
        out
    }
}
