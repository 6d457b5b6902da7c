//! Bounded per-read ranking of candidate hits.
//!
//! Two retention policies share the [`RankedHitStore`] interface:
//!
//! - [`ScoreRankedStore`] keeps the `N` lowest scores per read and tracks the
//!   best excluded score (the *boundary*) plus how many excluded hits tied it.
//! - [`PositionDedupStore`] keeps `N` distinct positions per read and freezes
//!   the read permanently once an `(N+1)`-th distinct position arrives.
//!
//! [`ConcurrentRankedHitStore`] stripes either policy across a fixed table
//! of mutexes keyed by read id.

mod dedup;
mod scored;
mod striped;

pub use dedup::{PositionDedupStore, MAX_DEDUP_RESULTS_PER_READ};
pub use scored::{ExcludedBoundary, ScoreRankedStore, MAX_RESULTS_PER_READ, MAX_TIE_COUNT};
pub use striped::ConcurrentRankedHitStore;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::hits::{Hit, HitBuffer};
use crate::ReduceError;

/// What `record()` did with a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Stored; the read had a free slot.
    Kept,
    /// Stored, displacing the previous worst kept entry.
    Evicted,
    /// Not stored: no better than the worst kept entry. Became the boundary.
    Excluded,
    /// Not stored: equal to the boundary score, tie count incremented.
    Tied,
    /// Not stored: worse than the boundary score. No state change.
    Rejected,
    /// Not stored: exact duplicate of a kept position.
    Duplicate,
    /// Not stored: the read is frozen after a distinct-position overflow.
    Frozen,
}

impl Admission {
    /// Whether the hit now occupies a kept slot.
    pub fn is_stored(self) -> bool {
        matches!(self, Admission::Kept | Admission::Evicted)
    }
}

/// Read-level view of a store's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RankSummary {
    /// Number of kept entries.
    pub kept: usize,
    /// Best kept score (score-ranked stores only).
    pub best_score: Option<u16>,
    /// Kept entries sharing the best score.
    pub best_count: usize,
    /// Best score among hits that arrived but were not kept.
    pub excluded_boundary: Option<u16>,
    /// Number of excluded hits sharing the boundary score.
    pub excluded_ties: u16,
    /// Position-deduplicating store overflowed for this read.
    pub frozen: bool,
}

impl RankSummary {
    /// Equally-best alignments for the read (NH).
    ///
    /// Excluded ties count when the boundary equals the best kept score.
    pub fn ambiguity(&self) -> u32 {
        let mut count = self.best_count as u32;
        if let (Some(best), Some(boundary)) = (self.best_score, self.excluded_boundary) {
            if boundary == best {
                count = count.saturating_add(self.excluded_ties as u32);
            }
        }
        count
    }
}

/// Kept entry decoded back into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeptEntry {
    /// Template id.
    pub template: u32,
    /// Position.
    pub position: i32,
    /// Reverse-strand flag.
    pub is_reverse: bool,
    /// Score, when the policy ranks by score.
    pub score: Option<u16>,
}

/// Per-read bounded hit store.
///
/// `slot` is the store-local read index. Plain stores use the read id
/// directly; [`ConcurrentRankedHitStore`] maps read ids onto its stripes.
pub trait RankedHitStore: Send {
    /// Reads covered.
    fn num_reads(&self) -> usize;

    /// `N`.
    fn results_per_read(&self) -> usize;

    /// Offer one hit to the read in `slot`.
    fn record(&mut self, slot: usize, hit: &Hit) -> Result<Admission, ReduceError>;

    /// Current state of the read in `slot`.
    fn summary(&self, slot: usize) -> RankSummary;

    /// Kept entries of the read in `slot`, in output order.
    fn kept(&self, slot: usize) -> Vec<KeptEntry>;

    /// Append the read's kept entries to `into` under read key `read`.
    ///
    /// Destructive: the read's kept entries are gone afterwards. Must not be
    /// called while hits for the read are still being recorded.
    fn drain_read(&mut self, slot: usize, read: u32, into: &mut HitBuffer) -> usize;

    /// Heap bytes held by the store.
    fn heap_bytes(&self) -> usize;

    /// Drain every read, slot index used as read key.
    fn drain_into(&mut self, into: &mut HitBuffer) -> usize {
        (0..self.num_reads())
            .map(|slot| self.drain_read(slot, slot as u32, into))
            .sum()
    }
}

fn check_slot(slot: usize, num_reads: usize) -> Result<(), ReduceError> {
    if slot >= num_reads {
        return Err(ReduceError::ReadOutOfRange {
            read: slot as u32,
            capacity: num_reads,
        });
    }
    Ok(())
}

fn check_capacity(
    num_reads: usize,
    results_per_read: usize,
    max_results: usize,
) -> Result<usize, ReduceError> {
    if results_per_read == 0 {
        return Err(ReduceError::InvalidConfiguration(
            "results per read must be > 0".to_string(),
        ));
    }
    if results_per_read > max_results {
        return Err(ReduceError::CapacityExceeded {
            what: "results per read",
            requested: results_per_read as u64,
            limit: max_results as u64,
        });
    }
    if num_reads as u64 > u32::MAX as u64 + 1 {
        return Err(ReduceError::CapacityExceeded {
            what: "read count",
            requested: num_reads as u64,
            limit: u32::MAX as u64 + 1,
        });
    }
    num_reads
        .checked_mul(results_per_read)
        .ok_or(ReduceError::CapacityExceeded {
            what: "kept entry slots",
            requested: u64::MAX,
            limit: usize::MAX as u64,
        })
}

static SCORE_CLAMP_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_score_clamped(score: u16) {
    if !SCORE_CLAMP_WARNED.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            score,
            max = crate::hits::ScoreField::MAX,
            "score exceeds packed field width, clamping (further clamps are silent)"
        );
    }
}
