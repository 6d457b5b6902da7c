//! Per-read score gates consulted by the shard filter.
//!
//! A [`ReadScoreTable`] snapshots the ranked store's read summaries before
//! the kept hits are drained, so the filter stage can still see best
//! scores, ambiguity counts (which include excluded ties) and the primary
//! locus of every read after the store is gone.

use rayon::prelude::*;

use crate::ranking::{ConcurrentRankedHitStore, RankedHitStore};

/// Locus of a read's best kept hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimaryLocus {
    /// Template id.
    pub template: u32,
    /// Position.
    pub position: i32,
    /// Reverse-strand flag.
    pub is_reverse: bool,
}

/// Read-level thresholds for the filter stage.
pub trait ScoreBlocker: Sync {
    /// Best score seen for the read.
    fn best_score(&self, read: u32) -> Option<u16>;

    /// Equally-best alignments (NH).
    fn ambiguity(&self, read: u32) -> u32;

    /// Locus of the best hit.
    fn primary(&self, read: u32) -> Option<PrimaryLocus>;

    /// Whether records of the read must be withheld.
    fn is_blocked(&self, read: u32) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadScore {
    best_score: Option<u16>,
    ambiguity: u32,
    primary: Option<PrimaryLocus>,
}

/// Snapshot of per-read best scores and ambiguity.
#[derive(Debug, Clone)]
pub struct ReadScoreTable {
    reads: Vec<ReadScore>,
    max_ambiguity: u32,
}

impl ReadScoreTable {
    /// Capture every read of `store`. Reads whose ambiguity exceeds
    /// `max_ambiguity` are blocked.
    ///
    /// Must run after the last `record()` and before the store is drained.
    pub fn from_store<S: RankedHitStore>(
        store: &ConcurrentRankedHitStore<S>,
        max_ambiguity: u32,
    ) -> Self {
        let reads: Vec<ReadScore> = (0..store.num_reads() as u32)
            .into_par_iter()
            .map(|read| {
                let summary = store.summary(read);
                let primary = store.kept(read).first().map(|entry| PrimaryLocus {
                    template: entry.template,
                    position: entry.position,
                    is_reverse: entry.is_reverse,
                });
                // Deduplicating stores rank nothing, every kept locus counts.
                let ambiguity = if summary.best_score.is_some() {
                    summary.ambiguity()
                } else {
                    summary.kept as u32
                };
                ReadScore {
                    best_score: summary.best_score,
                    ambiguity,
                    primary,
                }
            })
            .collect();
        let blocked = reads.iter().filter(|r| r.ambiguity > max_ambiguity).count();
        tracing::debug!(reads = reads.len(), blocked, max_ambiguity, "built read score table");
        Self {
            reads,
            max_ambiguity,
        }
    }

    /// Number of reads.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Ambiguity threshold.
    pub fn max_ambiguity(&self) -> u32 {
        self.max_ambiguity
    }

    fn read(&self, read: u32) -> ReadScore {
        self.reads.get(read as usize).copied().unwrap_or_default()
    }
}

impl ScoreBlocker for ReadScoreTable {
    fn best_score(&self, read: u32) -> Option<u16> {
        self.read(read).best_score
    }

    fn ambiguity(&self, read: u32) -> u32 {
        self.read(read).ambiguity
    }

    fn primary(&self, read: u32) -> Option<PrimaryLocus> {
        self.read(read).primary
    }

    fn is_blocked(&self, read: u32) -> bool {
        self.read(read).ambiguity > self.max_ambiguity
    }
}
