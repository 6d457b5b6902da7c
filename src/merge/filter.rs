//! Pluggable conversion of raw shard hits into output records.

use std::io::{BufRead, Write};

use super::format::OutputRecord;
use crate::blocker::{PrimaryLocus, ScoreBlocker};
use crate::hits::Hit;
use crate::outcome::{OutcomeFlags, ReadOutcomeTracker};
use crate::ReduceError;

/// Decides which raw hits become output records.
///
/// Called concurrently from every band task; implementations must only
/// touch shared state through atomics (e.g. [`ReadOutcomeTracker`]).
pub trait FilterPolicy: Sync {
    /// Convert one hit read from a shard of `band`. `Ok(None)` filters it out.
    fn apply(&self, band: usize, hit: &Hit) -> Result<Option<OutputRecord>, ReduceError>;
}

/// Writes every hit unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl FilterPolicy for PassThrough {
    fn apply(&self, _band: usize, hit: &Hit) -> Result<Option<OutputRecord>, ReduceError> {
        Ok(Some(OutputRecord::plain(*hit)))
    }
}

/// Keeps the best-scoring hits of each read, marks NH and secondaries,
/// withholds blocked reads and records every decision in the tracker.
#[derive(Debug)]
pub struct BestScore<'a, B> {
    blocker: &'a B,
    tracker: Option<&'a ReadOutcomeTracker>,
    max_score: Option<u16>,
    max_fragment: Option<u32>,
}

impl<'a, B: ScoreBlocker> BestScore<'a, B> {
    /// Best-score filter over `blocker`.
    pub fn new(blocker: &'a B) -> Self {
        Self {
            blocker,
            tracker: None,
            max_score: None,
            max_fragment: None,
        }
    }

    /// Record outcomes in `tracker`.
    pub fn with_tracker(mut self, tracker: &'a ReadOutcomeTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Filter reads whose best score is above `max_score`.
    pub fn with_max_score(mut self, max_score: Option<u16>) -> Self {
        self.max_score = max_score;
        self
    }

    /// Treat read keys as paired arms (`key ^ 1` is the mate) and call arms
    /// mated when their primaries face each other within `max_fragment` bases.
    pub fn with_pairs(mut self, max_fragment: u32) -> Self {
        self.max_fragment = Some(max_fragment);
        self
    }

    fn mark(&self, read: u32, flags: OutcomeFlags) -> Result<(), ReduceError> {
        match self.tracker {
            Some(tracker) => tracker.add_status(read, flags),
            None => Ok(()),
        }
    }

    fn is_mated(&self, read: u32) -> bool {
        let Some(max_fragment) = self.max_fragment else {
            return false;
        };
        let mate = read ^ 1;
        if self.blocker.is_blocked(mate) {
            return false;
        }
        match (self.blocker.primary(read), self.blocker.primary(mate)) {
            (Some(own), Some(other)) => {
                own.template == other.template
                    && own.is_reverse != other.is_reverse
                    && (own.position as i64 - other.position as i64).unsigned_abs()
                        <= max_fragment as u64
            }
            _ => false,
        }
    }
}

impl<B: ScoreBlocker> FilterPolicy for BestScore<'_, B> {
    fn apply(&self, _band: usize, hit: &Hit) -> Result<Option<OutputRecord>, ReduceError> {
        let read = hit.read;
        self.mark(read, OutcomeFlags::HAS_HITS)?;
        if self.blocker.is_blocked(read) {
            self.mark(read, OutcomeFlags::BLOCKED)?;
            return Ok(None);
        }

        let mated = self.is_mated(read);
        if mated {
            self.mark(read, OutcomeFlags::MATED)?;
        }

        if let Some(best) = self.blocker.best_score(read) {
            if hit.score > best {
                return Ok(None);
            }
        }
        if self.max_score.is_some_and(|max| hit.score > max) {
            return Ok(None);
        }

        let locus = PrimaryLocus {
            template: hit.template,
            position: hit.position,
            is_reverse: hit.is_reverse,
        };
        let secondary = self.blocker.primary(read) != Some(locus);
        self.mark(
            read,
            if mated {
                OutcomeFlags::WRITTEN_MATED
            } else {
                OutcomeFlags::WRITTEN_UNMATED
            },
        )?;
        Ok(Some(OutputRecord {
            hit: *hit,
            secondary,
            mated,
            nh: self.blocker.ambiguity(read).max(1),
        }))
    }
}

/// Optional second pass over finished bands.
///
/// Runs only after every band finished filtering, so cross-band state
/// gathered during Filter is complete.
pub trait BandPostProcessor: Sync {
    /// Whether `band` must be rewritten.
    fn needs_rewrite(&self, _band: usize) -> bool {
        true
    }

    /// Copy `input` (the band's bytes) to `output`, rewritten.
    fn rewrite(
        &self,
        band: usize,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<(), ReduceError>;
}
