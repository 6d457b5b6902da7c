//! Lock-striped wrapper for concurrent `record()` calls.

use parking_lot::Mutex;

use super::{Admission, KeptEntry, PositionDedupStore, RankSummary, RankedHitStore, ScoreRankedStore};
use crate::hits::{Hit, HitBuffer, LocusCodec};
use crate::ReduceError;

/// Thread-safe ranked store built from `S` stripes.
///
/// Read `r` lives in stripe `r % stripes` at local slot `r / stripes`, and
/// each stripe sits behind its own mutex. `record()` holds exactly one
/// stripe lock for one read's mutation. Distinct reads that share a stripe
/// serialize against each other; the stripe count trades that false
/// contention against per-stripe overhead and does not affect results.
///
/// Draining takes `&mut self`, so the record→drain barrier is enforced by
/// the borrow checker: no `record()` can be in flight while draining.
#[derive(Debug)]
pub struct ConcurrentRankedHitStore<S> {
    stripes: Box<[Mutex<S>]>,
    num_reads: usize,
}

impl<S: RankedHitStore> ConcurrentRankedHitStore<S> {
    /// Build `stripes` stores with `factory(reads_in_stripe)`.
    ///
    /// The stripe count is clamped to `1..=num_reads`.
    pub fn new<F>(num_reads: usize, stripes: usize, mut factory: F) -> Result<Self, ReduceError>
    where
        F: FnMut(usize) -> Result<S, ReduceError>,
    {
        let stripe_count = stripes.clamp(1, num_reads.max(1));
        let stripes = (0..stripe_count)
            .map(|k| {
                let reads_in_stripe = num_reads.saturating_sub(k).div_ceil(stripe_count);
                factory(reads_in_stripe).map(Mutex::new)
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_boxed_slice();
        Ok(Self { stripes, num_reads })
    }

    /// Number of stripes actually allocated.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    /// Reads covered.
    pub fn num_reads(&self) -> usize {
        self.num_reads
    }

    fn locate(&self, read: u32) -> Result<(usize, usize), ReduceError> {
        let read = read as usize;
        if read >= self.num_reads {
            return Err(ReduceError::ReadOutOfRange {
                read: read as u32,
                capacity: self.num_reads,
            });
        }
        let stripes = self.stripes.len();
        Ok((read % stripes, read / stripes))
    }

    /// Offer a hit; locks only the stripe owning `hit.read`.
    pub fn record(&self, hit: &Hit) -> Result<Admission, ReduceError> {
        let (stripe, slot) = self.locate(hit.read)?;
        self.stripes[stripe].lock().record(slot, hit)
    }

    /// Summary of one read.
    pub fn summary(&self, read: u32) -> RankSummary {
        match self.locate(read) {
            Ok((stripe, slot)) => self.stripes[stripe].lock().summary(slot),
            Err(_) => RankSummary::default(),
        }
    }

    /// Kept entries of one read.
    pub fn kept(&self, read: u32) -> Vec<KeptEntry> {
        match self.locate(read) {
            Ok((stripe, slot)) => self.stripes[stripe].lock().kept(slot),
            Err(_) => Vec::new(),
        }
    }

    /// Drain every read in ascending read order. No locking.
    pub fn drain_into(&mut self, into: &mut HitBuffer) -> usize {
        let stripes = self.stripes.len();
        let mut drained = 0;
        for read in 0..self.num_reads {
            let store = self.stripes[read % stripes].get_mut();
            drained += store.drain_read(read / stripes, read as u32, into);
        }
        drained
    }

    /// Heap bytes across all stripes.
    pub fn heap_bytes(&mut self) -> usize {
        self.stripes
            .iter_mut()
            .map(|stripe| stripe.get_mut().heap_bytes())
            .sum::<usize>()
            + self.stripes.len() * std::mem::size_of::<Mutex<S>>()
    }
}

impl ConcurrentRankedHitStore<ScoreRankedStore> {
    /// Striped score-ranked store.
    pub fn score_ranked(
        num_reads: usize,
        results_per_read: usize,
        codec: LocusCodec,
        stripes: usize,
    ) -> Result<Self, ReduceError> {
        Self::new(num_reads, stripes, |reads| {
            ScoreRankedStore::new(reads, results_per_read, codec)
        })
    }
}

impl ConcurrentRankedHitStore<PositionDedupStore> {
    /// Striped position-deduplicating store.
    pub fn position_dedup(
        num_reads: usize,
        results_per_read: usize,
        codec: LocusCodec,
        stripes: usize,
    ) -> Result<Self, ReduceError> {
        Self::new(num_reads, stripes, |reads| {
            PositionDedupStore::new(reads, results_per_read, codec)
        })
    }
}
