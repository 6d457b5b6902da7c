//! Score-ranked top-N store with excluded-boundary tracking.

use super::{
    check_capacity, check_slot, warn_score_clamped, Admission, KeptEntry, RankSummary,
    RankedHitStore,
};
use crate::hits::{BufferedHit, Hit, HitBuffer, LocusCodec, PackedEntry, ScoreField};
use crate::ReduceError;

/// Largest `N` a score-ranked store accepts.
pub const MAX_RESULTS_PER_READ: usize = u8::MAX as usize;
/// Tie counts saturate here.
pub const MAX_TIE_COUNT: u16 = u16::MAX;

/// Best score among hits that arrived but were not kept, and how many tied it.
///
/// `ties == 0` means no boundary has been established for the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExcludedBoundary {
    /// Boundary score.
    pub score: u16,
    /// Excluded hits with exactly this score.
    pub ties: u16,
}

impl ExcludedBoundary {
    fn is_set(self) -> bool {
        self.ties > 0
    }

    fn establish(&mut self, score: u16) {
        self.score = score;
        self.ties = 1;
    }

    fn add_tie(&mut self) {
        self.ties = self.ties.saturating_add(1).min(MAX_TIE_COUNT);
    }
}

/// Keeps the `N` lowest-scoring hits per read.
///
/// Kept entries are stored as [`PackedEntry`] words in one flat array of
/// `num_reads × N` slots, ascending by score with ties in arrival order.
#[derive(Debug, Clone)]
pub struct ScoreRankedStore {
    codec: LocusCodec,
    results_per_read: usize,
    num_reads: usize,
    entries: Vec<u64>,
    kept: Vec<u8>,
    boundaries: Vec<ExcludedBoundary>,
}

impl ScoreRankedStore {
    /// Create a store for `num_reads` reads keeping `results_per_read` hits each.
    pub fn new(
        num_reads: usize,
        results_per_read: usize,
        codec: LocusCodec,
    ) -> Result<Self, ReduceError> {
        let slots = check_capacity(num_reads, results_per_read, MAX_RESULTS_PER_READ)?;
        Ok(Self {
            codec,
            results_per_read,
            num_reads,
            entries: vec![0; slots],
            kept: vec![0; num_reads],
            boundaries: vec![ExcludedBoundary::default(); num_reads],
        })
    }

    /// Excluded boundary of the read in `slot`, if established.
    pub fn boundary(&self, slot: usize) -> Option<ExcludedBoundary> {
        self.boundaries.get(slot).copied().filter(|b| b.is_set())
    }

    fn row(&self, slot: usize) -> &[u64] {
        let start = slot * self.results_per_read;
        &self.entries[start..start + self.kept[slot] as usize]
    }

    fn decode(&self, raw: u64) -> KeptEntry {
        let entry = PackedEntry::from_raw(raw);
        let (template, position) = self.codec.decode(entry.locus());
        KeptEntry {
            template,
            position,
            is_reverse: entry.is_reverse(),
            score: Some(entry.score()),
        }
    }
}

impl RankedHitStore for ScoreRankedStore {
    fn num_reads(&self) -> usize {
        self.num_reads
    }

    fn results_per_read(&self) -> usize {
        self.results_per_read
    }

    fn record(&mut self, slot: usize, hit: &Hit) -> Result<Admission, ReduceError> {
        check_slot(slot, self.num_reads)?;

        let (field, clamped) = ScoreField::clamp(hit.score);
        if clamped {
            warn_score_clamped(hit.score);
        }
        let score = field.get();

        let boundary = &mut self.boundaries[slot];
        if boundary.is_set() {
            if score > boundary.score {
                return Ok(Admission::Rejected);
            }
            if score == boundary.score {
                boundary.add_tie();
                return Ok(Admission::Tied);
            }
        }

        let locus = self.codec.encode(hit.template, hit.position)?;
        let packed = PackedEntry::new(field, locus, hit.is_reverse).raw();

        let n = self.results_per_read;
        let count = self.kept[slot] as usize;
        let start = slot * n;
        let row = &mut self.entries[start..start + n];
        let at = row[..count].partition_point(|&raw| PackedEntry::from_raw(raw).score() <= score);

        if count < n {
            row.copy_within(at..count, at + 1);
            row[at] = packed;
            self.kept[slot] += 1;
            return Ok(Admission::Kept);
        }

        let worst = PackedEntry::from_raw(row[n - 1]).score();
        if score >= worst {
            // Anything reaching here beats the previous boundary, so it replaces it.
            boundary.establish(score);
            return Ok(Admission::Excluded);
        }

        row.copy_within(at..n - 1, at + 1);
        row[at] = packed;
        if !boundary.is_set() || worst < boundary.score {
            boundary.establish(worst);
        } else {
            boundary.add_tie();
        }
        Ok(Admission::Evicted)
    }

    fn summary(&self, slot: usize) -> RankSummary {
        if slot >= self.num_reads {
            return RankSummary::default();
        }
        let row = self.row(slot);
        let best_score = row.first().map(|&raw| PackedEntry::from_raw(raw).score());
        let best_count = best_score
            .map(|best| {
                row.iter()
                    .take_while(|&&raw| PackedEntry::from_raw(raw).score() == best)
                    .count()
            })
            .unwrap_or(0);
        let boundary = self.boundary(slot);
        RankSummary {
            kept: row.len(),
            best_score,
            best_count,
            excluded_boundary: boundary.map(|b| b.score),
            excluded_ties: boundary.map(|b| b.ties).unwrap_or(0),
            frozen: false,
        }
    }

    fn kept(&self, slot: usize) -> Vec<KeptEntry> {
        if slot >= self.num_reads {
            return Vec::new();
        }
        self.row(slot).iter().map(|&raw| self.decode(raw)).collect()
    }

    fn drain_read(&mut self, slot: usize, read: u32, into: &mut HitBuffer) -> usize {
        if slot >= self.num_reads {
            return 0;
        }
        let drained = self.kept[slot] as usize;
        for entry in self.kept(slot) {
            into.push(BufferedHit {
                template: entry.template,
                position: entry.position,
                read,
                is_reverse: entry.is_reverse,
            });
        }
        self.kept[slot] = 0;
        drained
    }

    fn heap_bytes(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<u64>()
            + self.kept.capacity()
            + self.boundaries.capacity() * std::mem::size_of::<ExcludedBoundary>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(num_reads: usize, n: usize) -> ScoreRankedStore {
        ScoreRankedStore::new(num_reads, n, LocusCodec::new(4, 10_000, 0).unwrap()).unwrap()
    }

    fn scored(position: i32, score: u16) -> Hit {
        Hit::new(0, position, 0, false, score)
    }

    #[test]
    fn worked_example_n1() {
        let mut store = store(1, 1);
        let outcomes: Vec<_> = [5u16, 3, 3, 7, 2]
            .iter()
            .enumerate()
            .map(|(i, &s)| store.record(0, &scored(i as i32, s)).unwrap())
            .collect();
        assert_eq!(
            outcomes,
            vec![
                Admission::Kept,
                Admission::Evicted,
                Admission::Excluded,
                Admission::Rejected,
                Admission::Evicted,
            ]
        );
        let kept = store.kept(0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, Some(2));
        assert_eq!(kept[0].position, 4);
        assert_eq!(store.boundary(0), Some(ExcludedBoundary { score: 3, ties: 2 }));
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut store = store(1, 3);
        store.record(0, &scored(10, 4)).unwrap();
        store.record(0, &scored(11, 4)).unwrap();
        store.record(0, &scored(12, 1)).unwrap();
        let positions: Vec<_> = store.kept(0).iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![12, 10, 11]);

        // Evicts the later of the two 4s.
        assert_eq!(store.record(0, &scored(13, 2)).unwrap(), Admission::Evicted);
        let positions: Vec<_> = store.kept(0).iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![12, 13, 10]);
        assert_eq!(store.boundary(0), Some(ExcludedBoundary { score: 4, ties: 1 }));
        assert_eq!(store.record(0, &scored(14, 4)).unwrap(), Admission::Tied);
        assert_eq!(store.summary(0).excluded_ties, 2);
    }

    #[test]
    fn summary_reports_ambiguity() {
        let mut store = store(1, 2);
        for position in 0..5 {
            store.record(0, &scored(position, 7)).unwrap();
        }
        let summary = store.summary(0);
        assert_eq!(summary.kept, 2);
        assert_eq!(summary.best_score, Some(7));
        assert_eq!(summary.best_count, 2);
        assert_eq!(summary.excluded_boundary, Some(7));
        assert_eq!(summary.excluded_ties, 3);
        assert_eq!(summary.ambiguity(), 5);
    }

    #[test]
    fn out_of_range_score_is_clamped() {
        let mut store = store(1, 1);
        assert_eq!(store.record(0, &scored(0, u16::MAX)).unwrap(), Admission::Kept);
        assert_eq!(store.kept(0)[0].score, Some(ScoreField::MAX));
    }

    #[test]
    fn drain_emits_kept_only_and_clears_read() {
        let mut store = store(2, 1);
        store.record(1, &Hit::new(2, 40, 1, true, 3)).unwrap();
        store.record(1, &Hit::new(2, 50, 1, false, 9)).unwrap();
        let mut buffer = HitBuffer::with_capacity(4);
        assert_eq!(store.drain_into(&mut buffer), 1);
        assert_eq!(
            buffer.get(0),
            Some(BufferedHit {
                template: 2,
                position: 40,
                read: 1,
                is_reverse: true
            })
        );
        assert_eq!(store.summary(1).kept, 0);
        assert_eq!(store.summary(1).excluded_boundary, Some(9));
    }

    #[test]
    fn capacity_errors() {
        let codec = LocusCodec::new(1, 100, 0).unwrap();
        assert!(matches!(
            ScoreRankedStore::new(1, MAX_RESULTS_PER_READ + 1, codec),
            Err(ReduceError::CapacityExceeded { .. })
        ));
        let mut store = ScoreRankedStore::new(1, 1, codec).unwrap();
        assert!(matches!(
            store.record(0, &Hit::new(0, 100, 0, false, 1)),
            Err(ReduceError::PositionOutOfRange { .. })
        ));
        assert!(matches!(
            store.record(1, &Hit::new(0, 1, 1, false, 1)),
            Err(ReduceError::ReadOutOfRange { .. })
        ));
    }
}
