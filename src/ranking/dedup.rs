//! Position-deduplicating store: `N` distinct loci per read, all-or-nothing.

use super::{check_capacity, check_slot, Admission, KeptEntry, RankSummary, RankedHitStore};
use crate::hits::{BufferedHit, Hit, HitBuffer, LocusCodec, PackedEntry, ScoreField};
use crate::ReduceError;

/// Largest `N` a deduplicating store accepts (one count value is the freeze marker).
pub const MAX_DEDUP_RESULTS_PER_READ: usize = u8::MAX as usize - 1;

/// Keeps up to `N` distinct `(template, position, strand)` entries per read.
///
/// Entries are stored as deduplication keys in sorted order. Once a new
/// distinct entry would be the `(N+1)`-th, the read's count is set to `N+1`
/// and the read is frozen: nothing else is accepted and [`drain_read`]
/// emits nothing for it.
///
/// [`drain_read`]: RankedHitStore::drain_read
#[derive(Debug, Clone)]
pub struct PositionDedupStore {
    codec: LocusCodec,
    results_per_read: usize,
    num_reads: usize,
    keys: Vec<u64>,
    stored: Vec<u8>,
}

impl PositionDedupStore {
    /// Create a store for `num_reads` reads keeping `results_per_read` loci each.
    pub fn new(
        num_reads: usize,
        results_per_read: usize,
        codec: LocusCodec,
    ) -> Result<Self, ReduceError> {
        let slots = check_capacity(num_reads, results_per_read, MAX_DEDUP_RESULTS_PER_READ)?;
        Ok(Self {
            codec,
            results_per_read,
            num_reads,
            keys: vec![0; slots],
            stored: vec![0; num_reads],
        })
    }

    /// Whether the read in `slot` overflowed.
    pub fn is_frozen(&self, slot: usize) -> bool {
        self.stored
            .get(slot)
            .is_some_and(|&count| count as usize > self.results_per_read)
    }

    fn row(&self, slot: usize) -> &[u64] {
        let start = slot * self.results_per_read;
        let count = (self.stored[slot] as usize).min(self.results_per_read);
        &self.keys[start..start + count]
    }
}

impl RankedHitStore for PositionDedupStore {
    fn num_reads(&self) -> usize {
        self.num_reads
    }

    fn results_per_read(&self) -> usize {
        self.results_per_read
    }

    fn record(&mut self, slot: usize, hit: &Hit) -> Result<Admission, ReduceError> {
        check_slot(slot, self.num_reads)?;
        let n = self.results_per_read;
        let count = self.stored[slot] as usize;
        if count > n {
            return Ok(Admission::Frozen);
        }

        let locus = self.codec.encode(hit.template, hit.position)?;
        let key = PackedEntry::new(ScoreField::ZERO, locus, hit.is_reverse).dedup_key();

        let start = slot * n;
        let row = &mut self.keys[start..start + n];
        match row[..count].binary_search(&key) {
            Ok(_) => Ok(Admission::Duplicate),
            Err(at) if count < n => {
                row.copy_within(at..count, at + 1);
                row[at] = key;
                self.stored[slot] += 1;
                Ok(Admission::Kept)
            }
            Err(_) => {
                self.stored[slot] = (n + 1) as u8;
                Ok(Admission::Frozen)
            }
        }
    }

    fn summary(&self, slot: usize) -> RankSummary {
        if slot >= self.num_reads {
            return RankSummary::default();
        }
        RankSummary {
            kept: self.row(slot).len(),
            frozen: self.is_frozen(slot),
            ..RankSummary::default()
        }
    }

    fn kept(&self, slot: usize) -> Vec<KeptEntry> {
        if slot >= self.num_reads {
            return Vec::new();
        }
        self.row(slot)
            .iter()
            .map(|&key| {
                let entry = PackedEntry::from_raw(key);
                let (template, position) = self.codec.decode(entry.locus());
                KeptEntry {
                    template,
                    position,
                    is_reverse: entry.is_reverse(),
                    score: None,
                }
            })
            .collect()
    }

    fn drain_read(&mut self, slot: usize, read: u32, into: &mut HitBuffer) -> usize {
        if slot >= self.num_reads || self.is_frozen(slot) {
            return 0;
        }
        let entries = self.kept(slot);
        for entry in &entries {
            into.push(BufferedHit {
                template: entry.template,
                position: entry.position,
                read,
                is_reverse: entry.is_reverse,
            });
        }
        self.stored[slot] = 0;
        entries.len()
    }

    fn heap_bytes(&self) -> usize {
        self.keys.capacity() * std::mem::size_of::<u64>() + self.stored.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(n: usize) -> PositionDedupStore {
        PositionDedupStore::new(1, n, LocusCodec::new(2, 1_000, 0).unwrap()).unwrap()
    }

    fn at(template: u32, position: i32, is_reverse: bool) -> Hit {
        Hit::new(template, position, 0, is_reverse, 0)
    }

    #[test]
    fn keeps_distinct_positions_sorted() {
        let mut store = store(3);
        assert_eq!(store.record(0, &at(1, 5, false)).unwrap(), Admission::Kept);
        assert_eq!(store.record(0, &at(0, 9, false)).unwrap(), Admission::Kept);
        assert_eq!(store.record(0, &at(1, 5, false)).unwrap(), Admission::Duplicate);
        assert_eq!(store.record(0, &at(1, 5, true)).unwrap(), Admission::Kept);

        let loci: Vec<_> = store
            .kept(0)
            .iter()
            .map(|e| (e.template, e.position, e.is_reverse))
            .collect();
        assert_eq!(loci, vec![(0, 9, false), (1, 5, false), (1, 5, true)]);
    }

    #[test]
    fn overflow_freezes_and_drops_read() {
        let mut store = store(2);
        store.record(0, &at(0, 1, false)).unwrap();
        store.record(0, &at(0, 2, false)).unwrap();
        // Duplicates never overflow.
        assert_eq!(store.record(0, &at(0, 2, false)).unwrap(), Admission::Duplicate);
        assert!(!store.is_frozen(0));

        assert_eq!(store.record(0, &at(0, 3, false)).unwrap(), Admission::Frozen);
        assert!(store.is_frozen(0));
        assert_eq!(store.record(0, &at(0, 1, false)).unwrap(), Admission::Frozen);
        assert_eq!(store.summary(0).kept, 2);

        let mut buffer = HitBuffer::default();
        assert_eq!(store.drain_into(&mut buffer), 0);
        assert!(buffer.is_empty());
    }
}
