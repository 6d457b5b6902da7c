//! Atomic OR-only status words, one per read arm.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU16, Ordering};

use super::{OutcomeCode, OutcomeFlags, OutcomeStatistics, UnmappedReason};
use crate::ReduceError;

/// Arms per read supported (single-end or paired-end).
pub const MAX_ARMS: usize = 2;

/// Concurrent status recorder.
///
/// Keys are `read_index × arms + arm`, the same encoding the hit buffers
/// use. `add_status` may be called from any number of threads; bits are
/// only ever set.
#[derive(Debug)]
pub struct ReadOutcomeTracker {
    words: Vec<AtomicU16>,
    arms: usize,
}

impl ReadOutcomeTracker {
    /// Tracker for `num_reads` reads with `arms` arms each.
    pub fn new(num_reads: usize, arms: usize) -> Result<Self, ReduceError> {
        if arms == 0 || arms > MAX_ARMS {
            return Err(ReduceError::InvalidConfiguration(format!(
                "arms per read must be 1 or 2, got {arms}"
            )));
        }
        let limit = u32::MAX as u64 + 1;
        let keys = (num_reads as u64).saturating_mul(arms as u64);
        if keys > limit {
            return Err(ReduceError::CapacityExceeded {
                what: "read arms",
                requested: keys,
                limit,
            });
        }
        Ok(Self {
            words: (0..keys).map(|_| AtomicU16::new(0)).collect(),
            arms,
        })
    }

    /// Arms per read.
    pub fn arms(&self) -> usize {
        self.arms
    }

    /// Number of read keys tracked.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether no reads are tracked.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Encoded key for `(read_index, arm)`.
    pub fn key(&self, read_index: u32, arm: usize) -> u32 {
        read_index * self.arms as u32 + arm as u32
    }

    /// Key of the other arm of the same read, if paired.
    pub fn mate_key(&self, key: u32) -> Option<u32> {
        (self.arms == 2).then_some(key ^ 1)
    }

    /// OR `flags` into the word of `key`.
    pub fn add_status(&self, key: u32, flags: OutcomeFlags) -> Result<(), ReduceError> {
        let word = self
            .words
            .get(key as usize)
            .ok_or(ReduceError::ReadOutOfRange {
                read: key,
                capacity: self.words.len(),
            })?;
        word.fetch_or(flags.bits(), Ordering::AcqRel);
        Ok(())
    }

    /// Current word of `key` (empty when out of range).
    pub fn status(&self, key: u32) -> OutcomeFlags {
        self.words
            .get(key as usize)
            .map(|word| OutcomeFlags::from_bits(word.load(Ordering::Acquire)))
            .unwrap_or_default()
    }

    /// Close recording and mark unwritten arms as unmapped.
    ///
    /// Takes the tracker by value, so no `add_status` can race the pass.
    pub fn finalize(self) -> OutcomeTable {
        let arms = self.arms;
        let words: Vec<OutcomeFlags> = self
            .words
            .into_iter()
            .map(|word| {
                let mut flags = OutcomeFlags::from_bits(word.into_inner());
                if !flags.is_written() {
                    flags |= OutcomeFlags::UNMAPPED;
                }
                flags
            })
            .collect();
        let unmapped = words
            .iter()
            .filter(|flags| flags.contains(OutcomeFlags::UNMAPPED))
            .count();
        tracing::debug!(keys = words.len(), unmapped, "finalized read outcomes");
        OutcomeTable { words, arms }
    }
}

/// Finalized, read-only outcome words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeTable {
    words: Vec<OutcomeFlags>,
    arms: usize,
}

impl OutcomeTable {
    /// Arms per read.
    pub fn arms(&self) -> usize {
        self.arms
    }

    /// Number of reads.
    pub fn num_reads(&self) -> usize {
        self.words.len() / self.arms
    }

    /// Final flags of `key`.
    pub fn flags(&self, key: u32) -> OutcomeFlags {
        self.words.get(key as usize).copied().unwrap_or_default()
    }

    /// Outcome of `key`.
    pub fn code(&self, key: u32) -> OutcomeCode {
        self.flags(key).classify()
    }

    /// Why `key` is unmapped, `None` when it was written.
    pub fn unmapped_reason(&self, key: u32) -> Option<UnmappedReason> {
        match self.code(key) {
            OutcomeCode::Unmapped(reason) => Some(reason),
            _ => None,
        }
    }

    /// Iterate over the outcome of every key in key order.
    pub fn codes(&self) -> impl Iterator<Item = OutcomeCode> + '_ {
        self.words.iter().map(|flags| flags.classify())
    }

    /// Bucket every arm and every read.
    pub fn statistics(&self) -> OutcomeStatistics {
        OutcomeStatistics::from_table(self)
    }

    /// One line per read, one outcome character per arm.
    pub fn write_codes<W: Write>(&self, mut out: W) -> io::Result<()> {
        let mut line = String::with_capacity(self.arms + 1);
        for read in self.words.chunks(self.arms) {
            line.clear();
            line.extend(read.iter().map(|flags| flags.classify().as_char()));
            line.push('\n');
            out.write_all(line.as_bytes())?;
        }
        out.flush()
    }

    pub(super) fn reads(&self) -> std::slice::Chunks<'_, OutcomeFlags> {
        self.words.chunks(self.arms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_marks_unwritten_arms() {
        let tracker = ReadOutcomeTracker::new(2, 2).unwrap();
        let first = tracker.key(0, 0);
        tracker
            .add_status(first, OutcomeFlags::HAS_HITS | OutcomeFlags::WRITTEN_UNMATED)
            .unwrap();
        tracker
            .add_status(tracker.key(1, 1), OutcomeFlags::HAS_HITS | OutcomeFlags::BLOCKED)
            .unwrap();

        let table = tracker.finalize();
        assert_eq!(table.code(0), OutcomeCode::Unmated);
        assert!(!table.flags(0).contains(OutcomeFlags::UNMAPPED));
        assert_eq!(table.unmapped_reason(1), Some(UnmappedReason::NoHits));
        assert_eq!(table.unmapped_reason(3), Some(UnmappedReason::Blocked));
    }

    #[test]
    fn bits_are_never_cleared() {
        let tracker = ReadOutcomeTracker::new(1, 1).unwrap();
        tracker.add_status(0, OutcomeFlags::BLOCKED).unwrap();
        tracker.add_status(0, OutcomeFlags::HAS_HITS).unwrap();
        tracker.add_status(0, OutcomeFlags::EMPTY).unwrap();
        assert!(tracker
            .status(0)
            .contains(OutcomeFlags::BLOCKED | OutcomeFlags::HAS_HITS));
    }

    #[test]
    fn out_of_range_and_bad_arms() {
        let tracker = ReadOutcomeTracker::new(1, 2).unwrap();
        assert!(tracker.add_status(2, OutcomeFlags::HAS_HITS).is_err());
        assert_eq!(tracker.mate_key(1), Some(0));
        assert!(ReadOutcomeTracker::new(1, 3).is_err());
        assert_eq!(ReadOutcomeTracker::new(4, 1).unwrap().mate_key(3), None);
    }

    #[test]
    fn writes_one_line_per_read() {
        let tracker = ReadOutcomeTracker::new(2, 2).unwrap();
        tracker.add_status(0, OutcomeFlags::WRITTEN_MATED).unwrap();
        tracker.add_status(1, OutcomeFlags::WRITTEN_MATED).unwrap();
        tracker
            .add_status(2, OutcomeFlags::HAS_HITS | OutcomeFlags::MATED)
            .unwrap();
        let mut out = Vec::new();
        tracker.finalize().write_codes(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "MM\nDN\n");
    }
}
