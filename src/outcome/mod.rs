//! Monotonic per-read status bitmask and the outcome classification built on it.
//!
//! Every read arm owns one [`OutcomeFlags`] word. Pipeline stages only ever
//! OR bits in ([`ReadOutcomeTracker::add_status`]); nothing clears them.
//! Once all stages are done the tracker is consumed by
//! [`ReadOutcomeTracker::finalize`], which marks arms that were never
//! written as unmapped and hands back a read-only [`OutcomeTable`]. All
//! classification is computed from the final word.

mod stats;
mod tracker;

pub use stats::{ArmStatistics, OutcomeStatistics};
pub use tracker::{OutcomeTable, ReadOutcomeTracker, MAX_ARMS};

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Named bits of one arm's status word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutcomeFlags(u16);

impl OutcomeFlags {
    /// No bits set.
    pub const EMPTY: Self = Self(0);
    /// The search produced at least one hit for the arm.
    pub const HAS_HITS: Self = Self(1 << 0);
    /// The blocker rejected the arm (too ambiguous).
    pub const BLOCKED: Self = Self(1 << 1);
    /// The arm's best hit pairs consistently with its mate's.
    pub const MATED: Self = Self(1 << 2);
    /// A record was written to the mated output.
    pub const WRITTEN_MATED: Self = Self(1 << 3);
    /// A record was written to the unmated output.
    pub const WRITTEN_UNMATED: Self = Self(1 << 4);
    /// Set by finalize on arms with no written record.
    pub const UNMAPPED: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::HAS_HITS, "HAS_HITS"),
        (Self::BLOCKED, "BLOCKED"),
        (Self::MATED, "MATED"),
        (Self::WRITTEN_MATED, "WRITTEN_MATED"),
        (Self::WRITTEN_UNMATED, "WRITTEN_UNMATED"),
        (Self::UNMAPPED, "UNMAPPED"),
    ];

    /// Raw bits.
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Rebuild from raw bits.
    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set.
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether a record was written for the arm, in either output.
    pub fn is_written(self) -> bool {
        self.intersects(Self::WRITTEN_MATED | Self::WRITTEN_UNMATED)
    }

    /// Canonical outcome, in priority order.
    ///
    /// Written arms are mated or unmated (mated wins). Unwritten arms are
    /// classified blocked > mated-filtered > unmated-filtered > no-hits.
    pub fn classify(self) -> OutcomeCode {
        if self.contains(Self::WRITTEN_MATED) {
            OutcomeCode::Mated
        } else if self.contains(Self::WRITTEN_UNMATED) {
            OutcomeCode::Unmated
        } else if self.contains(Self::BLOCKED) {
            OutcomeCode::Unmapped(UnmappedReason::Blocked)
        } else if self.contains(Self::MATED) {
            OutcomeCode::Unmapped(UnmappedReason::MatedFiltered)
        } else if self.contains(Self::HAS_HITS) {
            OutcomeCode::Unmapped(UnmappedReason::UnmatedFiltered)
        } else {
            OutcomeCode::Unmapped(UnmappedReason::NoHits)
        }
    }
}

impl BitOr for OutcomeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OutcomeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for OutcomeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "OutcomeFlags(EMPTY)")
        } else {
            write!(f, "OutcomeFlags({})", names.join(" | "))
        }
    }
}

/// Why an arm ended up unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnmappedReason {
    /// Rejected by the blocker.
    Blocked,
    /// Paired consistently but no record survived the filter.
    MatedFiltered,
    /// Had hits, not mated, and no record survived the filter.
    UnmatedFiltered,
    /// The search found nothing.
    NoHits,
}

/// Final outcome of one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    /// Written to the mated output.
    Mated,
    /// Written to the unmated output.
    Unmated,
    /// Not written anywhere.
    Unmapped(UnmappedReason),
}

impl OutcomeCode {
    /// One-character code used by [`OutcomeTable::write_codes`].
    pub fn as_char(self) -> char {
        match self {
            OutcomeCode::Mated => 'M',
            OutcomeCode::Unmated => 'U',
            OutcomeCode::Unmapped(UnmappedReason::Blocked) => 'B',
            OutcomeCode::Unmapped(UnmappedReason::MatedFiltered) => 'D',
            OutcomeCode::Unmapped(UnmappedReason::UnmatedFiltered) => 'F',
            OutcomeCode::Unmapped(UnmappedReason::NoHits) => 'N',
        }
    }

    /// Whether the arm was written to some output.
    pub fn is_mapped(self) -> bool {
        !matches!(self, OutcomeCode::Unmapped(_))
    }
}
