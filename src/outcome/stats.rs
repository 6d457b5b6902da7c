//! Mutually exclusive outcome buckets.

use std::fmt;

use super::{OutcomeCode, OutcomeTable, UnmappedReason};

/// Per-arm outcome counts. Every arm lands in exactly one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArmStatistics {
    /// Written as mated.
    pub mated: u64,
    /// Written as unmated.
    pub unmated: u64,
    /// Blocked.
    pub blocked: u64,
    /// Mated but filtered.
    pub mated_filtered: u64,
    /// Had hits but filtered.
    pub unmated_filtered: u64,
    /// No hits.
    pub no_hits: u64,
}

impl ArmStatistics {
    fn count(&mut self, code: OutcomeCode) {
        let bucket = match code {
            OutcomeCode::Mated => &mut self.mated,
            OutcomeCode::Unmated => &mut self.unmated,
            OutcomeCode::Unmapped(UnmappedReason::Blocked) => &mut self.blocked,
            OutcomeCode::Unmapped(UnmappedReason::MatedFiltered) => &mut self.mated_filtered,
            OutcomeCode::Unmapped(UnmappedReason::UnmatedFiltered) => &mut self.unmated_filtered,
            OutcomeCode::Unmapped(UnmappedReason::NoHits) => &mut self.no_hits,
        };
        *bucket += 1;
    }

    /// Sum over all buckets.
    pub fn total(&self) -> u64 {
        self.mated
            + self.unmated
            + self.blocked
            + self.mated_filtered
            + self.unmated_filtered
            + self.no_hits
    }

    /// Arms written to some output.
    pub fn mapped(&self) -> u64 {
        self.mated + self.unmated
    }
}

/// Arm buckets plus read-level counts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutcomeStatistics {
    /// One entry per arm.
    pub arms: Vec<ArmStatistics>,
    /// Reads with every arm mapped.
    pub fully_mapped: u64,
    /// Reads with some but not all arms mapped.
    pub partially_mapped: u64,
    /// Reads with no arm mapped.
    pub unmapped: u64,
}

impl OutcomeStatistics {
    pub(super) fn from_table(table: &OutcomeTable) -> Self {
        let mut stats = OutcomeStatistics {
            arms: vec![ArmStatistics::default(); table.arms()],
            ..Default::default()
        };
        for read in table.reads() {
            let mut mapped = 0;
            for (arm, flags) in read.iter().enumerate() {
                let code = flags.classify();
                stats.arms[arm].count(code);
                mapped += code.is_mapped() as usize;
            }
            match mapped {
                0 => stats.unmapped += 1,
                n if n == read.len() => stats.fully_mapped += 1,
                _ => stats.partially_mapped += 1,
            }
        }
        stats
    }

    /// Number of reads counted.
    pub fn reads(&self) -> u64 {
        self.fully_mapped + self.partially_mapped + self.unmapped
    }
}

impl fmt::Display for OutcomeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "reads\t{}", self.reads())?;
        writeln!(f, "fully_mapped\t{}", self.fully_mapped)?;
        writeln!(f, "partially_mapped\t{}", self.partially_mapped)?;
        writeln!(f, "unmapped\t{}", self.unmapped)?;
        for (arm, s) in self.arms.iter().enumerate() {
            writeln!(
                f,
                "arm{}\tmated={}\tunmated={}\tblocked={}\tmated_filtered={}\tunmated_filtered={}\tno_hits={}",
                arm + 1,
                s.mated,
                s.unmated,
                s.blocked,
                s.mated_filtered,
                s.unmated_filtered,
                s.no_hits
            )?;
        }
        Ok(())
    }
}
