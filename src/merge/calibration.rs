//! Per-band covariate counts, merged by summation.

use std::collections::BTreeMap;
use std::io::{self, Write};

/// Bases of mean quality folded into one quality bin.
pub const QUALITY_BIN_WIDTH: u8 = 10;

/// Covariate key of one written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Covariate {
    /// Reverse strand.
    pub is_reverse: bool,
    /// Alignment score.
    pub score: u16,
    /// Read length.
    pub read_length: u32,
    /// `mean_quality / QUALITY_BIN_WIDTH`.
    pub quality_bin: u8,
}

impl Covariate {
    /// Key for one record.
    pub fn new(is_reverse: bool, score: u16, read_length: u32, mean_quality: u8) -> Self {
        Self {
            is_reverse,
            score,
            read_length,
            quality_bin: mean_quality / QUALITY_BIN_WIDTH,
        }
    }
}

/// Covariate histogram owned by one band task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CovariateTable {
    counts: BTreeMap<Covariate, u64>,
}

impl CovariateTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one record.
    pub fn add(&mut self, covariate: Covariate) {
        *self.counts.entry(covariate).or_insert(0) += 1;
    }

    /// Add every count of `other`.
    pub fn merge(&mut self, other: &CovariateTable) {
        for (&covariate, &count) in &other.counts {
            *self.counts.entry(covariate).or_insert(0) += count;
        }
    }

    /// Count for one key.
    pub fn count(&self, covariate: &Covariate) -> u64 {
        self.counts.get(covariate).copied().unwrap_or(0)
    }

    /// Distinct keys.
    pub fn rows(&self) -> usize {
        self.counts.len()
    }

    /// Records counted.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Sorted TSV: `strand score read_length quality_bin count`.
    pub fn write_tsv<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "#strand\tscore\tread_length\tquality_bin\tcount")?;
        for (covariate, count) in &self.counts {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}",
                if covariate.is_reverse { '-' } else { '+' },
                covariate.score,
                covariate.read_length,
                covariate.quality_bin,
                count
            )?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sums_counts() {
        let key = Covariate::new(false, 3, 100, 37);
        let other_key = Covariate::new(true, 3, 100, 37);
        assert_eq!(key.quality_bin, 3);

        let mut left = CovariateTable::new();
        left.add(key);
        left.add(key);
        let mut right = CovariateTable::new();
        right.add(key);
        right.add(other_key);

        left.merge(&right);
        assert_eq!(left.count(&key), 3);
        assert_eq!(left.count(&other_key), 1);
        assert_eq!((left.rows(), left.total()), (2, 4));

        let mut out = Vec::new();
        left.write_tsv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "#strand\tscore\tread_length\tquality_bin\tcount\n+\t3\t100\t3\t3\n-\t3\t100\t3\t1\n"
        );
    }
}
