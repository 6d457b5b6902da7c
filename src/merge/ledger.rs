//! Per-band phase completion bits.

use bitvec::prelude::*;

use crate::ReduceError;

/// Tracks which bands finished Filter and PostProcess.
///
/// Space: 2 bits per band.
#[derive(Debug)]
pub struct BandLedger {
    /// Filter finished (1 bit per band)
    filtered: BitVec,
    /// PostProcess finished (1 bit per band)
    post_processed: BitVec,
    num_bands: usize,
}

impl BandLedger {
    /// Ledger for `num_bands` bands, nothing complete.
    pub fn new(num_bands: usize) -> Self {
        Self {
            filtered: bitvec![0; num_bands],
            post_processed: bitvec![0; num_bands],
            num_bands,
        }
    }

    /// Number of bands.
    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Mark a band's filter task complete.
    pub fn mark_filtered(&mut self, band: usize) {
        self.filtered.set(band, true);
    }

    /// Mark a band's post-processing complete.
    pub fn mark_post_processed(&mut self, band: usize) {
        self.post_processed.set(band, true);
    }

    /// Whether the band finished filtering.
    pub fn is_filtered(&self, band: usize) -> bool {
        self.filtered[band]
    }

    /// Whether the band finished post-processing.
    pub fn is_post_processed(&self, band: usize) -> bool {
        self.post_processed[band]
    }

    /// Fail with `BarrierViolation` unless every band finished filtering.
    pub fn require_filtered(&self, phase: &'static str) -> Result<(), ReduceError> {
        let missing = self.filtered.count_zeros();
        if missing > 0 {
            return Err(ReduceError::BarrierViolation { phase, missing });
        }
        Ok(())
    }

    /// Fail unless every band in `bands` finished post-processing.
    pub fn require_post_processed(
        &self,
        phase: &'static str,
        bands: impl IntoIterator<Item = usize>,
    ) -> Result<(), ReduceError> {
        let missing = bands
            .into_iter()
            .filter(|&band| !self.post_processed[band])
            .count();
        if missing > 0 {
            return Err(ReduceError::BarrierViolation { phase, missing });
        }
        Ok(())
    }

    /// Completion counts: (filtered, post-processed).
    pub fn completion_stats(&self) -> (usize, usize) {
        (self.filtered.count_ones(), self.post_processed.count_ones())
    }

    /// Ledger footprint in bytes.
    pub fn space_usage(&self) -> usize {
        (self.num_bands * 2).div_ceil(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_reports_missing_bands() {
        let mut ledger = BandLedger::new(3);
        ledger.mark_filtered(0);
        ledger.mark_filtered(2);
        match ledger.require_filtered("concatenate") {
            Err(ReduceError::BarrierViolation { phase, missing }) => {
                assert_eq!(phase, "concatenate");
                assert_eq!(missing, 1);
            }
            other => panic!("expected barrier violation, got {other:?}"),
        }
        ledger.mark_filtered(1);
        assert!(ledger.require_filtered("concatenate").is_ok());
        assert_eq!(ledger.completion_stats(), (3, 0));
    }

    #[test]
    fn post_process_barrier_only_checks_listed_bands() {
        let mut ledger = BandLedger::new(2);
        ledger.mark_post_processed(1);
        assert!(ledger.require_post_processed("concatenate", [1]).is_ok());
        assert!(ledger.require_post_processed("concatenate", [0, 1]).is_err());
        assert!(ledger.is_post_processed(1));
        assert_eq!(ledger.space_usage(), 1);
    }
}
