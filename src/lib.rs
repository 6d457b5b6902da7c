//! # Result reduction for short-read alignment
//!
//! This library turns an unordered, massively parallel stream of raw
//! candidate hits `(template, position, read, strand, score)` into a small,
//! ordered, deduplicated set of best alignments per read, and merges the
//! per-worker output shards into one byte-exact final file with a merged
//! index and calibration table.
//!
//! ## Stages
//!
//! 1. **Accumulate**: raw hits land in a columnar [`HitBuffer`] and are sorted
//!    by `(template, position, read)`.
//! 2. **Rank**: worker threads feed hits into a [`ConcurrentRankedHitStore`]
//!    that keeps at most `N` entries per read (score-ranked or
//!    position-deduplicating).
//! 3. **Partition**: kept hits are drained into a fresh buffer and swept
//!    against genomic regions ([`partition::sweep_regions`]).
//! 4. **Merge**: per-region shard files run through the
//!    [`ShardMergePipeline`] (filter, concatenate, index, calibrate).
//!
//! Read outcomes are tracked in a monotonic per-arm bitmask
//! ([`ReadOutcomeTracker`]) and bucketed into statistics at the end.
//!
//! ## Usage Example
//!
//! ```ignore
//! use hitreduce::{AbortSignal, HitReducer, ReduceJob, ReductionConfig};
//!
//! let config = ReductionConfig::new(2).with_thread_cap(4);
//! let reducer = HitReducer::new(config, codec, num_reads, 1)?;
//! let job = ReduceJob::new("out.tsv", "work");
//! let report = reducer.run(raw_hits, &regions, &scorer, &reads, &job, &AbortSignal::new())?;
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

pub mod hits;      // Raw hit columns and bit-packed fields
pub mod ranking;   // Bounded per-read top-N stores
pub mod partition; // Genomic work partitioning
pub mod outcome;   // Per-read status bitmask
pub mod blocker;   // Per-read score gates for the filter stage
pub mod sources;   // External collaborator interfaces
pub mod merge;     // Shard merge pipeline
pub mod space;     // Phase-scoped memory accounting
pub mod reduce;    // End-to-end driver

// Re-exports for convenience
pub use hits::{BufferedHit, Hit, HitBuffer, LocusCodec};
pub use ranking::{
    Admission, ConcurrentRankedHitStore, PositionDedupStore, RankSummary, RankedHitStore,
    ScoreRankedStore,
};
pub use partition::{GenomicRegion, RegionSpan, WorkerSlice};
pub use outcome::{
    OutcomeCode, OutcomeFlags, OutcomeStatistics, OutcomeTable, ReadOutcomeTracker,
    UnmappedReason,
};
pub use merge::{AbortSignal, MergeConfig, MergeJob, MergeReport, ShardMergePipeline};
pub use reduce::{HitReducer, ReduceJob, ReductionReport};

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while ranking, partitioning or merging hits.
#[derive(Error, Debug)]
pub enum ReduceError {
    /// The configured read/template/position space does not fit the fixed bit widths.
    #[error("capacity exceeded for {what}: requested {requested}, limit {limit}")]
    CapacityExceeded {
        /// Which quantity overflowed.
        what: &'static str,
        /// Requested size.
        requested: u64,
        /// Largest representable size.
        limit: u64,
    },

    /// A hit's locus lies outside the range the codec was built for.
    #[error("position {position} on template {template} cannot be encoded")]
    PositionOutOfRange {
        /// Template id of the offending hit.
        template: u32,
        /// Position of the offending hit.
        position: i32,
    },

    /// Read id is not covered by the store or tracker.
    #[error("read {read} out of range (capacity {capacity})")]
    ReadOutOfRange {
        /// Offending read id.
        read: u32,
        /// Number of reads the structure was built for.
        capacity: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure tied to a specific shard, band or output file.
    #[error("I/O error on {}: {source}", path.display())]
    ShardIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A raw-hit shard line could not be parsed.
    #[error("malformed shard {}:{line}: {reason}", path.display())]
    MalformedShard {
        /// Shard file.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },

    /// The index consumer thread failed, even if the band writer succeeded.
    #[error("index builder failed: {0}")]
    IndexConsumer(String),

    /// The cooperative abort signal was raised.
    #[error("aborted")]
    Aborted,

    /// A phase tried to start before every band finished the previous one.
    #[error("{phase} started with {missing} band(s) incomplete")]
    BarrierViolation {
        /// Phase that was about to start.
        phase: &'static str,
        /// Number of bands that had not finished.
        missing: usize,
    },

    /// The bounded worker pool could not be created.
    #[error("worker pool error: {0}")]
    ThreadPool(String),
}

impl ReduceError {
    /// Attach a path to an I/O error.
    pub fn shard_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReduceError::ShardIo {
            path: path.into(),
            source,
        }
    }
}

/// Which per-read retention policy the ranking stage uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingPolicy {
    /// Keep the `N` lowest scores, tracking the excluded boundary.
    Score,
    /// Keep `N` distinct positions, freeze the read on overflow.
    PositionDedup,
}

/// Configuration parameters for the reduction and merge stages.
#[derive(Debug, Clone)]
pub struct ReductionConfig {
    /// Results kept per read (`N`).
    pub results_per_read: usize,

    /// Retention policy of the ranked store.
    pub policy: RankingPolicy,

    /// Reads with more equally-best hits than this are blocked.
    pub max_ambiguity: u32,

    /// Best hits scoring above this are filtered.
    pub max_score: Option<u16>,

    /// Largest distance between mate primaries that still counts as mated.
    pub max_fragment: u32,

    /// Ceiling on merge/worker threads (disk bandwidth, not core count).
    pub thread_cap: usize,

    /// Padding applied around regions and worker slices, in bases.
    pub region_padding: u32,

    /// Number of mutex slots in the striped store.
    pub lock_stripes: usize,

    /// Build a merged byte-offset index.
    pub build_index: bool,

    /// Build a merged covariate table.
    pub build_calibration: bool,

    /// Records between abort-signal polls.
    pub abort_check_interval: usize,

    /// Width of one index bin, in bases.
    pub index_bin_width: u32,
}

/// Default merge thread ceiling.
pub const DEFAULT_THREAD_CAP: usize = 8;
/// Default number of lock stripes.
pub const DEFAULT_LOCK_STRIPES: usize = 65_536;
/// Default abort polling interval.
pub const DEFAULT_ABORT_CHECK_INTERVAL: usize = 4_096;
/// Default index bin width.
pub const DEFAULT_INDEX_BIN_WIDTH: u32 = 16_384;
/// Default maximum fragment length for mate pairing.
pub const DEFAULT_MAX_FRAGMENT: u32 = 1_000;

impl ReductionConfig {
    /// Score-ranked configuration keeping `results_per_read` hits per read.
    pub fn new(results_per_read: usize) -> Self {
        Self {
            results_per_read,
            policy: RankingPolicy::Score,
            max_ambiguity: u32::MAX,
            max_score: None,
            max_fragment: DEFAULT_MAX_FRAGMENT,
            thread_cap: DEFAULT_THREAD_CAP,
            region_padding: 0,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            build_index: false,
            build_calibration: false,
            abort_check_interval: DEFAULT_ABORT_CHECK_INTERVAL,
            index_bin_width: DEFAULT_INDEX_BIN_WIDTH,
        }
    }

    /// Select the retention policy.
    pub fn with_policy(mut self, policy: RankingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the ambiguity threshold used by the blocker.
    pub fn with_max_ambiguity(mut self, max_ambiguity: u32) -> Self {
        self.max_ambiguity = max_ambiguity;
        self
    }

    /// Filter best hits scoring above `max_score`.
    pub fn with_max_score(mut self, max_score: Option<u16>) -> Self {
        self.max_score = max_score;
        self
    }

    /// Set the mate-pairing distance.
    pub fn with_max_fragment(mut self, max_fragment: u32) -> Self {
        self.max_fragment = max_fragment;
        self
    }

    /// Set the thread ceiling.
    pub fn with_thread_cap(mut self, thread_cap: usize) -> Self {
        self.thread_cap = thread_cap;
        self
    }

    /// Set region padding.
    pub fn with_region_padding(mut self, padding: u32) -> Self {
        self.region_padding = padding;
        self
    }

    /// Set the number of lock stripes.
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Enable index merging.
    pub fn with_index(mut self, enabled: bool) -> Self {
        self.build_index = enabled;
        self
    }

    /// Enable calibration merging.
    pub fn with_calibration(mut self, enabled: bool) -> Self {
        self.build_calibration = enabled;
        self
    }

    /// Set the abort polling interval.
    pub fn with_abort_check_interval(mut self, interval: usize) -> Self {
        self.abort_check_interval = interval;
        self
    }

    /// Set the index bin width.
    pub fn with_index_bin_width(mut self, width: u32) -> Self {
        self.index_bin_width = width;
        self
    }

    /// Reject zero-valued parameters.
    pub fn validate(&self) -> Result<(), ReduceError> {
        if self.results_per_read == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "results per read must be > 0".to_string(),
            ));
        }
        if self.thread_cap == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "thread cap must be > 0".to_string(),
            ));
        }
        if self.lock_stripes == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "lock stripes must be > 0".to_string(),
            ));
        }
        if self.abort_check_interval == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "abort check interval must be > 0".to_string(),
            ));
        }
        if self.index_bin_width == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "index bin width must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Merge-stage view of this configuration.
    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            thread_cap: self.thread_cap,
            abort_check_interval: self.abort_check_interval,
            index_bin_width: self.index_bin_width,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = ReductionConfig::new(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_stripes, DEFAULT_LOCK_STRIPES);
        assert_eq!(config.policy, RankingPolicy::Score);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(ReductionConfig::new(0).validate().is_err());
        assert!(ReductionConfig::new(1).with_thread_cap(0).validate().is_err());
        assert!(ReductionConfig::new(1).with_lock_stripes(0).validate().is_err());
        assert!(ReductionConfig::new(1)
            .with_abort_check_interval(0)
            .validate()
            .is_err());
    }
}
