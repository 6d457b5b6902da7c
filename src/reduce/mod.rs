//! End-to-end driver: raw hits → ranked stores → kept hits → region shards → merge.
//!
//! ## Phases
//!
//! 1. **Sort** the raw buffer and split it into equal worker slices.
//! 2. **Rank** every owned hit into a lock-striped store on a bounded pool,
//!    polling the abort signal as hits stream through.
//! 3. **Snapshot** per-read best scores for the filter, then **drain** the
//!    store into a fresh buffer and release the raw one.
//! 4. **Sweep** the sorted kept hits against the genomic regions and write
//!    one shard per region, rescoring hits on the way out.
//! 5. **Merge** the shards with [`ShardMergePipeline`] and finalize outcomes.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::blocker::ReadScoreTable;
use crate::hits::{HitBuffer, LocusCodec, ScoreField};
use crate::merge::{
    AbortPoller, AbortSignal, BestScore, MergeJob, MergeReport, ShardMergePipeline, TempFiles,
    TsvFormatter,
};
use crate::outcome::{OutcomeFlags, OutcomeStatistics, OutcomeTable, ReadOutcomeTracker};
use crate::partition::{split_by_count, sweep_regions, GenomicRegion, WorkerSlice};
use crate::ranking::{Admission, ConcurrentRankedHitStore, RankedHitStore};
use crate::sources::{format_hit_line, HitScorer, ReadStore};
use crate::space::{MemoryLedger, MemoryProfile};
use crate::{RankingPolicy, ReduceError, ReductionConfig};

/// How many hits each admission outcome received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdmissionCounts {
    /// Stored in a free slot.
    pub kept: u64,
    /// Stored by evicting the worst kept hit.
    pub evicted: u64,
    /// Became the excluded boundary.
    pub excluded: u64,
    /// Tied the boundary.
    pub tied: u64,
    /// Worse than the boundary.
    pub rejected: u64,
    /// Duplicate locus.
    pub duplicate: u64,
    /// Read frozen.
    pub frozen: u64,
    /// The scorer returned no score.
    pub unscored: u64,
}

impl AdmissionCounts {
    fn count(&mut self, admission: Admission) {
        let bucket = match admission {
            Admission::Kept => &mut self.kept,
            Admission::Evicted => &mut self.evicted,
            Admission::Excluded => &mut self.excluded,
            Admission::Tied => &mut self.tied,
            Admission::Rejected => &mut self.rejected,
            Admission::Duplicate => &mut self.duplicate,
            Admission::Frozen => &mut self.frozen,
        };
        *bucket += 1;
    }

    /// Hits offered to the store.
    pub fn offered(&self) -> u64 {
        self.kept
            + self.evicted
            + self.excluded
            + self.tied
            + self.rejected
            + self.duplicate
            + self.frozen
    }
}

impl AddAssign for AdmissionCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.kept += rhs.kept;
        self.evicted += rhs.evicted;
        self.excluded += rhs.excluded;
        self.tied += rhs.tied;
        self.rejected += rhs.rejected;
        self.duplicate += rhs.duplicate;
        self.frozen += rhs.frozen;
        self.unscored += rhs.unscored;
    }
}

/// Output locations of one reduction.
#[derive(Debug, Clone)]
pub struct ReduceJob {
    /// Final merged file.
    pub output: PathBuf,
    /// Scratch directory for region shards and band files.
    pub work_dir: PathBuf,
    /// Per-read outcome codes, when requested.
    pub outcome_codes: Option<PathBuf>,
}

impl ReduceJob {
    /// Write `output`, using `work_dir` for scratch files.
    pub fn new(output: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            work_dir: work_dir.into(),
            outcome_codes: None,
        }
    }

    /// Also write one outcome line per read.
    pub fn with_outcome_codes(mut self, path: impl Into<PathBuf>) -> Self {
        self.outcome_codes = Some(path.into());
        self
    }

    /// Index path next to the output (`<output>.idx`).
    pub fn index_path(&self) -> PathBuf {
        sibling(&self.output, "idx")
    }

    /// Covariate table path next to the output (`<output>.cov`).
    pub fn calibration_path(&self) -> PathBuf {
        sibling(&self.output, "cov")
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Everything a reduction produced.
#[derive(Debug, Clone)]
pub struct ReductionReport {
    /// Hits in the raw buffer.
    pub raw_hits: usize,
    /// Hits left after ranking.
    pub kept_hits: usize,
    /// Admission outcome counts across workers.
    pub admissions: AdmissionCounts,
    /// Regions swept.
    pub regions: usize,
    /// Merge-stage report.
    pub merge: MergeReport,
    /// Final per-arm outcomes.
    pub outcomes: OutcomeTable,
    /// Bucketed outcome counts.
    pub statistics: OutcomeStatistics,
    /// Buffer and store memory over the run.
    pub memory: MemoryProfile,
}

struct Ranked {
    blocker: ReadScoreTable,
    kept: HitBuffer,
    admissions: AdmissionCounts,
    store_bytes: usize,
}

/// Runs the whole reduction for one batch of reads.
#[derive(Debug, Clone)]
pub struct HitReducer {
    config: ReductionConfig,
    codec: LocusCodec,
    num_reads: usize,
    arms: usize,
    template_lengths: Vec<u32>,
}

impl HitReducer {
    /// Reducer for `num_reads` reads of `arms` arms, loci encoded with `codec`.
    pub fn new(
        config: ReductionConfig,
        codec: LocusCodec,
        num_reads: usize,
        arms: usize,
    ) -> Result<Self, ReduceError> {
        config.validate()?;
        Ok(Self {
            config,
            codec,
            num_reads,
            arms,
            template_lengths: Vec::new(),
        })
    }

    /// Template lengths listed in the output header.
    pub fn with_template_lengths(mut self, lengths: Vec<u32>) -> Self {
        self.template_lengths = lengths;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    /// Reduce `raw` and merge the result into `job.output`.
    pub fn run(
        &self,
        mut raw: HitBuffer,
        regions: &[GenomicRegion],
        scorer: &dyn HitScorer,
        reads: &dyn ReadStore,
        job: &ReduceJob,
        abort: &AbortSignal,
    ) -> Result<ReductionReport, ReduceError> {
        let mut memory = MemoryLedger::new();
        let tracker = ReadOutcomeTracker::new(self.num_reads, self.arms)?;
        let read_keys = tracker.len();
        std::fs::create_dir_all(&job.work_dir).map_err(|e| ReduceError::shard_io(&job.work_dir, e))?;

        // Sort
        memory.enter_phase("sort");
        memory.allocate("raw", raw.heap_bytes());
        raw.sort();
        let raw_hits = raw.len();
        let workers = self.config.thread_cap;
        let slices = split_by_count(&raw, workers, self.config.region_padding);
        tracing::info!(raw_hits, workers, read_keys, "reduce: sorted raw hits");

        // Rank, snapshot, drain
        memory.enter_phase("rank");
        let stripes = self.config.lock_stripes;
        let n = self.config.results_per_read;
        let ranked = match self.config.policy {
            RankingPolicy::Score => self.rank(
                ConcurrentRankedHitStore::score_ranked(read_keys, n, self.codec, stripes)?,
                &raw,
                &slices,
                scorer,
                &tracker,
                abort,
            )?,
            RankingPolicy::PositionDedup => self.rank(
                ConcurrentRankedHitStore::position_dedup(read_keys, n, self.codec, stripes)?,
                &raw,
                &slices,
                scorer,
                &tracker,
                abort,
            )?,
        };
        memory.allocate("store", ranked.store_bytes);
        memory.allocate("kept", ranked.kept.heap_bytes());
        memory.release("store");
        raw.release();
        memory.release("raw");
        let Ranked {
            blocker,
            mut kept,
            admissions,
            ..
        } = ranked;
        tracing::info!(
            kept = kept.len(),
            offered = admissions.offered(),
            evicted = admissions.evicted,
            frozen = admissions.frozen,
            "reduce: ranked and drained hits"
        );

        // Sweep and write region shards
        memory.enter_phase("shard");
        kept.sort();
        let kept_hits = kept.len();
        let spans = sweep_regions(&kept, regions, self.config.region_padding)?;
        let temps = TempFiles::default();
        let shard_paths: Vec<PathBuf> = spans
            .iter()
            .map(|span| job.work_dir.join(format!("region-{:05}.hits", span.region_index)))
            .collect();
        for path in &shard_paths {
            temps.register(path.clone());
        }
        let pool = self.pool()?;
        pool.install(|| {
            spans
                .par_iter()
                .zip(shard_paths.par_iter())
                .try_for_each(|(span, path)| {
                    abort.check()?;
                    write_region_shard(&kept, span.core.clone(), scorer, path)
                })
        })?;
        kept.release();
        memory.release("kept");
        tracing::info!(regions = spans.len(), "reduce: wrote region shards");

        // Merge
        memory.enter_phase("merge");
        let mut merge_job = MergeJob::new(shard_paths, &job.output, &job.work_dir);
        if self.config.build_index {
            merge_job = merge_job.with_index(job.index_path());
        }
        if self.config.build_calibration {
            merge_job = merge_job.with_calibration(job.calibration_path());
        }
        let mut policy = BestScore::new(&blocker)
            .with_tracker(&tracker)
            .with_max_score(self.config.max_score);
        if self.arms == 2 {
            policy = policy.with_pairs(self.config.max_fragment);
        }
        let merge = ShardMergePipeline::new(
            self.config.merge_config(),
            policy,
            TsvFormatter::new(self.template_lengths.clone()),
        )
        .with_reads(reads)
        .run(&merge_job, abort)?;
        drop(temps);

        // Outcomes
        let outcomes = tracker.finalize();
        if let Some(path) = &job.outcome_codes {
            let file = File::create(path).map_err(|e| ReduceError::shard_io(path, e))?;
            outcomes
                .write_codes(BufWriter::new(file))
                .map_err(|e| ReduceError::shard_io(path, e))?;
        }
        let statistics = outcomes.statistics();
        tracing::info!(
            fully_mapped = statistics.fully_mapped,
            partially_mapped = statistics.partially_mapped,
            unmapped = statistics.unmapped,
            "reduce: finished"
        );

        Ok(ReductionReport {
            raw_hits,
            kept_hits,
            admissions,
            regions: spans.len(),
            merge,
            outcomes,
            statistics,
            memory: memory.profile(),
        })
    }

    fn pool(&self) -> Result<rayon::ThreadPool, ReduceError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_cap)
            .thread_name(|i| format!("reduce-{i}"))
            .build()
            .map_err(|e| ReduceError::ThreadPool(e.to_string()))
    }

    fn rank<S: RankedHitStore>(
        &self,
        mut store: ConcurrentRankedHitStore<S>,
        raw: &HitBuffer,
        slices: &[WorkerSlice],
        scorer: &dyn HitScorer,
        tracker: &ReadOutcomeTracker,
        abort: &AbortSignal,
    ) -> Result<Ranked, ReduceError> {
        let failed = AbortSignal::new();
        let interval = self.config.abort_check_interval;
        let per_worker = self.pool()?.install(|| {
            slices
                .par_iter()
                .map(|slice| {
                    let result = rank_slice(&store, raw, slice, scorer, tracker, abort, &failed, interval);
                    if result.is_err() {
                        failed.raise();
                    }
                    result
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        let mut admissions = AdmissionCounts::default();
        for counts in per_worker {
            admissions += counts;
        }

        // Barrier: every record() has returned.
        let blocker = ReadScoreTable::from_store(&store, self.config.max_ambiguity);
        let store_bytes = store.heap_bytes();
        let mut kept = HitBuffer::with_capacity(admissions.kept as usize);
        store.drain_into(&mut kept);
        Ok(Ranked {
            blocker,
            kept,
            admissions,
            store_bytes,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn rank_slice<S: RankedHitStore>(
    store: &ConcurrentRankedHitStore<S>,
    raw: &HitBuffer,
    slice: &WorkerSlice,
    scorer: &dyn HitScorer,
    tracker: &ReadOutcomeTracker,
    abort: &AbortSignal,
    failed: &AbortSignal,
    interval: usize,
) -> Result<AdmissionCounts, ReduceError> {
    let mut poller = AbortPoller::new(abort, failed, interval);
    let mut counts = AdmissionCounts::default();
    for hit in raw.iter_range(slice.owned.clone()) {
        poller.tick()?;
        tracker.add_status(hit.read, OutcomeFlags::HAS_HITS)?;
        match scorer.score(&hit) {
            Some(score) => counts.count(store.record(&hit.with_score(score))?),
            None => counts.unscored += 1,
        }
    }
    tracing::debug!(
        worker = slice.worker,
        owned = slice.owned.len(),
        context = slice.padded.len(),
        "worker ranked slice"
    );
    Ok(counts)
}

fn write_region_shard(
    kept: &HitBuffer,
    range: std::ops::Range<usize>,
    scorer: &dyn HitScorer,
    path: &Path,
) -> Result<(), ReduceError> {
    let file = File::create(path).map_err(|e| ReduceError::shard_io(path, e))?;
    let mut out = BufWriter::new(file);
    for hit in kept.iter_range(range) {
        let score = scorer.score(&hit).unwrap_or(ScoreField::MAX);
        let (score, _) = ScoreField::clamp(score);
        out.write_all(format_hit_line(&hit.with_score(score.get())).as_bytes())
            .map_err(|e| ReduceError::shard_io(path, e))?;
    }
    out.flush().map_err(|e| ReduceError::shard_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_paths_append_extension() {
        let job = ReduceJob::new("/tmp/out.tsv", "/tmp/work");
        assert_eq!(job.index_path(), PathBuf::from("/tmp/out.tsv.idx"));
        assert_eq!(job.calibration_path(), PathBuf::from("/tmp/out.tsv.cov"));
    }

    #[test]
    fn admission_counts_add_up() {
        let mut left = AdmissionCounts::default();
        left.count(Admission::Kept);
        left.count(Admission::Tied);
        let mut right = AdmissionCounts::default();
        right.count(Admission::Frozen);
        right.unscored = 2;
        left += right;
        assert_eq!(left.offered(), 3);
        assert_eq!(left.unscored, 2);
    }
}
