//! Shard merge pipeline: Partition → Filter‖ → PostProcess → Concatenate →
//! IndexMerge → CalibrationMerge → Cleanup.
//!
//! Per-region shard files are grouped into bands, each band is filtered by
//! its own task on a bounded pool, and the band files are concatenated byte
//! for byte in band order. Completion order never affects the output.
//!
//! ## Failure semantics
//!
//! - The first failing band task raises an internal abort flag; the other
//!   tasks observe it at their next poll and unwind.
//! - The index consumer thread is always joined and its result checked,
//!   even when the band writer succeeded.
//! - Temporary band files are removed on every exit path; a partially
//!   written final file is removed when concatenation fails.

mod abort;
mod band;
mod calibration;
mod filter;
mod format;
mod index;
mod ledger;

pub use abort::AbortSignal;
pub use band::{plan_bands, BandOutput, BandPlan, BandSummary};
pub use calibration::{Covariate, CovariateTable, QUALITY_BIN_WIDTH};
pub use filter::{BandPostProcessor, BestScore, FilterPolicy, PassThrough};
pub use format::{
    OutputRecord, RecordFormatter, TsvFormatter, FLAG_MATED, FLAG_REVERSE, FLAG_SECONDARY,
};
pub use index::{merge_fragments, write_index, IndexBuilder, IndexEntry, TeeWriter};
pub use ledger::BandLedger;

pub(crate) use abort::AbortPoller;
pub(crate) use band::TempFiles;

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::sources::{parse_hit_line, ReadStore};
use crate::ReduceError;

/// Chunks in flight between a band writer and its index consumer.
const TEE_CHANNEL_DEPTH: usize = 16;

/// Merge-stage parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeConfig {
    /// Ceiling on concurrent band tasks.
    pub thread_cap: usize,
    /// Records between abort polls.
    pub abort_check_interval: usize,
    /// Index bin width in bases.
    pub index_bin_width: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            thread_cap: crate::DEFAULT_THREAD_CAP,
            abort_check_interval: crate::DEFAULT_ABORT_CHECK_INTERVAL,
            index_bin_width: crate::DEFAULT_INDEX_BIN_WIDTH,
        }
    }
}

/// Files of one merge.
#[derive(Debug, Clone)]
pub struct MergeJob {
    /// Shard files in region order.
    pub inputs: Vec<PathBuf>,
    /// Final output file.
    pub output: PathBuf,
    /// Merged index, when requested.
    pub index_output: Option<PathBuf>,
    /// Merged covariate table, when requested.
    pub calibration_output: Option<PathBuf>,
    /// Directory for temporary band files.
    pub work_dir: PathBuf,
}

impl MergeJob {
    /// Merge `inputs` into `output`, using `work_dir` for band files.
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output: output.into(),
            index_output: None,
            calibration_output: None,
            work_dir: work_dir.into(),
        }
    }

    /// Also write a merged index.
    pub fn with_index(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_output = Some(path.into());
        self
    }

    /// Also write a merged covariate table.
    pub fn with_calibration(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration_output = Some(path.into());
        self
    }
}

/// Outcome of a successful merge.
#[derive(Debug, Clone)]
pub struct MergeReport {
    /// Per-band counts, in band order.
    pub bands: Vec<BandSummary>,
    /// Final file length.
    pub total_bytes: u64,
    /// Records written across bands.
    pub records_written: u64,
    /// Hits filtered across bands.
    pub records_filtered: u64,
    /// blake3 digest of the final file.
    pub digest: blake3::Hash,
    /// Entries in the merged index.
    pub index_entries: usize,
    /// Rows in the merged covariate table.
    pub calibration_rows: usize,
}

/// Bounded-parallel shard merger.
pub struct ShardMergePipeline<'a, P, F> {
    config: MergeConfig,
    policy: P,
    formatter: F,
    reads: Option<&'a dyn ReadStore>,
    post: Option<&'a dyn BandPostProcessor>,
}

impl<P, F> std::fmt::Debug for ShardMergePipeline<'_, P, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardMergePipeline")
            .field("config", &self.config)
            .field("calibration_reads", &self.reads.is_some())
            .field("post_processor", &self.post.is_some())
            .finish()
    }
}

impl<'a, P: FilterPolicy, F: RecordFormatter> ShardMergePipeline<'a, P, F> {
    /// Pipeline applying `policy` and writing with `formatter`.
    pub fn new(config: MergeConfig, policy: P, formatter: F) -> Self {
        Self {
            config,
            policy,
            formatter,
            reads: None,
            post: None,
        }
    }

    /// Read metadata for the covariate accumulators.
    pub fn with_reads(mut self, reads: &'a dyn ReadStore) -> Self {
        self.reads = Some(reads);
        self
    }

    /// Run `post` over finished bands before concatenation.
    pub fn with_post_processor(mut self, post: &'a dyn BandPostProcessor) -> Self {
        self.post = Some(post);
        self
    }

    /// Run every phase of `job`.
    pub fn run(&self, job: &MergeJob, abort: &AbortSignal) -> Result<MergeReport, ReduceError> {
        if self.config.thread_cap == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "thread cap must be > 0".to_string(),
            ));
        }
        if job.calibration_output.is_some() && self.reads.is_none() {
            return Err(ReduceError::InvalidConfiguration(
                "calibration needs a read store".to_string(),
            ));
        }
        fs::create_dir_all(&job.work_dir).map_err(|e| ReduceError::shard_io(&job.work_dir, e))?;

        // Partition
        let plans = plan_bands(&job.inputs, self.config.thread_cap);
        tracing::info!(
            shards = job.inputs.len(),
            bands = plans.len(),
            "merge: partitioned shards into bands"
        );
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plans.len())
            .thread_name(|i| format!("merge-band-{i}"))
            .build()
            .map_err(|e| ReduceError::ThreadPool(e.to_string()))?;
        let temps = TempFiles::default();
        let failed = AbortSignal::new();
        let last_band = plans.len() - 1;
        let with_index = job.index_output.is_some();
        let with_calibration = job.calibration_output.is_some();

        // Filter
        let mut outputs: Vec<BandOutput> = pool.install(|| {
            plans
                .par_iter()
                .map(|plan| {
                    let result = self.filter_band(
                        plan,
                        last_band,
                        &job.work_dir,
                        with_index,
                        with_calibration,
                        &temps,
                        abort,
                        &failed,
                    );
                    if let Err(e) = &result {
                        if !failed.is_raised() {
                            tracing::error!(band = plan.band, error = %e, "band filter failed, aborting merge");
                        }
                        failed.raise();
                    }
                    result
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        outputs.sort_by_key(|out| out.band);

        let mut ledger = BandLedger::new(plans.len());
        for out in &outputs {
            ledger.mark_filtered(out.band);
        }

        // PostProcess
        if let Some(post) = self.post {
            ledger.require_filtered("post-process")?;
            let rewritten: Vec<usize> = plans
                .iter()
                .filter(|plan| post.needs_rewrite(plan.band))
                .map(|plan| plan.band)
                .collect();
            let refreshed = pool.install(|| {
                rewritten
                    .par_iter()
                    .map(|&band| {
                        abort.check()?;
                        let refreshed =
                            self.post_process_band(post, &plans[band], &job.work_dir, with_index, &temps);
                        if refreshed.is_err() {
                            failed.raise();
                        }
                        refreshed
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?;
            for (band, bytes, index) in refreshed {
                outputs[band].bytes = bytes;
                if with_index {
                    outputs[band].index = index;
                }
                ledger.mark_post_processed(band);
            }
            ledger.require_post_processed("concatenate", rewritten.iter().copied())?;
            tracing::info!(bands = rewritten.len(), "merge: post-processed bands");
        }

        // Concatenate
        ledger.require_filtered("concatenate")?;
        abort.check()?;
        let (total_bytes, digest) = concatenate(&outputs, &job.output)?;
        tracing::info!(
            output = %job.output.display(),
            bytes = total_bytes,
            digest = %digest.to_hex(),
            "merge: concatenated bands"
        );

        // IndexMerge
        let mut index_entries = 0;
        if let Some(path) = &job.index_output {
            let mut band_offset = 0u64;
            let mut fragments = Vec::with_capacity(outputs.len());
            for out in &outputs {
                fragments.push((band_offset, out.index.as_deref().unwrap_or_default()));
                band_offset += out.bytes;
            }
            let merged = merge_fragments(fragments);
            index_entries = merged.len();
            let file = File::create(path).map_err(|e| ReduceError::shard_io(path, e))?;
            write_index(&merged, BufWriter::new(file)).map_err(|e| ReduceError::shard_io(path, e))?;
            tracing::info!(entries = index_entries, "merge: wrote index");
        }

        // CalibrationMerge
        let mut calibration_rows = 0;
        if let Some(path) = &job.calibration_output {
            let mut merged = CovariateTable::new();
            for table in outputs.iter().filter_map(|out| out.covariates.as_ref()) {
                merged.merge(table);
            }
            calibration_rows = merged.rows();
            let file = File::create(path).map_err(|e| ReduceError::shard_io(path, e))?;
            merged
                .write_tsv(BufWriter::new(file))
                .map_err(|e| ReduceError::shard_io(path, e))?;
            tracing::info!(rows = calibration_rows, "merge: wrote covariate table");
        }

        // Cleanup happens when `temps` drops.
        let bands: Vec<BandSummary> = outputs
            .iter()
            .map(|out| BandSummary {
                band: out.band,
                inputs: plans[out.band].inputs.len(),
                bytes: out.bytes,
                records_written: out.records_written,
                records_filtered: out.records_filtered,
            })
            .collect();
        Ok(MergeReport {
            records_written: bands.iter().map(|b| b.records_written).sum(),
            records_filtered: bands.iter().map(|b| b.records_filtered).sum(),
            bands,
            total_bytes,
            digest,
            index_entries,
            calibration_rows,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn filter_band(
        &self,
        plan: &BandPlan,
        last_band: usize,
        work_dir: &Path,
        with_index: bool,
        with_calibration: bool,
        temps: &TempFiles,
        abort: &AbortSignal,
        failed: &AbortSignal,
    ) -> Result<BandOutput, ReduceError> {
        let path = plan.part_path(work_dir);
        let file = File::create(&path).map_err(|e| ReduceError::shard_io(&path, e))?;
        temps.register(path.clone());
        let mut poller = AbortPoller::new(abort, failed, self.config.abort_check_interval);
        poller.check()?;

        let (sender, receiver) = if with_index {
            let (tx, rx) = crossbeam_channel::bounded::<Vec<u8>>(TEE_CHANNEL_DEPTH);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (written, index) = std::thread::scope(|scope| {
            let consumer = receiver.map(|rx| {
                let builder = IndexBuilder::new(&self.formatter, self.config.index_bin_width);
                scope.spawn(move || builder.consume(rx))
            });

            let mut tee = TeeWriter::new(BufWriter::new(file), sender);
            let written = self
                .write_band(plan, last_band, &path, &mut tee, with_calibration, &mut poller)
                .and_then(|counts| {
                    let (_, bytes) = tee.finish().map_err(|e| ReduceError::shard_io(&path, e))?;
                    Ok((counts, bytes))
                });

            // Always join and check the consumer, even if the writer succeeded.
            let index = match consumer {
                Some(handle) => match handle.join() {
                    Ok(Ok((entries, indexed_bytes))) => Ok(Some((entries, indexed_bytes))),
                    Ok(Err(reason)) => Err(ReduceError::IndexConsumer(reason)),
                    Err(_) => Err(ReduceError::IndexConsumer(
                        "index consumer thread panicked".to_string(),
                    )),
                },
                None => Ok(None),
            };
            (written, index)
        });

        let ((records_written, records_filtered, covariates), bytes) = written?;
        let index = match index? {
            Some((entries, indexed_bytes)) => {
                if indexed_bytes != bytes {
                    return Err(ReduceError::IndexConsumer(format!(
                        "band {} indexed {indexed_bytes} of {bytes} bytes",
                        plan.band
                    )));
                }
                Some(entries)
            }
            None => None,
        };

        tracing::debug!(
            band = plan.band,
            inputs = plan.inputs.len(),
            bytes,
            records_written,
            records_filtered,
            "band filtered"
        );
        Ok(BandOutput {
            band: plan.band,
            path,
            bytes,
            records_written,
            records_filtered,
            index,
            covariates,
        })
    }

    fn write_band<W: Write>(
        &self,
        plan: &BandPlan,
        last_band: usize,
        path: &Path,
        out: &mut W,
        with_calibration: bool,
        poller: &mut AbortPoller<'_>,
    ) -> Result<(u64, u64, Option<CovariateTable>), ReduceError> {
        let mut written = 0u64;
        let mut filtered = 0u64;
        let mut covariates = with_calibration.then(CovariateTable::new);

        if plan.band == 0 {
            self.formatter
                .write_header(out)
                .map_err(|e| ReduceError::shard_io(path, e))?;
        }

        for input in &plan.inputs {
            let file = File::open(input).map_err(|e| ReduceError::shard_io(input, e))?;
            for (idx, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(|e| ReduceError::shard_io(input, e))?;
                poller.tick()?;
                if line.trim().is_empty() {
                    continue;
                }
                let hit = parse_hit_line(&line).map_err(|reason| ReduceError::MalformedShard {
                    path: input.clone(),
                    line: idx + 1,
                    reason,
                })?;
                match self.policy.apply(plan.band, &hit)? {
                    Some(record) => {
                        self.formatter
                            .write_record(out, &record)
                            .map_err(|e| ReduceError::shard_io(path, e))?;
                        written += 1;
                        if let (Some(table), Some(reads)) = (covariates.as_mut(), self.reads) {
                            table.add(Covariate::new(
                                hit.is_reverse,
                                hit.score,
                                reads.read_length(hit.read).unwrap_or(0),
                                reads.mean_quality(hit.read).unwrap_or(0),
                            ));
                        }
                    }
                    None => filtered += 1,
                }
            }
        }

        if plan.band == last_band {
            self.formatter
                .write_terminator(out)
                .map_err(|e| ReduceError::shard_io(path, e))?;
        }
        Ok((written, filtered, covariates))
    }

    fn post_process_band(
        &self,
        post: &dyn BandPostProcessor,
        plan: &BandPlan,
        work_dir: &Path,
        with_index: bool,
        temps: &TempFiles,
    ) -> Result<(usize, u64, Option<Vec<IndexEntry>>), ReduceError> {
        let part = plan.part_path(work_dir);
        let scratch = plan.post_path(work_dir);
        temps.register(scratch.clone());
        {
            let input = File::open(&part).map_err(|e| ReduceError::shard_io(&part, e))?;
            let output = File::create(&scratch).map_err(|e| ReduceError::shard_io(&scratch, e))?;
            let mut reader = BufReader::new(input);
            let mut writer = BufWriter::new(output);
            post.rewrite(plan.band, &mut reader, &mut writer)?;
            writer.flush().map_err(|e| ReduceError::shard_io(&scratch, e))?;
        }
        fs::rename(&scratch, &part).map_err(|e| ReduceError::shard_io(&part, e))?;
        let bytes = fs::metadata(&part)
            .map_err(|e| ReduceError::shard_io(&part, e))?
            .len();

        let index = if with_index {
            let file = File::open(&part).map_err(|e| ReduceError::shard_io(&part, e))?;
            let (entries, _) = IndexBuilder::new(&self.formatter, self.config.index_bin_width)
                .scan(BufReader::new(file))
                .map_err(ReduceError::IndexConsumer)?;
            Some(entries)
        } else {
            None
        };
        tracing::debug!(band = plan.band, bytes, "band post-processed");
        Ok((plan.band, bytes, index))
    }
}

/// Writer that hashes everything passing through.
struct DigestWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Byte-concatenate band files in band order. Removes `output` on failure.
fn concatenate(outputs: &[BandOutput], output: &Path) -> Result<(u64, blake3::Hash), ReduceError> {
    let result = (|| {
        let file = File::create(output).map_err(|e| ReduceError::shard_io(output, e))?;
        let mut writer = DigestWriter {
            inner: BufWriter::new(file),
            hasher: blake3::Hasher::new(),
        };
        let mut total = 0u64;
        for out in outputs {
            let mut band = File::open(&out.path).map_err(|e| ReduceError::shard_io(&out.path, e))?;
            let copied =
                io::copy(&mut band, &mut writer).map_err(|e| ReduceError::shard_io(&out.path, e))?;
            if copied != out.bytes {
                return Err(ReduceError::shard_io(
                    &out.path,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("band {} has {copied} bytes, expected {}", out.band, out.bytes),
                    ),
                ));
            }
            total += copied;
        }
        writer.flush().map_err(|e| ReduceError::shard_io(output, e))?;
        Ok((total, writer.hasher.finalize()))
    })();

    if result.is_err() {
        if let Err(e) = fs::remove_file(output) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %output.display(), error = %e, "failed to remove partial output");
            }
        }
    }
    result
}
