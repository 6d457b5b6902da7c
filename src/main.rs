use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hitreduce::merge::{MergeJob, PassThrough, ShardMergePipeline, TsvFormatter};
use hitreduce::sources::{read_hit_table, InMemoryReads, RecordedScores};
use hitreduce::{
    AbortSignal, GenomicRegion, HitBuffer, HitReducer, LocusCodec, RankingPolicy, ReduceJob,
    ReductionConfig, DEFAULT_THREAD_CAP,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "hitreduce",
    about = "Rank raw alignment hits per read and merge region shards into one output"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    /// Keep the N best-scoring hits per read.
    Score,
    /// Keep N distinct loci per read, drop reads that overflow.
    Dedup,
}

impl From<PolicyArg> for RankingPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Score => RankingPolicy::Score,
            PolicyArg::Dedup => RankingPolicy::PositionDedup,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rank raw hits, shard them by region and merge the result.
    Reduce {
        /// Raw hits (`read\ttemplate\tposition\tstrand\tscore` per line).
        hits: PathBuf,
        /// Template lengths, one per line; line order gives the template id.
        #[arg(long)]
        templates: PathBuf,
        /// Final output file.
        #[arg(long, short)]
        output: PathBuf,
        /// Regions (`template\tstart\tend` per line). Defaults to tiling every template.
        #[arg(long)]
        regions: Option<PathBuf>,
        /// Tile width used when no region file is given.
        #[arg(long, default_value_t = 1_000_000)]
        region_width: u32,
        /// Results kept per read.
        #[arg(long, short = 'n', default_value_t = 1)]
        results_per_read: usize,
        /// Retention policy.
        #[arg(long, value_enum, default_value_t = PolicyArg::Score)]
        policy: PolicyArg,
        /// Arms per read (1 = single-end, 2 = paired-end).
        #[arg(long, default_value_t = 1)]
        arms: usize,
        /// Reads with more equally-best hits than this are withheld.
        #[arg(long, default_value_t = u32::MAX)]
        max_ambiguity: u32,
        /// Best hits scoring above this are filtered.
        #[arg(long)]
        max_score: Option<u16>,
        /// Worker and merge thread ceiling.
        #[arg(long, default_value_t = DEFAULT_THREAD_CAP)]
        threads: usize,
        /// Region padding in bases.
        #[arg(long, default_value_t = 0)]
        padding: u32,
        /// Write `<output>.idx`.
        #[arg(long)]
        index: bool,
        /// Write `<output>.cov`.
        #[arg(long)]
        calibration: bool,
        /// Read length reported to the covariate table.
        #[arg(long, default_value_t = 100)]
        read_length: u32,
        /// Mean read quality reported to the covariate table.
        #[arg(long, default_value_t = 30)]
        read_quality: u8,
        /// Write one outcome line per read here.
        #[arg(long)]
        outcomes: Option<PathBuf>,
        /// Scratch directory (default: `<output>.work`).
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Concatenate existing shard files in order, unfiltered.
    Merge {
        /// Shard files in output order.
        #[arg(required = true)]
        shards: Vec<PathBuf>,
        /// Final output file.
        #[arg(long, short)]
        output: PathBuf,
        /// Merged index output.
        #[arg(long)]
        index: Option<PathBuf>,
        /// Merge thread ceiling.
        #[arg(long, default_value_t = DEFAULT_THREAD_CAP)]
        threads: usize,
        /// Scratch directory (default: `<output>.work`).
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reduce {
            hits,
            templates,
            output,
            regions,
            region_width,
            results_per_read,
            policy,
            arms,
            max_ambiguity,
            max_score,
            threads,
            padding,
            index,
            calibration,
            read_length,
            read_quality,
            outcomes,
            work_dir,
        } => {
            let config = ReductionConfig::new(results_per_read)
                .with_policy(policy.into())
                .with_max_ambiguity(max_ambiguity)
                .with_max_score(max_score)
                .with_thread_cap(threads)
                .with_region_padding(padding)
                .with_index(index)
                .with_calibration(calibration);
            let work_dir = work_dir.unwrap_or_else(|| default_work_dir(&output));
            let mut job = ReduceJob::new(output, work_dir);
            if let Some(path) = outcomes {
                job = job.with_outcome_codes(path);
            }
            run_reduce(
                &hits,
                &templates,
                regions.as_deref(),
                region_width,
                arms,
                (read_length, read_quality),
                config,
                &job,
            )?
        }
        Commands::Merge {
            shards,
            output,
            index,
            threads,
            work_dir,
        } => run_merge(shards, output, index, threads, work_dir)?,
    }

    Ok(())
}

fn default_work_dir(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".work");
    PathBuf::from(name)
}

#[allow(clippy::too_many_arguments)]
fn run_reduce(
    hits_path: &Path,
    templates_path: &Path,
    regions_path: Option<&Path>,
    region_width: u32,
    arms: usize,
    (read_length, read_quality): (u32, u8),
    config: ReductionConfig,
    job: &ReduceJob,
) -> Result<()> {
    let template_lengths = read_template_lengths(templates_path)?;
    let max_len = template_lengths.iter().copied().max().unwrap_or(0);
    let codec = LocusCodec::new(template_lengths.len() as u32, max_len, config.region_padding)
        .context("template space does not fit the packed locus")?;

    let hits = read_hit_table(hits_path)
        .with_context(|| format!("failed to read hits from {}", hits_path.display()))?;
    let arms = arms.max(1);
    let read_keys = hits.iter().map(|h| h.read as usize + 1).max().unwrap_or(0);
    let num_reads = read_keys.div_ceil(arms);

    let regions = match regions_path {
        Some(path) => read_regions(path)?,
        None => GenomicRegion::tile(&template_lengths, region_width),
    };

    let scorer = RecordedScores::from_hits(&hits);
    let raw: HitBuffer = hits.iter().map(|hit| hit.unscored()).collect();
    let reads = InMemoryReads::uniform(num_reads * arms, read_length, read_quality);

    let reducer = HitReducer::new(config, codec, num_reads, arms)
        .context("invalid reduction configuration")?
        .with_template_lengths(template_lengths);
    let report = reducer
        .run(raw, &regions, &scorer, &reads, job, &AbortSignal::new())
        .context("reduction failed")?;

    println!(
        "raw_hits={}\tkept_hits={}\tregions={}\tbytes={}\trecords={}\tfiltered={}\tdigest={}",
        report.raw_hits,
        report.kept_hits,
        report.regions,
        report.merge.total_bytes,
        report.merge.records_written,
        report.merge.records_filtered,
        report.merge.digest.to_hex()
    );
    print!("{}", report.statistics);
    println!("{}", report.memory.report());
    Ok(())
}

fn run_merge(
    shards: Vec<PathBuf>,
    output: PathBuf,
    index: Option<PathBuf>,
    threads: usize,
    work_dir: Option<PathBuf>,
) -> Result<()> {
    let config = ReductionConfig::new(1).with_thread_cap(threads);
    config.validate().context("invalid merge configuration")?;
    let work_dir = work_dir.unwrap_or_else(|| default_work_dir(&output));
    let mut job = MergeJob::new(shards, output, &work_dir);
    if let Some(path) = index {
        job = job.with_index(path);
    }

    let report = ShardMergePipeline::new(config.merge_config(), PassThrough, TsvFormatter::default())
        .run(&job, &AbortSignal::new())
        .context("merge failed")?;

    for band in &report.bands {
        println!(
            "band {}\tinputs={}\tbytes={}\trecords={}",
            band.band, band.inputs, band.bytes, band.records_written
        );
    }
    println!(
        "total_bytes={}\tdigest={}",
        report.total_bytes,
        report.digest.to_hex()
    );
    Ok(())
}

fn read_template_lengths(path: &Path) -> Result<Vec<u32>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read templates from {}", path.display()))?;
    let mut lengths = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let len: u32 = line
            .parse()
            .with_context(|| format!("invalid template length '{}' on line {}", line, line_no + 1))?;
        lengths.push(len);
    }
    if lengths.is_empty() {
        bail!("no templates listed in {}", path.display());
    }
    Ok(lengths)
}

fn read_regions(path: &Path) -> Result<Vec<GenomicRegion>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read regions from {}", path.display()))?;
    let mut regions = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            bail!("expected 'template start end' on line {}", line_no + 1);
        }
        let parse = |field: &str| -> Result<i64> {
            field
                .parse()
                .with_context(|| format!("invalid number '{}' on line {}", field, line_no + 1))
        };
        regions.push(GenomicRegion::new(
            parse(fields[0])? as u32,
            parse(fields[1])? as i32,
            parse(fields[2])? as i32,
        ));
    }
    Ok(regions)
}
