mod common;

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use hitreduce::hits::Hit;
use hitreduce::merge::{
    AbortSignal, BandPostProcessor, FilterPolicy, MergeConfig, MergeJob, OutputRecord,
    PassThrough, RecordFormatter, ShardMergePipeline, TsvFormatter,
};
use hitreduce::sources::InMemoryReads;
use hitreduce::ReduceError;

/// Pass-through that makes early bands slow, so later bands finish first.
struct SlowEarlyBands {
    bands: usize,
}

impl FilterPolicy for SlowEarlyBands {
    fn apply(&self, band: usize, hit: &Hit) -> Result<Option<OutputRecord>, ReduceError> {
        let delay = (self.bands - band) as u64 * 3;
        thread::sleep(Duration::from_millis(delay));
        PassThrough.apply(band, hit)
    }
}

fn shard_hits(shard: usize) -> Vec<Hit> {
    (0..3)
        .map(|k| {
            let read = (shard * 3 + k) as u32;
            Hit::new(shard as u32 % 2, (shard * 100 + k * 10) as i32, read, k == 1, 5 + k as u16)
        })
        .collect()
}

fn write_shards(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|shard| common::write_shard(dir, &format!("region-{shard:05}.hits"), &shard_hits(shard)))
        .collect()
}

fn config(thread_cap: usize) -> MergeConfig {
    MergeConfig {
        thread_cap,
        abort_check_interval: 2,
        index_bin_width: 64,
    }
}

fn expected_output(shards: usize) -> Vec<u8> {
    let formatter = TsvFormatter::default();
    let mut out = Vec::new();
    formatter.write_header(&mut out).unwrap();
    for shard in 0..shards {
        for hit in shard_hits(shard) {
            formatter
                .write_record(&mut out, &OutputRecord::plain(hit))
                .unwrap();
        }
    }
    formatter.write_terminator(&mut out).unwrap();
    out
}

#[test]
fn output_is_band_ordered_whatever_finishes_first() {
    let dir = tempfile::tempdir().unwrap();
    let shards = write_shards(dir.path(), 6);
    let expected = expected_output(6);

    let mut digests = HashSet::new();
    for thread_cap in [1, 2, 3, 6] {
        let output = dir.path().join(format!("merged-{thread_cap}.tsv"));
        let work = dir.path().join(format!("work-{thread_cap}"));
        let job = MergeJob::new(shards.clone(), &output, &work);
        let bands = thread_cap.min(shards.len());
        let report = ShardMergePipeline::new(
            config(thread_cap),
            SlowEarlyBands { bands },
            TsvFormatter::default(),
        )
        .run(&job, &AbortSignal::new())
        .unwrap();

        assert_eq!(report.bands.len(), bands);
        assert_eq!(report.records_written, 18);
        assert_eq!(fs::read(&output).unwrap(), expected);
        assert_eq!(report.digest, common::file_digest(&output));
        assert_eq!(
            report.bands.iter().map(|b| b.bytes).sum::<u64>(),
            report.total_bytes
        );
        assert!(common::dir_is_empty(&work));
        digests.insert(report.digest);
    }
    assert_eq!(digests.len(), 1, "outputs diverged across thread caps");
}

#[test]
fn index_offsets_point_at_their_bins() {
    let dir = tempfile::tempdir().unwrap();
    let shards = write_shards(dir.path(), 5);
    let output = dir.path().join("merged.tsv");
    let index = dir.path().join("merged.idx");
    let calibration = dir.path().join("merged.cov");
    let job = MergeJob::new(shards, &output, dir.path().join("work"))
        .with_index(&index)
        .with_calibration(&calibration);
    let reads = InMemoryReads::uniform(15, 100, 30);

    let report = ShardMergePipeline::new(config(2), PassThrough, TsvFormatter::default())
        .with_reads(&reads)
        .run(&job, &AbortSignal::new())
        .unwrap();

    let merged = fs::read(&output).unwrap();
    let formatter = TsvFormatter::default();
    let index_text = fs::read_to_string(&index).unwrap();
    assert_eq!(index_text.lines().count(), report.index_entries);
    for line in index_text.lines() {
        let fields: Vec<u64> = line.split('\t').map(|f| f.parse().unwrap()).collect();
        let (template, bin, offset) = (fields[0] as u32, fields[1], fields[2] as usize);
        assert!(offset == 0 || merged[offset - 1] == b'\n');
        let end = merged[offset..].iter().position(|&b| b == b'\n').unwrap();
        let (t, position) = formatter
            .locate(&merged[offset..offset + end])
            .unwrap()
            .expect("index entry points at a record");
        assert_eq!((t, position as u64 / 64), (template, bin));
    }

    let covariates = fs::read_to_string(&calibration).unwrap();
    let counted: u64 = covariates
        .lines()
        .skip(1)
        .map(|line| line.rsplit('\t').next().unwrap().parse::<u64>().unwrap())
        .sum();
    assert_eq!(counted, report.records_written);
    assert_eq!(covariates.lines().count() - 1, report.calibration_rows);
}

/// Writes records the index consumer cannot parse.
struct GarbledRecords;

impl RecordFormatter for GarbledRecords {
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()> {
        TsvFormatter::default().write_header(out)
    }

    fn write_record(&self, out: &mut dyn Write, _record: &OutputRecord) -> io::Result<()> {
        writeln!(out, "not-a-record")
    }

    fn write_terminator(&self, out: &mut dyn Write) -> io::Result<()> {
        TsvFormatter::default().write_terminator(out)
    }

    fn locate(&self, line: &[u8]) -> Result<Option<(u32, i32)>, String> {
        TsvFormatter::default().locate(line)
    }
}

#[test]
fn index_consumer_failure_is_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let shards = write_shards(dir.path(), 2);
    let output = dir.path().join("merged.tsv");
    let work = dir.path().join("work");
    let job = MergeJob::new(shards, &output, &work).with_index(dir.path().join("merged.idx"));

    let err = ShardMergePipeline::new(config(2), PassThrough, GarbledRecords)
        .run(&job, &AbortSignal::new())
        .unwrap_err();
    assert!(matches!(err, ReduceError::IndexConsumer(_)), "{err:?}");
    assert!(!output.exists());
    assert!(common::dir_is_empty(&work));

    // Without an index nobody parses the records, so the same merge succeeds.
    let job = MergeJob::new(job.inputs.clone(), &output, &work);
    assert!(ShardMergePipeline::new(config(2), PassThrough, GarbledRecords)
        .run(&job, &AbortSignal::new())
        .is_ok());
}

#[test]
fn raised_abort_stops_the_merge() {
    let dir = tempfile::tempdir().unwrap();
    let shards = write_shards(dir.path(), 3);
    let output = dir.path().join("merged.tsv");
    let work = dir.path().join("work");
    let abort = AbortSignal::new();
    abort.raise();

    let err = ShardMergePipeline::new(config(3), PassThrough, TsvFormatter::default())
        .run(&MergeJob::new(shards, &output, &work), &abort)
        .unwrap_err();
    assert!(matches!(err, ReduceError::Aborted));
    assert!(!output.exists());
    assert!(common::dir_is_empty(&work));
}

#[test]
fn failing_band_fails_the_whole_job() {
    let dir = tempfile::tempdir().unwrap();
    let mut shards = write_shards(dir.path(), 3);
    shards.push(dir.path().join("missing.hits"));
    let output = dir.path().join("merged.tsv");
    let work = dir.path().join("work");

    let err = ShardMergePipeline::new(config(4), PassThrough, TsvFormatter::default())
        .run(&MergeJob::new(shards, &output, &work), &AbortSignal::new())
        .unwrap_err();
    assert!(
        matches!(err, ReduceError::ShardIo { .. } | ReduceError::Aborted),
        "{err:?}"
    );
    assert!(!output.exists());
    assert!(common::dir_is_empty(&work));
}

#[test]
fn malformed_shard_line_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let shard = dir.path().join("bad.hits");
    fs::write(&shard, "0\t0\t5\t+\t1\n\n1\t0\tseven\t+\t1\n").unwrap();

    let err = ShardMergePipeline::new(config(1), PassThrough, TsvFormatter::default())
        .run(
            &MergeJob::new(vec![shard], dir.path().join("out.tsv"), dir.path().join("work")),
            &AbortSignal::new(),
        )
        .unwrap_err();
    match err {
        ReduceError::MalformedShard { line, reason, .. } => {
            assert_eq!(line, 3);
            assert!(reason.starts_with("position"));
        }
        other => panic!("expected malformed shard, got {other:?}"),
    }
}

/// Appends a note line to every band after filtering.
struct NoteAppender;

impl BandPostProcessor for NoteAppender {
    fn needs_rewrite(&self, band: usize) -> bool {
        band == 0
    }

    fn rewrite(
        &self,
        band: usize,
        input: &mut dyn BufRead,
        output: &mut dyn Write,
    ) -> Result<(), ReduceError> {
        io::copy(input, output)?;
        writeln!(output, "#note\tband {band} rewritten")?;
        Ok(())
    }
}

#[test]
fn post_processing_rewrites_bands_before_concatenation() {
    let dir = tempfile::tempdir().unwrap();
    let shards = write_shards(dir.path(), 4);
    let output = dir.path().join("merged.tsv");
    let index = dir.path().join("merged.idx");
    let job = MergeJob::new(shards, &output, dir.path().join("work")).with_index(&index);

    let post = NoteAppender;
    let report = ShardMergePipeline::new(config(2), PassThrough, TsvFormatter::default())
        .with_post_processor(&post)
        .run(&job, &AbortSignal::new())
        .unwrap();

    let text = fs::read_to_string(&output).unwrap();
    let note = text.find("#note\tband 0 rewritten\n").expect("note present");
    // The note ends band 0, so band 1's first record follows it.
    assert_eq!(note + "#note\tband 0 rewritten\n".len(), report.bands[0].bytes as usize);
    assert_eq!(text.len() as u64, report.total_bytes);
    assert!(!text.contains("band 1 rewritten"));

    let formatter = TsvFormatter::default();
    for line in fs::read_to_string(&index).unwrap().lines() {
        let offset: usize = line.rsplit('\t').next().unwrap().parse().unwrap();
        let end = text[offset..].find('\n').unwrap();
        assert!(formatter
            .locate(text[offset..offset + end].as_bytes())
            .unwrap()
            .is_some());
    }
}
