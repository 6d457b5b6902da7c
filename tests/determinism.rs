mod common;

use std::collections::HashSet;

use hitreduce::hits::{Hit, HitBuffer, LocusCodec};
use hitreduce::sources::{InMemoryReads, RecordedScores};
use hitreduce::{AbortSignal, GenomicRegion, HitReducer, ReduceJob, ReductionConfig};

const TEMPLATES: [u32; 2] = [20_000, 20_000];
const READS: u32 = 200;

/// Six hits per read, distinct scores within each read so ranking has no ties.
fn workload() -> Vec<Hit> {
    let mut hits = Vec::new();
    for read in 0..READS {
        for k in 0..6u32 {
            hits.push(Hit::new(
                (read + k) % 2,
                ((read * 37 + k * 311) % 20_000) as i32,
                read,
                (read + k) % 3 == 0,
                ((k * 5 + read) % 6) as u16,
            ));
        }
    }
    hits
}

#[test]
fn reduction_output_is_identical_across_thread_caps() {
    let hits = workload();
    let scorer = RecordedScores::from_hits(&hits);
    let reads = InMemoryReads::uniform(READS as usize, 100, 30);
    let regions = GenomicRegion::tile(&TEMPLATES, 5_000);
    let codec = LocusCodec::new(2, 20_000, 0).unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut outputs = HashSet::new();
    let mut indexes = HashSet::new();
    for (run, thread_cap) in [1, 2, 4, 7, 4].into_iter().enumerate() {
        let output = dir.path().join(format!("run-{run}.tsv"));
        let job = ReduceJob::new(&output, dir.path().join(format!("work-{run}")));
        let config = ReductionConfig::new(3)
            .with_thread_cap(thread_cap)
            .with_index(true)
            .with_index_bin_width(1_024);
        let raw: HitBuffer = hits.iter().map(Hit::unscored).collect();
        let report = HitReducer::new(config, codec, READS as usize, 1)
            .unwrap()
            .with_template_lengths(TEMPLATES.to_vec())
            .run(raw, &regions, &scorer, &reads, &job, &AbortSignal::new())
            .unwrap();

        assert_eq!(report.kept_hits, READS as usize * 3);
        outputs.insert(report.merge.digest);
        indexes.insert(common::file_digest(&job.index_path()));
    }

    assert_eq!(outputs.len(), 1, "outputs diverged across thread caps");
    assert_eq!(indexes.len(), 1, "indexes diverged across thread caps");
}
