mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use hitreduce::hits::{Hit, HitBuffer};
use hitreduce::outcome::{OutcomeFlags, ReadOutcomeTracker};
use hitreduce::ranking::{
    ConcurrentRankedHitStore, PositionDedupStore, RankedHitStore, ScoreRankedStore,
};

const READS: u32 = 12;
const THREADS: usize = 8;

/// Every read gets hits with distinct scores, so the final state does not
/// depend on which thread recorded first.
fn workload() -> Vec<Hit> {
    let mut hits = Vec::new();
    for read in 0..READS {
        for k in 0..40u32 {
            let score = ((k * 7 + read) % 40) as u16;
            hits.push(Hit::new(read % 4, (k * 13) as i32, read, k % 2 == 0, score));
        }
    }
    hits
}

fn drained_sorted<S: RankedHitStore>(mut store: ConcurrentRankedHitStore<S>) -> Vec<(u32, u32, i32)> {
    let mut buffer = HitBuffer::default();
    store.drain_into(&mut buffer);
    buffer.sort();
    buffer
        .iter()
        .map(|h| (h.read, h.template, h.position))
        .collect()
}

#[test]
fn striped_score_store_matches_sequential_replay() {
    let hits = workload();
    let codec = common::codec();

    let mut sequential = ScoreRankedStore::new(READS as usize, 3, codec).unwrap();
    for hit in &hits {
        sequential.record(hit.read as usize, hit).unwrap();
    }

    // Three stripes for twelve reads: plenty of same-stripe contention.
    let striped = ConcurrentRankedHitStore::score_ranked(READS as usize, 3, codec, 3).unwrap();
    thread::scope(|scope| {
        for worker in 0..THREADS {
            let striped = &striped;
            let hits = &hits;
            scope.spawn(move || {
                for hit in hits.iter().skip(worker).step_by(THREADS) {
                    striped.record(hit).unwrap();
                }
            });
        }
    });

    for read in 0..READS {
        assert_eq!(striped.summary(read), sequential.summary(read as usize));
        assert_eq!(striped.kept(read), sequential.kept(read as usize));
    }

    let mut expected = HitBuffer::default();
    sequential.drain_into(&mut expected);
    expected.sort();
    let expected: Vec<_> = expected
        .iter()
        .map(|h| (h.read, h.template, h.position))
        .collect();
    assert_eq!(drained_sorted(striped), expected);
}

#[test]
fn striped_dedup_store_matches_sequential_replay() {
    let hits: Vec<Hit> = workload()
        .into_iter()
        .map(|h| {
            // Three to six distinct loci per read: some reads overflow N = 4.
            let position = h.position % (3 + (h.read % 4) as i32);
            Hit::new(h.template, position, h.read, false, 0)
        })
        .collect();
    let codec = common::codec();

    let mut sequential = PositionDedupStore::new(READS as usize, 4, codec).unwrap();
    for hit in &hits {
        sequential.record(hit.read as usize, hit).unwrap();
    }

    let striped = ConcurrentRankedHitStore::position_dedup(READS as usize, 4, codec, 5).unwrap();
    thread::scope(|scope| {
        for worker in 0..THREADS {
            let striped = &striped;
            let hits = &hits;
            scope.spawn(move || {
                for hit in hits.iter().rev().skip(worker).step_by(THREADS) {
                    striped.record(hit).unwrap();
                }
            });
        }
    });

    let mut expected = HitBuffer::default();
    sequential.drain_into(&mut expected);
    expected.sort();
    let expected: Vec<_> = expected
        .iter()
        .map(|h| (h.read, h.template, h.position))
        .collect();
    // Reads with three or four loci survive, the rest froze.
    assert_eq!(expected.len(), 3 * 3 + 3 * 4);
    assert_eq!(drained_sorted(striped), expected);
}

#[test]
fn outcome_bits_are_never_observed_cleared() {
    let tracker = ReadOutcomeTracker::new(64, 2).unwrap();
    let flags = [
        OutcomeFlags::HAS_HITS,
        OutcomeFlags::BLOCKED,
        OutcomeFlags::MATED,
        OutcomeFlags::WRITTEN_MATED,
        OutcomeFlags::WRITTEN_UNMATED,
    ];
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let tracker = &tracker;
        let done = &done;
        let observer = scope.spawn(move || {
            let mut seen = vec![0u16; tracker.len()];
            let mut violations = 0;
            while !done.load(Ordering::Acquire) {
                for (key, previous) in seen.iter_mut().enumerate() {
                    let now = tracker.status(key as u32).bits();
                    if *previous & !now != 0 {
                        violations += 1;
                    }
                    *previous = now;
                }
            }
            violations
        });

        let writers: Vec<_> = (0..THREADS)
            .map(|worker| {
                scope.spawn(move || {
                    for round in 0..2_000usize {
                        let key = ((round * 31 + worker * 7) % tracker.len()) as u32;
                        let flag = flags[(round + worker) % flags.len()];
                        tracker.add_status(key, flag).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        assert_eq!(observer.join().unwrap(), 0);
    });

    let table = tracker.finalize();
    for key in 0..128u32 {
        let flags = table.flags(key);
        assert_eq!(
            flags.contains(OutcomeFlags::UNMAPPED),
            !flags.is_written(),
            "key {key}: {flags:?}"
        );
    }
}
