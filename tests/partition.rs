mod common;

use hitreduce::partition::{split_by_count, sweep_regions, GenomicRegion};
use proptest::prelude::*;

fn sorted_loci() -> impl Strategy<Value = Vec<(u32, i32)>> {
    prop::collection::vec((0u32..3, 0i32..400), 0..120).prop_map(|mut loci| {
        loci.sort_unstable();
        loci
    })
}

proptest! {
    #[test]
    fn sweep_cores_partition_the_buffer(
        loci in sorted_loci(),
        width in 1u32..150,
        padding in 0u32..40,
    ) {
        let buffer = common::buffer_of(&loci);
        let mut sorted = buffer.clone();
        sorted.sort();
        let regions = GenomicRegion::tile(&[400, 400, 400], width);
        let spans = sweep_regions(&sorted, &regions, padding).unwrap();
        prop_assert_eq!(spans.len(), regions.len());

        let mut next = 0;
        for span in &spans {
            prop_assert_eq!(span.core.start, next);
            prop_assert!(span.padded.start <= span.core.start);
            prop_assert!(span.padded.end >= span.core.end);
            next = span.core.end;

            let region = regions[span.region_index];
            for idx in span.core.clone() {
                let (template, position) = sorted.locus(idx);
                prop_assert!(region.contains(template, position));
            }
            for idx in 0..sorted.len() {
                let (template, position) = sorted.locus(idx);
                if region.contains_padded(template, position, padding) {
                    prop_assert!(span.padded.contains(&idx));
                }
            }
        }
        prop_assert_eq!(next, sorted.len());
    }

    #[test]
    fn worker_slices_are_contiguous_and_locus_aligned(
        loci in sorted_loci(),
        workers in 1usize..9,
        padding in 0u32..30,
    ) {
        let buffer = common::buffer_of(&loci);
        let slices = split_by_count(&buffer, workers, padding);
        prop_assert_eq!(slices.len(), workers);

        let mut next = 0;
        for slice in &slices {
            prop_assert_eq!(slice.owned.start, next);
            next = slice.owned.end;
            if slice.owned.start > 0 && slice.owned.start < buffer.len() {
                prop_assert_ne!(
                    buffer.locus(slice.owned.start),
                    buffer.locus(slice.owned.start - 1)
                );
            }
            prop_assert!(slice.padded.start <= slice.owned.start);
            prop_assert!(slice.padded.end >= slice.owned.end);
        }
        prop_assert_eq!(next, buffer.len());
    }
}

#[test]
fn empty_regions_sit_at_the_next_hit() {
    let buffer = common::buffer_of(&[(0, 5), (1, 3)]);
    let regions = [
        GenomicRegion::new(0, 0, 10),
        GenomicRegion::new(0, 10, 20),
        GenomicRegion::new(1, 0, 10),
        GenomicRegion::new(2, 0, 10),
    ];
    let spans = sweep_regions(&buffer, &regions, 0).unwrap();
    let cores: Vec<_> = spans.iter().map(|s| s.core.clone()).collect();
    assert_eq!(cores, vec![0..1, 1..1, 1..2, 2..2]);
}

#[test]
fn unsorted_buffer_is_rejected() {
    let buffer = common::buffer_of(&[(0, 9), (0, 1)]);
    assert!(sweep_regions(&buffer, &[GenomicRegion::new(0, 0, 10)], 0).is_err());
}
