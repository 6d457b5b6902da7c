//! Region sweep: O(hits + regions) assignment of index intervals.

use super::{locus_key, GenomicRegion, RegionSpan};
use crate::hits::HitBuffer;
use crate::ReduceError;

/// Assign each region its core and padded index intervals.
///
/// `buffer` must be sorted; `regions` must be ascending and non-overlapping.
/// Hits outside every region end up in no core interval. A region with no
/// hits gets an empty core interval placed at the first hit past it (or at
/// the buffer end).
pub fn sweep_regions(
    buffer: &HitBuffer,
    regions: &[GenomicRegion],
    padding: u32,
) -> Result<Vec<RegionSpan>, ReduceError> {
    if !buffer.is_sorted() {
        return Err(ReduceError::InvalidConfiguration(
            "region sweep requires a sorted hit buffer".to_string(),
        ));
    }
    validate_regions(regions)?;

    let templates = buffer.templates();
    let positions = buffer.positions();
    let n = buffer.len();
    let key = |idx: usize| locus_key(templates[idx], positions[idx] as i64);
    let pad = padding as i64;

    let mut spans = Vec::with_capacity(regions.len());
    let (mut core, mut lo, mut hi) = (0usize, 0usize, 0usize);

    for (region_index, region) in regions.iter().enumerate() {
        let start = locus_key(region.template, region.start as i64);
        let end = locus_key(region.template, region.end as i64);
        let padded_start = locus_key(region.template, region.start as i64 - pad);
        let padded_end = locus_key(region.template, region.end as i64 + pad);

        while core < n && key(core) < start {
            core += 1;
        }
        let core_start = core;
        while core < n && key(core) < end {
            core += 1;
        }

        while lo < n && key(lo) < padded_start {
            lo += 1;
        }
        hi = hi.max(lo);
        while hi < n && key(hi) < padded_end {
            hi += 1;
        }

        spans.push(RegionSpan {
            region_index,
            core: core_start..core,
            padded: lo.min(core_start)..hi.max(core),
        });
    }

    tracing::debug!(
        regions = regions.len(),
        hits = n,
        assigned = spans.iter().map(RegionSpan::len).sum::<usize>(),
        "region sweep complete"
    );
    Ok(spans)
}

fn validate_regions(regions: &[GenomicRegion]) -> Result<(), ReduceError> {
    for region in regions {
        if region.start > region.end {
            return Err(ReduceError::InvalidConfiguration(format!(
                "region {}:{}-{} has start after end",
                region.template, region.start, region.end
            )));
        }
    }
    for pair in regions.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if (prev.template, prev.end) > (next.template, next.start) {
            return Err(ReduceError::InvalidConfiguration(format!(
                "regions {}:{}-{} and {}:{}-{} overlap or are out of order",
                prev.template, prev.start, prev.end, next.template, next.start, next.end
            )));
        }
    }
    Ok(())
}
