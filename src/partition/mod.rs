//! Genomic-coordinate work partitioning over a sorted [`HitBuffer`].
//!
//! Two strategies:
//!
//! - [`sweep_regions`]: one linear merge pass assigning each genomic region a
//!   disjoint *core* index interval plus a *padded* interval that may reach
//!   into neighbouring regions.
//! - [`split_by_count`]: equal item-count slices for worker threads, with
//!   boundaries nudged so a locus never straddles two workers, and padded
//!   context ranges grown outward.
//!
//! Padding is supplied by the caller (a function of read length, indel run
//! and fragment length); this module never computes it.
//!
//! [`HitBuffer`]: crate::hits::HitBuffer

mod split;
mod sweep;

pub use split::split_by_count;
pub use sweep::sweep_regions;

use std::ops::Range;

/// Half-open genomic interval `[start, end)` on one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomicRegion {
    /// Template id.
    pub template: u32,
    /// First position (inclusive).
    pub start: i32,
    /// Last position (exclusive).
    pub end: i32,
}

impl GenomicRegion {
    /// Construct a region.
    pub fn new(template: u32, start: i32, end: i32) -> Self {
        Self {
            template,
            start,
            end,
        }
    }

    /// Region length in bases.
    pub fn len(&self) -> u64 {
        (self.end as i64 - self.start as i64).max(0) as u64
    }

    /// Whether the region covers no bases.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Whether `(template, position)` lies in the region.
    pub fn contains(&self, template: u32, position: i32) -> bool {
        template == self.template && position >= self.start && position < self.end
    }

    /// Whether `(template, position)` lies in the region grown by `padding` on both sides.
    pub fn contains_padded(&self, template: u32, position: i32, padding: u32) -> bool {
        let position = position as i64;
        template == self.template
            && position >= self.start as i64 - padding as i64
            && position < self.end as i64 + padding as i64
    }

    /// Split `[0, template_len)` of each template into regions of at most `width` bases.
    pub fn tile(template_lengths: &[u32], width: u32) -> Vec<GenomicRegion> {
        let width = width.max(1) as i64;
        let mut regions = Vec::new();
        for (template, &len) in template_lengths.iter().enumerate() {
            let mut start = 0i64;
            while start < len as i64 {
                let end = (start + width).min(len as i64);
                regions.push(GenomicRegion::new(template as u32, start as i32, end as i32));
                start = end;
            }
        }
        regions
    }
}

/// Index intervals assigned to one region by [`sweep_regions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSpan {
    /// Position of the region in the input slice.
    pub region_index: usize,
    /// Hits inside the unpadded region. Disjoint across regions.
    pub core: Range<usize>,
    /// Hits inside the padded admission range. Contains `core`.
    pub padded: Range<usize>,
}

impl RegionSpan {
    /// Hits owned by this region.
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether no hit falls in the unpadded region.
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }
}

/// Index ranges assigned to one worker by [`split_by_count`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSlice {
    /// Worker number.
    pub worker: usize,
    /// Hits this worker emits. Disjoint and contiguous across workers.
    pub owned: Range<usize>,
    /// `owned` grown outward over neighbours within the padding distance.
    pub padded: Range<usize>,
}

fn locus_key(template: u32, position: i64) -> (u32, i64) {
    (template, position)
}
