//! Raw candidate hits and the columnar buffer that accumulates them.
//!
//! A [`Hit`] is what the upstream search produces. Once a hit enters a
//! [`HitBuffer`] its score is dropped: buffers only carry the locus, the
//! encoded read key and a packed strand bit. Scores live in the ranked
//! stores (packed next to the locus, see [`PackedEntry`]).

mod buffer;
mod packing;

pub use buffer::{HitBuffer, HitBufferIter};
pub use packing::{
    LocusCodec, PackedEntry, ScoreField, DEDUP_KEY_BITS, LOCUS_BITS, SCORE_BITS, STRAND_BITS,
};

/// Candidate alignment produced by the upstream search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Template (reference sequence) id.
    pub template: u32,
    /// 0-based leftmost position on the template (may be negative after clipping).
    pub position: i32,
    /// Encoded read key (read index × arms + arm).
    pub read: u32,
    /// Whether the read aligns to the reverse strand.
    pub is_reverse: bool,
    /// Alignment score, lower is better.
    pub score: u16,
}

impl Hit {
    /// Construct a new hit.
    pub fn new(template: u32, position: i32, read: u32, is_reverse: bool, score: u16) -> Self {
        Self {
            template,
            position,
            read,
            is_reverse,
            score,
        }
    }

    /// Drop the score, keeping the buffered columns.
    pub fn unscored(&self) -> BufferedHit {
        BufferedHit {
            template: self.template,
            position: self.position,
            read: self.read,
            is_reverse: self.is_reverse,
        }
    }
}

/// One row of a [`HitBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferedHit {
    /// Template id.
    pub template: u32,
    /// 0-based position.
    pub position: i32,
    /// Encoded read key.
    pub read: u32,
    /// Reverse-strand flag.
    pub is_reverse: bool,
}

impl BufferedHit {
    /// Attach a score.
    pub fn with_score(&self, score: u16) -> Hit {
        Hit::new(self.template, self.position, self.read, self.is_reverse, score)
    }

    /// Sort key used by [`HitBuffer::sort`].
    pub fn sort_key(&self) -> (u32, i32, u32, bool) {
        (self.template, self.position, self.read, self.is_reverse)
    }

    /// Genomic locus `(template, position)`.
    pub fn locus(&self) -> (u32, i32) {
        (self.template, self.position)
    }
}
