//! Fixed-width fields packed into one `u64` per ranked entry.
//!
//! Layout of a [`PackedEntry`], most significant bits first:
//!
//! ```text
//! | score (12) | locus = template ‖ biased position (51) | strand (1) |
//! ```
//!
//! The low 52 bits (locus + strand) form the deduplication key, so sorting
//! by that key orders entries by template, then position, then strand.

use crate::ReduceError;

/// Bits reserved for the score.
pub const SCORE_BITS: u32 = 12;
/// Bits reserved for the template/position composite.
pub const LOCUS_BITS: u32 = 51;
/// Bits reserved for the strand flag.
pub const STRAND_BITS: u32 = 1;
/// Bits of the locus + strand deduplication key.
pub const DEDUP_KEY_BITS: u32 = LOCUS_BITS + STRAND_BITS;

const _: () = assert!(SCORE_BITS + LOCUS_BITS + STRAND_BITS == u64::BITS);
const _: () = assert!(SCORE_BITS <= u16::BITS);

const LOCUS_SHIFT: u32 = STRAND_BITS;
const SCORE_SHIFT: u32 = STRAND_BITS + LOCUS_BITS;
const LOCUS_MASK: u64 = (1u64 << LOCUS_BITS) - 1;
const DEDUP_MASK: u64 = (1u64 << DEDUP_KEY_BITS) - 1;

/// Score clamped into [`SCORE_BITS`] bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScoreField(u16);

impl ScoreField {
    /// Largest representable score.
    pub const MAX: u16 = ((1u32 << SCORE_BITS) - 1) as u16;
    /// Best possible score.
    pub const ZERO: Self = Self(0);

    /// Exact conversion, `None` when the score does not fit.
    pub fn new(score: u16) -> Option<Self> {
        (score <= Self::MAX).then_some(Self(score))
    }

    /// Saturating conversion. The flag reports whether clamping happened.
    pub fn clamp(score: u16) -> (Self, bool) {
        if score > Self::MAX {
            (Self(Self::MAX), true)
        } else {
            (Self(score), false)
        }
    }

    /// Raw score value.
    pub fn get(self) -> u16 {
        self.0
    }
}

/// Packs `(template, position)` into [`LOCUS_BITS`] bits.
///
/// Positions are biased by `margin` so clipped hits starting up to `margin`
/// bases before the template (or ending after it) still encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocusCodec {
    num_templates: u32,
    position_span: u64,
    position_bits: u32,
    template_bits: u32,
    margin: u32,
}

fn bits_for(count: u64) -> u32 {
    if count <= 1 {
        1
    } else {
        u64::BITS - (count - 1).leading_zeros()
    }
}

impl LocusCodec {
    /// Build a codec for `num_templates` templates of at most `max_template_len` bases.
    ///
    /// Fails with [`ReduceError::CapacityExceeded`] when the template and
    /// position widths together exceed [`LOCUS_BITS`].
    pub fn new(num_templates: u32, max_template_len: u32, margin: u32) -> Result<Self, ReduceError> {
        if num_templates == 0 {
            return Err(ReduceError::InvalidConfiguration(
                "codec needs at least one template".to_string(),
            ));
        }
        let position_span = max_template_len as u64 + 2 * margin as u64;
        let position_bits = bits_for(position_span);
        let template_bits = bits_for(num_templates as u64);
        if position_bits + template_bits > LOCUS_BITS {
            return Err(ReduceError::CapacityExceeded {
                what: "locus bits (template + position)",
                requested: (position_bits + template_bits) as u64,
                limit: LOCUS_BITS as u64,
            });
        }
        Ok(Self {
            num_templates,
            position_span,
            position_bits,
            template_bits,
            margin,
        })
    }

    /// Number of templates this codec accepts.
    pub fn num_templates(&self) -> u32 {
        self.num_templates
    }

    /// Bits used by the position part.
    pub fn position_bits(&self) -> u32 {
        self.position_bits
    }

    /// Bits used by the template part.
    pub fn template_bits(&self) -> u32 {
        self.template_bits
    }

    /// Encode a locus.
    pub fn encode(&self, template: u32, position: i32) -> Result<u64, ReduceError> {
        let biased = position as i64 + self.margin as i64;
        if template >= self.num_templates || biased < 0 || biased as u64 >= self.position_span {
            return Err(ReduceError::PositionOutOfRange { template, position });
        }
        Ok(((template as u64) << self.position_bits) | biased as u64)
    }

    /// Decode a locus produced by [`LocusCodec::encode`].
    pub fn decode(&self, locus: u64) -> (u32, i32) {
        let template = (locus >> self.position_bits) as u32;
        let biased = locus & ((1u64 << self.position_bits) - 1);
        (template, (biased as i64 - self.margin as i64) as i32)
    }
}

/// One ranked entry: score, locus and strand in a single word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedEntry(u64);

impl PackedEntry {
    /// Pack the fields. `locus` must come from a [`LocusCodec`].
    pub fn new(score: ScoreField, locus: u64, is_reverse: bool) -> Self {
        debug_assert!(locus <= LOCUS_MASK);
        Self(
            ((score.get() as u64) << SCORE_SHIFT)
                | ((locus & LOCUS_MASK) << LOCUS_SHIFT)
                | is_reverse as u64,
        )
    }

    /// Rebuild from a raw word.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw packed word.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Score field.
    pub fn score(self) -> u16 {
        (self.0 >> SCORE_SHIFT) as u16
    }

    /// Locus composite.
    pub fn locus(self) -> u64 {
        (self.0 >> LOCUS_SHIFT) & LOCUS_MASK
    }

    /// Strand flag.
    pub fn is_reverse(self) -> bool {
        self.0 & 1 == 1
    }

    /// Locus + strand, the identity used for duplicate suppression.
    pub fn dedup_key(self) -> u64 {
        self.0 & DEDUP_MASK
    }
}
