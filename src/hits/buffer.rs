//! Columnar, growable array of raw hits.

use bitvec::prelude::*;
use rayon::prelude::*;

use super::BufferedHit;

/// Growable columnar hit array.
///
/// Columns are template id, position, encoded read key and a packed strand
/// bit. Appends grow by amortized doubling. After [`HitBuffer::sort`] rows
/// are ordered by `(template, position, read)`; [`HitBuffer::release`] frees
/// the backing storage so the next phase starts from a clean peak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HitBuffer {
    templates: Vec<u32>,
    positions: Vec<i32>,
    reads: Vec<u32>,
    strands: BitVec<u64, Lsb0>,
    sorted: bool,
}

impl HitBuffer {
    /// Empty buffer with room for `capacity` hits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            templates: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            reads: Vec::with_capacity(capacity),
            strands: BitVec::with_capacity(capacity),
            sorted: true,
        }
    }

    /// Number of hits.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns `true` when no hits are stored.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Whether the buffer is known to be in sort order.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Append one hit.
    pub fn push(&mut self, hit: BufferedHit) {
        if self.sorted {
            if let Some(last) = self.last() {
                self.sorted = last.sort_key() <= hit.sort_key();
            }
        }
        self.templates.push(hit.template);
        self.positions.push(hit.position);
        self.reads.push(hit.read);
        self.strands.push(hit.is_reverse);
    }

    /// Bulk append another buffer's rows.
    pub fn append(&mut self, other: &HitBuffer) {
        if other.is_empty() {
            return;
        }
        if self.sorted {
            self.sorted = other.sorted
                && match (self.last(), other.get(0)) {
                    (Some(last), Some(first)) => last.sort_key() <= first.sort_key(),
                    _ => true,
                };
        }
        self.templates.extend_from_slice(&other.templates);
        self.positions.extend_from_slice(&other.positions);
        self.reads.extend_from_slice(&other.reads);
        self.strands.extend_from_bitslice(other.strands.as_bitslice());
    }

    /// Row at `idx`.
    pub fn get(&self, idx: usize) -> Option<BufferedHit> {
        if idx >= self.len() {
            return None;
        }
        Some(BufferedHit {
            template: self.templates[idx],
            position: self.positions[idx],
            read: self.reads[idx],
            is_reverse: self.strands[idx],
        })
    }

    fn last(&self) -> Option<BufferedHit> {
        self.len().checked_sub(1).and_then(|idx| self.get(idx))
    }

    /// `(template, position)` at `idx`. Panics when out of bounds.
    pub fn locus(&self, idx: usize) -> (u32, i32) {
        (self.templates[idx], self.positions[idx])
    }

    /// Template column.
    pub fn templates(&self) -> &[u32] {
        &self.templates
    }

    /// Position column.
    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    /// Read key column.
    pub fn reads(&self) -> &[u32] {
        &self.reads
    }

    /// Iterate over all rows.
    pub fn iter(&self) -> HitBufferIter<'_> {
        HitBufferIter {
            buffer: self,
            next: 0,
            end: self.len(),
        }
    }

    /// Iterate over rows in `range`.
    pub fn iter_range(&self, range: std::ops::Range<usize>) -> HitBufferIter<'_> {
        let end = range.end.min(self.len());
        HitBufferIter {
            buffer: self,
            next: range.start.min(end),
            end,
        }
    }

    /// Sort rows by `(template, position, read)`; strand breaks remaining ties.
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let mut order: Vec<u32> = (0..self.len() as u32).collect();
        order.par_sort_unstable_by_key(|&idx| {
            let idx = idx as usize;
            (
                self.templates[idx],
                self.positions[idx],
                self.reads[idx],
                self.strands[idx],
            )
        });

        self.templates = order.iter().map(|&i| self.templates[i as usize]).collect();
        self.positions = order.iter().map(|&i| self.positions[i as usize]).collect();
        self.reads = order.iter().map(|&i| self.reads[i as usize]).collect();
        self.strands = order.iter().map(|&i| self.strands[i as usize]).collect();
        self.sorted = true;
    }

    /// Heap bytes held by the columns.
    pub fn heap_bytes(&self) -> usize {
        self.templates.capacity() * std::mem::size_of::<u32>()
            + self.positions.capacity() * std::mem::size_of::<i32>()
            + self.reads.capacity() * std::mem::size_of::<u32>()
            + self.strands.capacity() / 8
    }

    /// Free the backing arrays. The buffer is empty afterwards.
    pub fn release(&mut self) {
        self.templates = Vec::new();
        self.positions = Vec::new();
        self.reads = Vec::new();
        self.strands = BitVec::new();
        self.sorted = true;
    }
}

impl Default for HitBuffer {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl Extend<BufferedHit> for HitBuffer {
    fn extend<I: IntoIterator<Item = BufferedHit>>(&mut self, iter: I) {
        for hit in iter {
            self.push(hit);
        }
    }
}

impl FromIterator<BufferedHit> for HitBuffer {
    fn from_iter<I: IntoIterator<Item = BufferedHit>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut buffer = HitBuffer::with_capacity(iter.size_hint().0);
        buffer.extend(iter);
        buffer
    }
}

/// Row iterator over a [`HitBuffer`].
#[derive(Debug)]
pub struct HitBufferIter<'a> {
    buffer: &'a HitBuffer,
    next: usize,
    end: usize,
}

impl Iterator for HitBufferIter<'_> {
    type Item = BufferedHit;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let hit = self.buffer.get(self.next);
        self.next += 1;
        hit
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for HitBufferIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(template: u32, position: i32, read: u32, is_reverse: bool) -> BufferedHit {
        BufferedHit {
            template,
            position,
            read,
            is_reverse,
        }
    }

    #[test]
    fn sort_orders_by_template_position_read() {
        let mut buffer: HitBuffer = [
            hit(1, 5, 0, false),
            hit(0, 9, 2, true),
            hit(0, 9, 1, false),
            hit(1, -3, 7, true),
        ]
        .into_iter()
        .collect();
        assert!(!buffer.is_sorted());

        buffer.sort();
        let rows: Vec<_> = buffer.iter().collect();
        assert_eq!(
            rows,
            vec![
                hit(0, 9, 1, false),
                hit(0, 9, 2, true),
                hit(1, -3, 7, true),
                hit(1, 5, 0, false),
            ]
        );
        assert!(buffer.is_sorted());
    }

    #[test]
    fn append_tracks_sortedness() {
        let mut left: HitBuffer = [hit(0, 1, 0, false)].into_iter().collect();
        let right: HitBuffer = [hit(0, 2, 0, false)].into_iter().collect();
        left.append(&right);
        assert!(left.is_sorted());
        left.append(&[hit(0, 0, 0, true)].into_iter().collect());
        assert!(!left.is_sorted());
        assert_eq!(left.len(), 3);
        assert!(left.get(2).unwrap().is_reverse);
    }

    #[test]
    fn release_frees_storage() {
        let mut buffer = HitBuffer::with_capacity(1_024);
        buffer.push(hit(0, 0, 0, false));
        assert!(buffer.heap_bytes() > 0);
        buffer.release();
        assert!(buffer.is_empty());
        assert_eq!(buffer.heap_bytes(), 0);
    }

    #[test]
    fn iter_range_clamps_to_len() {
        let buffer: HitBuffer = (0..4).map(|i| hit(0, i, 0, false)).collect();
        let positions: Vec<_> = buffer.iter_range(2..10).map(|h| h.position).collect();
        assert_eq!(positions, vec![2, 3]);
    }
}
