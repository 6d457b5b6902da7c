//! Item-count split for worker threads.

use super::WorkerSlice;
use crate::hits::HitBuffer;

/// Split a sorted buffer into `workers` contiguous slices of `len / workers`
/// hits (the last worker absorbs the remainder).
///
/// Each interior boundary is pushed forward past hits sharing the locus on
/// its left, so one `(template, position)` is never owned by two workers.
/// Each slice's `padded` range is then grown outward over neighbouring hits
/// on the same template within `padding` bases of the slice's first and
/// last owned hit.
pub fn split_by_count(buffer: &HitBuffer, workers: usize, padding: u32) -> Vec<WorkerSlice> {
    let workers = workers.max(1);
    let n = buffer.len();
    let per_worker = n / workers;
    let templates = buffer.templates();
    let positions = buffer.positions();

    let mut bounds: Vec<usize> = (0..workers).map(|k| k * per_worker).collect();
    bounds.push(n);
    for k in 1..workers {
        let mut boundary = bounds[k].max(bounds[k - 1]);
        while boundary > 0 && boundary < n && buffer.locus(boundary) == buffer.locus(boundary - 1)
        {
            boundary += 1;
        }
        bounds[k] = boundary;
    }

    let pad = padding as i64;
    bounds
        .windows(2)
        .enumerate()
        .map(|(worker, pair)| {
            let owned = pair[0]..pair[1];
            if owned.is_empty() {
                return WorkerSlice {
                    worker,
                    padded: owned.clone(),
                    owned,
                };
            }

            let (first_template, first_position) = buffer.locus(owned.start);
            let mut start = owned.start;
            while start > 0
                && templates[start - 1] == first_template
                && positions[start - 1] as i64 >= first_position as i64 - pad
            {
                start -= 1;
            }

            let (last_template, last_position) = buffer.locus(owned.end - 1);
            let mut end = owned.end;
            while end < n
                && templates[end] == last_template
                && positions[end] as i64 <= last_position as i64 + pad
            {
                end += 1;
            }

            WorkerSlice {
                worker,
                owned,
                padded: start..end,
            }
        })
        .collect()
}
