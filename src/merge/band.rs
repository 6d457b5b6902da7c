//! Band planning and temporary band files.

use std::path::{Path, PathBuf};

use super::calibration::CovariateTable;
use super::index::IndexEntry;

/// Shard files grouped for one filter task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandPlan {
    /// Band number, also its position in the output.
    pub band: usize,
    /// Input shard files, read in order.
    pub inputs: Vec<PathBuf>,
}

impl BandPlan {
    /// Temporary output file of this band in `work_dir`.
    pub fn part_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("band-{:04}.part", self.band))
    }

    /// Scratch file used while post-processing this band.
    pub fn post_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(format!("band-{:04}.post", self.band))
    }
}

/// Group `inputs` into `min(len, thread_cap)` contiguous bands of near-equal size.
///
/// The first `len % bands` bands take one extra file. No inputs still yields
/// one empty band so the output gets its header and terminator.
pub fn plan_bands(inputs: &[PathBuf], thread_cap: usize) -> Vec<BandPlan> {
    let bands = inputs.len().min(thread_cap.max(1)).max(1);
    let base = inputs.len() / bands;
    let extra = inputs.len() % bands;
    let mut next = 0;
    (0..bands)
        .map(|band| {
            let take = base + usize::from(band < extra);
            let plan = BandPlan {
                band,
                inputs: inputs[next..next + take].to_vec(),
            };
            next += take;
            plan
        })
        .collect()
}

/// What one filter task produced.
#[derive(Debug, Clone)]
pub struct BandOutput {
    /// Band number.
    pub band: usize,
    /// Temporary band file.
    pub path: PathBuf,
    /// Length of the band file.
    pub bytes: u64,
    /// Records written.
    pub records_written: u64,
    /// Hits the policy filtered out.
    pub records_filtered: u64,
    /// Index fragment, offsets relative to the band start.
    pub index: Option<Vec<IndexEntry>>,
    /// Covariates of written records.
    pub covariates: Option<CovariateTable>,
}

/// Per-band byte and record counts in the merge report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BandSummary {
    /// Band number.
    pub band: usize,
    /// Input shard files.
    pub inputs: usize,
    /// Band length in the final file.
    pub bytes: u64,
    /// Records written.
    pub records_written: u64,
    /// Hits filtered out.
    pub records_filtered: u64,
}

/// Deletes registered temporary files when dropped, on every exit path.
///
/// Deletion failures are logged and otherwise ignored.
#[derive(Debug, Default)]
pub(crate) struct TempFiles {
    paths: parking_lot::Mutex<Vec<PathBuf>>,
}

impl TempFiles {
    pub(crate) fn register(&self, path: PathBuf) {
        self.paths.lock().push(path);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in self.paths.get_mut().drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file")
                }
            }
        }
    }
}
