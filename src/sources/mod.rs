//! Interfaces to the stages around the reducer: hit scoring and read storage.
//!
//! The reducer only ever sees these traits. In-memory implementations back
//! the tests and the command-line tool.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::hits::{BufferedHit, Hit};
use crate::ReduceError;

/// Scores a buffered hit. Lower is better; `None` means the hit is unusable.
pub trait HitScorer: Sync {
    /// Score of `hit`.
    fn score(&self, hit: &BufferedHit) -> Option<u16>;
}

impl<F> HitScorer for F
where
    F: Fn(&BufferedHit) -> Option<u16> + Sync,
{
    fn score(&self, hit: &BufferedHit) -> Option<u16> {
        self(hit)
    }
}

/// Read-level metadata by read key.
pub trait ReadStore: Sync {
    /// Read length in bases.
    fn read_length(&self, read: u32) -> Option<u32>;

    /// Mean base quality (Phred).
    fn mean_quality(&self, read: u32) -> Option<u8>;
}

/// Read lengths and qualities held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReads {
    lengths: Vec<u32>,
    qualities: Vec<u8>,
}

impl InMemoryReads {
    /// Every read gets the same length and quality.
    pub fn uniform(num_reads: usize, length: u32, quality: u8) -> Self {
        Self {
            lengths: vec![length; num_reads],
            qualities: vec![quality; num_reads],
        }
    }

    /// Append a read; returns its key.
    pub fn push(&mut self, length: u32, quality: u8) -> u32 {
        self.lengths.push(length);
        self.qualities.push(quality);
        (self.lengths.len() - 1) as u32
    }

    /// Number of reads.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Whether no reads are stored.
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

impl ReadStore for InMemoryReads {
    fn read_length(&self, read: u32) -> Option<u32> {
        self.lengths.get(read as usize).copied()
    }

    fn mean_quality(&self, read: u32) -> Option<u8> {
        self.qualities.get(read as usize).copied()
    }
}

/// Scores looked up from the raw search output, keyed by the full hit row.
#[derive(Debug, Clone, Default)]
pub struct RecordedScores {
    scores: std::collections::HashMap<BufferedHit, u16>,
}

impl RecordedScores {
    /// Remember the score of every hit.
    pub fn from_hits<'a>(hits: impl IntoIterator<Item = &'a Hit>) -> Self {
        let mut scores = std::collections::HashMap::new();
        for hit in hits {
            scores
                .entry(hit.unscored())
                .and_modify(|s: &mut u16| *s = (*s).min(hit.score))
                .or_insert(hit.score);
        }
        Self { scores }
    }
}

impl HitScorer for RecordedScores {
    fn score(&self, hit: &BufferedHit) -> Option<u16> {
        self.scores.get(hit).copied()
    }
}

/// Parse a raw search output file: `read\ttemplate\tposition\tstrand\tscore` per line.
///
/// This is the same layout shard files use. Blank lines and lines starting
/// with `#` are skipped.
pub fn read_hit_table(path: &Path) -> Result<Vec<Hit>, ReduceError> {
    let file = File::open(path).map_err(|e| ReduceError::shard_io(path, e))?;
    let mut hits = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| ReduceError::shard_io(path, e))?;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let hit = parse_hit_line(&line).map_err(|reason| ReduceError::MalformedShard {
            path: path.to_path_buf(),
            line: idx + 1,
            reason,
        })?;
        hits.push(hit);
    }
    Ok(hits)
}

/// Parse one `read\ttemplate\tposition\tstrand\tscore` line.
pub fn parse_hit_line(line: &str) -> Result<Hit, String> {
    let fields: Vec<&str> = line.trim_end().split('\t').collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }
    let read = fields[0]
        .parse::<u32>()
        .map_err(|e| format!("read: {e}"))?;
    let template = fields[1]
        .parse::<u32>()
        .map_err(|e| format!("template: {e}"))?;
    let position = fields[2]
        .parse::<i32>()
        .map_err(|e| format!("position: {e}"))?;
    let is_reverse = match fields[3] {
        "+" => false,
        "-" => true,
        other => return Err(format!("strand must be + or -, found {other:?}")),
    };
    let score = fields[4]
        .parse::<u16>()
        .map_err(|e| format!("score: {e}"))?;
    Ok(Hit::new(template, position, read, is_reverse, score))
}

/// Format one hit in the shard layout, newline included.
pub fn format_hit_line(hit: &Hit) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\n",
        hit.read,
        hit.template,
        hit.position,
        if hit.is_reverse { '-' } else { '+' },
        hit.score
    )
}
