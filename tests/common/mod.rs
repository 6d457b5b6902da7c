#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use hitreduce::hits::{BufferedHit, Hit, HitBuffer, LocusCodec};
use hitreduce::sources::format_hit_line;

pub fn codec() -> LocusCodec {
    LocusCodec::new(4, 100_000, 500).expect("codec fits")
}

pub fn write_shard(dir: &Path, name: &str, hits: &[Hit]) -> PathBuf {
    let path = dir.join(name);
    let body: String = hits.iter().map(format_hit_line).collect();
    fs::write(&path, body).expect("write shard");
    path
}

pub fn buffer_of(loci: &[(u32, i32)]) -> HitBuffer {
    loci.iter()
        .enumerate()
        .map(|(read, &(template, position))| BufferedHit {
            template,
            position,
            read: read as u32,
            is_reverse: false,
        })
        .collect()
}

pub fn file_digest(path: &Path) -> blake3::Hash {
    blake3::hash(&fs::read(path).expect("read output"))
}

/// Record lines of a merged TSV output, header and terminator stripped.
pub fn record_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .expect("read output")
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn dir_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
