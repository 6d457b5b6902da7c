//! Byte-offset index built alongside band output.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crossbeam_channel::{Receiver, Sender};

use super::format::RecordFormatter;

/// First record of one `(template, bin)` in a band, offset relative to the band start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Template id.
    pub template: u32,
    /// `position / bin_width`, negative positions fold into bin 0.
    pub bin: u32,
    /// Byte offset of the record line.
    pub offset: u64,
}

/// Incremental line scanner that records the first record of every bin.
#[derive(Debug)]
pub struct IndexBuilder<'f, F: ?Sized> {
    formatter: &'f F,
    bin_width: u32,
    offset: u64,
    line_start: u64,
    partial: Vec<u8>,
    entries: Vec<IndexEntry>,
    last_key: Option<(u32, u32)>,
}

impl<'f, F: RecordFormatter + ?Sized> IndexBuilder<'f, F> {
    /// Builder with `bin_width`-base bins.
    pub fn new(formatter: &'f F, bin_width: u32) -> Self {
        Self {
            formatter,
            bin_width: bin_width.max(1),
            offset: 0,
            line_start: 0,
            partial: Vec::new(),
            entries: Vec::new(),
            last_key: None,
        }
    }

    /// Consume the next bytes of the band stream.
    pub fn feed(&mut self, mut bytes: &[u8]) -> Result<(), String> {
        while let Some(newline) = bytes.iter().position(|&b| b == b'\n') {
            let (head, rest) = bytes.split_at(newline + 1);
            self.partial.extend_from_slice(&head[..newline]);
            self.offset += head.len() as u64;
            let line = std::mem::take(&mut self.partial);
            self.index_line(&line)?;
            self.partial = line;
            self.partial.clear();
            self.line_start = self.offset;
            bytes = rest;
        }
        self.partial.extend_from_slice(bytes);
        self.offset += bytes.len() as u64;
        Ok(())
    }

    fn index_line(&mut self, line: &[u8]) -> Result<(), String> {
        let Some((template, position)) = self.formatter.locate(line)? else {
            return Ok(());
        };
        let bin = position.max(0) as u32 / self.bin_width;
        if self.last_key != Some((template, bin)) {
            self.last_key = Some((template, bin));
            self.entries.push(IndexEntry {
                template,
                bin,
                offset: self.line_start,
            });
        }
        Ok(())
    }

    /// Finish the stream and return the entries plus total bytes seen.
    pub fn finish(mut self) -> Result<(Vec<IndexEntry>, u64), String> {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.index_line(&line)?;
        }
        Ok((self.entries, self.offset))
    }

    /// Drain a channel of byte chunks until every sender is gone.
    pub fn consume(mut self, chunks: Receiver<Vec<u8>>) -> Result<(Vec<IndexEntry>, u64), String> {
        for chunk in chunks {
            self.feed(&chunk)?;
        }
        self.finish()
    }

    /// Index an existing band file.
    pub fn scan<R: Read>(mut self, mut reader: R) -> Result<(Vec<IndexEntry>, u64), String> {
        let mut chunk = vec![0u8; TEE_CHUNK_BYTES];
        loop {
            let n = reader.read(&mut chunk).map_err(|e| e.to_string())?;
            if n == 0 {
                break;
            }
            self.feed(&chunk[..n])?;
        }
        self.finish()
    }
}

/// Bytes buffered before a chunk is handed to the index consumer.
pub const TEE_CHUNK_BYTES: usize = 64 * 1024;

/// Writer that forwards every byte to `inner` and, in chunks, to an index consumer.
///
/// If the consumer hangs up the tee stops forwarding but the file write
/// continues; the consumer's own result reports what went wrong.
#[derive(Debug)]
pub struct TeeWriter<W> {
    inner: W,
    sender: Option<Sender<Vec<u8>>>,
    pending: Vec<u8>,
    written: u64,
}

impl<W: Write> TeeWriter<W> {
    /// Tee into `sender`; `None` makes this a counting pass-through.
    pub fn new(inner: W, sender: Option<Sender<Vec<u8>>>) -> Self {
        Self {
            inner,
            sender,
            pending: Vec::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn send_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.pending);
        if let Some(sender) = &self.sender {
            if sender.send(chunk).is_err() {
                self.sender = None;
            }
        }
    }

    /// Flush everything, close the channel and return the inner writer.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.flush()?;
        self.sender = None;
        Ok((self.inner, self.written))
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        if self.sender.is_some() {
            self.pending.extend_from_slice(&buf[..n]);
            if self.pending.len() >= TEE_CHUNK_BYTES {
                self.send_pending();
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.send_pending();
        Ok(())
    }
}

/// Shift per-band fragments by band start offsets and keep the first entry per bin.
pub fn merge_fragments<'a>(
    fragments: impl IntoIterator<Item = (u64, &'a [IndexEntry])>,
) -> Vec<IndexEntry> {
    let mut merged: BTreeMap<(u32, u32), u64> = BTreeMap::new();
    for (band_offset, entries) in fragments {
        for entry in entries {
            merged
                .entry((entry.template, entry.bin))
                .or_insert(band_offset + entry.offset);
        }
    }
    merged
        .into_iter()
        .map(|((template, bin), offset)| IndexEntry {
            template,
            bin,
            offset,
        })
        .collect()
}

/// Write `template\tbin\toffset` lines.
pub fn write_index<W: Write>(entries: &[IndexEntry], mut out: W) -> io::Result<()> {
    for entry in entries {
        writeln!(out, "{}\t{}\t{}", entry.template, entry.bin, entry.offset)?;
    }
    out.flush()
}
