//! Output record layout.

use std::io::{self, Write};

use crate::hits::Hit;

/// Output record flag: read aligned to the reverse strand.
pub const FLAG_REVERSE: u16 = 0x10;
/// Output record flag: arm pairs consistently with its mate.
pub const FLAG_MATED: u16 = 0x2;
/// Output record flag: not the read's primary locus.
pub const FLAG_SECONDARY: u16 = 0x100;

/// A filtered hit ready to be formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRecord {
    /// Underlying hit.
    pub hit: Hit,
    /// Not the read's primary locus.
    pub secondary: bool,
    /// Paired consistently with the mate arm.
    pub mated: bool,
    /// Equally-best alignment count.
    pub nh: u32,
}

impl OutputRecord {
    /// Record with no flags and `NH = 1`.
    pub fn plain(hit: Hit) -> Self {
        Self {
            hit,
            secondary: false,
            mated: false,
            nh: 1,
        }
    }

    /// Flag word.
    pub fn flag(&self) -> u16 {
        let mut flag = 0;
        if self.hit.is_reverse {
            flag |= FLAG_REVERSE;
        }
        if self.mated {
            flag |= FLAG_MATED;
        }
        if self.secondary {
            flag |= FLAG_SECONDARY;
        }
        flag
    }
}

/// Writes the byte stream of one band and finds records in it again.
///
/// The merged file is the byte concatenation of band streams, so only band 0
/// may emit a header and only the last band a terminator.
pub trait RecordFormatter: Sync {
    /// Header bytes (band 0 only).
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()>;

    /// One record.
    fn write_record(&self, out: &mut dyn Write, record: &OutputRecord) -> io::Result<()>;

    /// Terminator bytes (last band only).
    fn write_terminator(&self, out: &mut dyn Write) -> io::Result<()>;

    /// `(template, position)` of a written line, `Ok(None)` for header or
    /// terminator lines. `line` excludes the newline.
    fn locate(&self, line: &[u8]) -> Result<Option<(u32, i32)>, String>;
}

/// Tab-separated records:
/// `read template position strand score flag NH:i:n`.
///
/// Header and terminator lines start with `#`.
#[derive(Debug, Clone, Default)]
pub struct TsvFormatter {
    template_lengths: Vec<u32>,
}

impl TsvFormatter {
    /// Formatter whose header lists the given template lengths.
    pub fn new(template_lengths: Vec<u32>) -> Self {
        Self { template_lengths }
    }
}

impl RecordFormatter for TsvFormatter {
    fn write_header(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "#hitreduce\tv1")?;
        for (template, len) in self.template_lengths.iter().enumerate() {
            writeln!(out, "#template\t{template}\t{len}")?;
        }
        writeln!(out, "#read\ttemplate\tposition\tstrand\tscore\tflag\tnh")
    }

    fn write_record(&self, out: &mut dyn Write, record: &OutputRecord) -> io::Result<()> {
        let hit = &record.hit;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\tNH:i:{}",
            hit.read,
            hit.template,
            hit.position,
            if hit.is_reverse { '-' } else { '+' },
            hit.score,
            record.flag(),
            record.nh
        )
    }

    fn write_terminator(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "#eof")
    }

    fn locate(&self, line: &[u8]) -> Result<Option<(u32, i32)>, String> {
        if line.is_empty() || line[0] == b'#' {
            return Ok(None);
        }
        let line = std::str::from_utf8(line).map_err(|e| e.to_string())?;
        let mut fields = line.split('\t').skip(1);
        let template = fields
            .next()
            .and_then(|f| f.parse::<u32>().ok())
            .ok_or_else(|| format!("no template in record {line:?}"))?;
        let position = fields
            .next()
            .and_then(|f| f.parse::<i32>().ok())
            .ok_or_else(|| format!("no position in record {line:?}"))?;
        Ok(Some((template, position)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_line_layout() {
        let formatter = TsvFormatter::default();
        let record = OutputRecord {
            hit: Hit::new(2, 150, 9, true, 4),
            secondary: true,
            mated: false,
            nh: 3,
        };
        let mut out = Vec::new();
        formatter.write_record(&mut out, &record).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line, "9\t2\t150\t-\t4\t272\tNH:i:3\n");
        assert_eq!(
            formatter.locate(line.trim_end().as_bytes()).unwrap(),
            Some((2, 150))
        );
    }

    #[test]
    fn header_and_terminator_are_not_records() {
        let formatter = TsvFormatter::new(vec![1_000, 500]);
        let mut out = Vec::new();
        formatter.write_header(&mut out).unwrap();
        formatter.write_terminator(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 5);
        for line in text.lines() {
            assert_eq!(formatter.locate(line.as_bytes()).unwrap(), None);
        }
        assert!(formatter.locate(b"1\tx\t3").is_err());
    }
}
