use anyhow::{anyhow, Result};
use flate2::read::MultiGzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

// Helper to create a consistent spinner
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Open a plain or gzip-compressed text file, picking the decoder from the `.gz` extension.
pub fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => anyhow!("File not found: {}", path.display()),
        io::ErrorKind::PermissionDenied => anyhow!("Permission denied: {}", path.display()),
        _ => anyhow!("Cannot open file: {} ({})", path.display(), e),
    })?;

    let reader: Box<dyn BufRead> = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext == "gz")
    {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(reader)
}

/// Remembers where newlines fall in the bytes handed to a parser, so the
/// parser's byte offsets map back to physical lines. Lines the parser skips
/// (blank lines, comments) are still counted.
///
/// A csv record's own position points at whatever followed the previous
/// record, skipped lines included, so callers should ask for the line of the
/// record's last byte (`reader.position().byte() - 1` right after reading it).
/// Only newlines not yet passed are kept, so queries must come in
/// non-decreasing byte order.
pub struct LineTracker<R> {
    inner: R,
    offset: u64,
    newlines: VecDeque<u64>,
    lines_before: u64,
}

impl<R> LineTracker<R> {
    /// `lines_before` is the number of lines already consumed from `inner`.
    pub fn new(inner: R, lines_before: u64) -> Self {
        Self {
            inner,
            offset: 0,
            newlines: VecDeque::new(),
            lines_before,
        }
    }

    /// 1-based line containing `byte`
    pub fn line_at(&mut self, byte: u64) -> u64 {
        while let Some(&newline) = self.newlines.front() {
            if newline >= byte {
                break;
            }
            self.newlines.pop_front();
            self.lines_before += 1;
        }
        self.lines_before + 1
    }
}

impl<R: Read> Read for LineTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        let start = self.offset;
        self.newlines.extend(
            buf[..n]
                .iter()
                .enumerate()
                .filter(|(_, &b)| b == b'\n')
                .map(|(i, _)| start + i as u64),
        );
        self.offset += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::Builder;

    #[test]
    fn test_line_tracker_counts_skipped_lines() {
        let data = "a\tb\n\n\n# note\nc\td\n\ne\tf\n";
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .from_reader(LineTracker::new(Cursor::new(data), 0));

        let mut lines = Vec::new();
        let mut record = csv::StringRecord::new();
        while reader.read_record(&mut record).unwrap() {
            let end = reader.position().byte();
            lines.push(reader.get_mut().line_at(end - 1));
        }
        assert_eq!(lines, vec![1, 5, 7]);
    }

    #[test]
    fn test_line_tracker_offset_start() {
        let mut tracker = LineTracker::new(Cursor::new("x\ny\n"), 3);
        let mut sink = Vec::new();
        tracker.read_to_end(&mut sink).unwrap();
        assert_eq!(tracker.line_at(0), 4);
        assert_eq!(tracker.line_at(2), 5);
    }

    #[test]
    fn test_open_plain_and_gzip() {
        let mut plain = Builder::new().suffix(".tsv").tempfile().unwrap();
        write!(plain, "a\tb\n").unwrap();

        let gz = Builder::new().suffix(".tsv.gz").tempfile().unwrap();
        let mut encoder = GzEncoder::new(gz.reopen().unwrap(), Compression::default());
        encoder.write_all(b"a\tb\n").unwrap();
        encoder.finish().unwrap();

        for path in [plain.path(), gz.path()] {
            let mut content = String::new();
            open_reader(path).unwrap().read_to_string(&mut content).unwrap();
            assert_eq!(content, "a\tb\n");
        }
    }

    #[test]
    fn test_open_missing_file() {
        let err = open_reader("does/not/exist.tsv").err().unwrap();
        assert!(err.to_string().contains("File not found"));
    }
}
