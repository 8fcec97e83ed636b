use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, trace};

use crate::errors::{MatchError, MatchResult};
use crate::results::PatternId;

/// Files at or above this size are memory-mapped instead of read
pub(crate) const LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024; // 10MB

/// Ordered, immutable list of patterns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSet {
    patterns: Vec<String>,
}

impl PatternSet {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    /// Loads one pattern per line; patterns must be valid UTF-8
    pub fn from_file(path: &Path) -> MatchResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| MatchError::from_io(path, e))?;
        let text =
            std::str::from_utf8(&bytes).map_err(|e| MatchError::encoding_error(path, e))?;
        let patterns: Vec<String> = text
            .lines()
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();
        debug!("Loaded {} patterns from {}", patterns.len(), path.display());
        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, id: PatternId) -> Option<&str> {
        self.patterns.get(id).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.patterns
    }

    pub fn iter(&self) -> impl Iterator<Item = (PatternId, &str)> {
        self.patterns.iter().map(String::as_str).enumerate()
    }
}

/// Storage behind a [`LineSet`]
#[derive(Debug)]
enum Backing {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(data) => data,
            Backing::Mapped(mmap) => mmap,
        }
    }
}

impl Default for Backing {
    fn default() -> Self {
        Backing::Owned(Vec::new())
    }
}

/// Ordered, immutable lines held in one buffer with per-line spans
#[derive(Debug, Default)]
pub struct LineSet {
    data: Backing,
    spans: Vec<Range<usize>>,
    total_bytes: u64,
}

impl LineSet {
    /// Builds a line set from newline-separated bytes.
    ///
    /// Each line loses its `\n` and a trailing `\r`. Text after the last newline is
    /// a final line; a trailing newline does not start an empty one.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::split(Backing::Owned(data))
    }

    fn split(data: Backing) -> Self {
        let bytes = data.bytes();
        let mut spans = Vec::new();
        let mut total_bytes = 0u64;
        let mut start = 0;
        while start < bytes.len() {
            let newline = bytes[start..].iter().position(|&b| b == b'\n');
            let next = newline.map_or(bytes.len(), |pos| start + pos);
            let mut end = next;
            if end > start && bytes[end - 1] == b'\r' {
                end -= 1;
            }
            total_bytes += (end - start) as u64;
            spans.push(start..end);
            start = next + 1;
        }
        Self {
            data,
            spans,
            total_bytes,
        }
    }

    /// Builds a line set from already-split lines
    pub fn from_lines<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut data = Vec::new();
        let mut spans = Vec::new();
        for line in lines {
            let line = line.as_ref();
            let start = data.len();
            data.extend_from_slice(line);
            spans.push(start..data.len());
        }
        let total_bytes = data.len() as u64;
        Self {
            data: Backing::Owned(data),
            spans,
            total_bytes,
        }
    }

    /// Loads lines from a file, memory-mapping large inputs
    pub fn from_file(path: &Path) -> MatchResult<Self> {
        let file = File::open(path).map_err(|e| MatchError::from_io(path, e))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);

        let data = if size >= LARGE_FILE_THRESHOLD {
            trace!("Memory-mapping {} ({} bytes)", path.display(), size);
            let mmap = unsafe { Mmap::map(&file) }.map_err(MatchError::IoError)?;
            Backing::Mapped(mmap)
        } else {
            trace!("Reading {} ({} bytes)", path.display(), size);
            Backing::Owned(std::fs::read(path).map_err(|e| MatchError::from_io(path, e))?)
        };

        let lines = Self::split(data);
        debug!(
            "Loaded {} lines ({} bytes) from {}",
            lines.len(),
            lines.total_bytes(),
            path.display()
        );
        Ok(lines)
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The bytes of line `index`, without its newline
    pub fn line(&self, index: usize) -> &[u8] {
        &self.data.bytes()[self.spans[index].clone()]
    }

    pub fn byte_len(&self, index: usize) -> u64 {
        self.spans[index].len() as u64
    }

    pub fn byte_lengths(&self) -> Vec<u64> {
        self.spans.iter().map(|s| s.len() as u64).collect()
    }

    /// Sum of line byte lengths, newlines excluded
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Lines in `range` as byte slices
    pub fn slice(&self, range: Range<usize>) -> Vec<&[u8]> {
        let bytes = self.data.bytes();
        self.spans[range].iter().map(|s| &bytes[s.clone()]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_line_splitting() {
        let lines = LineSet::from_bytes(b"xaby\nzcdw\r\nnone\n".to_vec());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.line(0), b"xaby");
        assert_eq!(lines.line(1), b"zcdw");
        assert_eq!(lines.line(2), b"none");
        assert_eq!(lines.total_bytes(), 12);
        assert_eq!(lines.byte_lengths(), vec![4, 4, 4]);
    }

    #[test]
    fn test_unterminated_and_blank_lines() {
        let lines = LineSet::from_bytes(b"a\n\nbc".to_vec());
        assert_eq!(lines.len(), 3);
        assert_eq!(lines.line(1), b"");
        assert_eq!(lines.line(2), b"bc");
        assert_eq!(lines.byte_len(2), 2);

        assert!(LineSet::from_bytes(Vec::new()).is_empty());
    }

    #[test]
    fn test_from_lines_and_slice() {
        let lines = LineSet::from_lines(["one", "two", "three"]);
        assert_eq!(lines.total_bytes(), 11);
        assert_eq!(lines.slice(1..3), vec![&b"two"[..], &b"three"[..]]);
    }

    #[test]
    fn test_load_files() {
        let dir = tempdir().unwrap();
        let lines_path = dir.path().join("lines.txt");
        let patterns_path = dir.path().join("patterns.txt");
        std::fs::File::create(&lines_path)
            .unwrap()
            .write_all(b"first line\nsecond line\n")
            .unwrap();
        std::fs::write(&patterns_path, "ab\r\ncd\n").unwrap();

        let lines = LineSet::from_file(&lines_path).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.line(1), b"second line");

        let patterns = PatternSet::from_file(&patterns_path).unwrap();
        assert_eq!(patterns.as_slice(), &["ab".to_string(), "cd".to_string()]);
        assert_eq!(patterns.get(1), Some("cd"));
    }

    #[test]
    fn test_missing_file() {
        let err = LineSet::from_file(Path::new("does/not/exist.txt")).unwrap_err();
        assert!(matches!(err, MatchError::FileNotFound(_)));
    }

    #[test]
    fn test_pattern_file_must_be_utf8() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("patterns.txt");
        std::fs::write(&path, [0x66, 0xff, 0x0a]).unwrap();
        assert!(matches!(
            PatternSet::from_file(&path),
            Err(MatchError::EncodingError { .. })
        ));
    }
}
