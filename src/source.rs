//! Source buffers: immutable byte ranges with a precomputed line index.
//!
//! All offsets are absolute byte offsets into the underlying allocation, so a
//! [`Source::slice`] shares offsets (and the line index) with its parent.

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;

/// Errors raised while loading a source buffer.
#[derive(Debug)]
pub enum SourceError {
    NotFound(String),
    Io { name: String, error: io::Error },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "Could not find file: {name}"),
            Self::Io { name, error } => write!(f, "Could not read {name}: {error}"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotFound(_) => None,
            Self::Io { error, .. } => Some(error),
        }
    }
}

/// An immutable view `[start, end)` over a shared byte allocation.
#[derive(Debug, Clone)]
pub struct Source {
    name: Arc<str>,
    bytes: Arc<[u8]>,
    /// Byte offset of the first byte of every line, ascending.
    line_starts: Arc<[usize]>,
    start: usize,
    end: usize,
}

impl Source {
    /// Read a whole file. `-` or an empty name reads standard input.
    pub fn load(path: &str) -> Result<Source, SourceError> {
        if path.is_empty() || path == "-" {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .map_err(|error| SourceError::Io {
                    name: "<stdin>".to_string(),
                    error,
                })?;
            return Ok(Source::from_bytes("-", buf));
        }
        if !Path::new(path).exists() {
            return Err(SourceError::NotFound(path.to_string()));
        }
        let buf = fs::read(path).map_err(|error| SourceError::Io {
            name: path.to_string(),
            error,
        })?;
        Ok(Source::from_bytes(path, buf))
    }

    /// Wrap a string as though it had been loaded from a file called `name`.
    pub fn synthesize(name: &str, text: &str) -> Source {
        Source::from_bytes(name, text.as_bytes().to_vec())
    }

    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Source {
        let line_starts: Vec<usize> = std::iter::once(0)
            .chain(bytes.iter().positions(|&b| b == b'\n').map(|i| i + 1))
            .collect();
        let end = bytes.len();
        Source {
            name: Arc::from(name),
            bytes: Arc::from(bytes),
            line_starts: Arc::from(line_starts),
            start: 0,
            end,
        }
    }

    /// A narrower view sharing the bytes and line index. Bounds are clamped to
    /// this view.
    pub fn slice(&self, start: usize, end: usize) -> Source {
        let start = start.clamp(self.start, self.end);
        let end = end.clamp(start, self.end);
        Source {
            name: Arc::clone(&self.name),
            bytes: Arc::clone(&self.bytes),
            line_starts: Arc::clone(&self.line_starts),
            start,
            end,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// The whole underlying allocation; index it with absolute offsets.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The bytes inside this view only.
    pub fn text(&self) -> &[u8] {
        &self.bytes[self.start..self.end]
    }

    /// Bytes of an absolute span, clamped to the allocation.
    pub fn span_text(&self, start: usize, end: usize) -> &[u8] {
        let end = end.min(self.bytes.len());
        &self.bytes[start.min(end)..end]
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-based line number containing `offset`.
    pub fn line_number(&self, offset: usize) -> usize {
        self.line_starts.partition_point(|&s| s <= offset).max(1)
    }

    /// 1-based column (in bytes) of `offset` within its line.
    pub fn column(&self, offset: usize) -> usize {
        offset - self.line_start(self.line_number(offset)).unwrap_or(0) + 1
    }

    /// Absolute offset where 1-based line `n` begins.
    pub fn line_start(&self, n: usize) -> Option<usize> {
        n.checked_sub(1).and_then(|i| self.line_starts.get(i).copied())
    }

    /// Text of 1-based line `n`, without its trailing newline.
    pub fn line_text(&self, n: usize) -> Option<&[u8]> {
        let start = self.line_start(n)?;
        let end = self
            .line_start(n + 1)
            .map(|next| next - 1)
            .unwrap_or(self.bytes.len());
        Some(&self.bytes[start..end.max(start)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_numbers_binary_search() {
        let src = Source::synthesize("t", "ab\ncd\n\nef");
        assert_eq!(src.line_count(), 4);
        assert_eq!(src.line_number(0), 1);
        assert_eq!(src.line_number(2), 1);
        assert_eq!(src.line_number(3), 2);
        assert_eq!(src.line_number(6), 3);
        assert_eq!(src.line_number(7), 4);
        assert_eq!(src.line_number(9), 4);
    }

    #[test]
    fn line_text_excludes_newline() {
        let src = Source::synthesize("t", "ab\ncd\n");
        assert_eq!(src.line_text(1), Some(&b"ab"[..]));
        assert_eq!(src.line_text(2), Some(&b"cd"[..]));
        assert_eq!(src.line_text(3), Some(&b""[..]));
        assert_eq!(src.line_text(4), None);
        assert_eq!(src.line_text(0), None);
    }

    #[test]
    fn column_is_one_based() {
        let src = Source::synthesize("t", "ab\ncd");
        assert_eq!(src.column(0), 1);
        assert_eq!(src.column(4), 2);
    }

    #[test]
    fn slice_shares_offsets() {
        let src = Source::synthesize("t", "hello\nworld");
        let s = src.slice(6, 11);
        assert_eq!(s.text(), b"world");
        assert_eq!(s.start(), 6);
        assert_eq!(s.line_number(6), 2);
        let clamped = s.slice(0, 100);
        assert_eq!(clamped.start(), 6);
        assert_eq!(clamped.end(), 11);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Source::load("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }
}
