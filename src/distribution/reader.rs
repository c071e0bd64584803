//! Whitespace-token reader for distribution files

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Result, SetupError};

/// Reads whitespace-separated numbers, keeping track of the line number
///
/// Only the root process ever holds one of these.
pub struct DistributionReader<R> {
    reader: R,
    line: usize,
    tokens: VecDeque<String>,
}

impl DistributionReader<BufReader<File>> {
    /// Opens a distribution file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SetupError::FileUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> DistributionReader<R> {
    /// Wraps any buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            tokens: VecDeque::new(),
        }
    }

    /// Line of the most recently returned token (1-based, 0 before any read)
    pub fn line(&self) -> usize {
        self.line
    }

    fn next_token(&mut self, what: &str) -> Result<String> {
        loop {
            if let Some(token) = self.tokens.pop_front() {
                return Ok(token);
            }

            let mut buf = String::new();
            let read = self.reader.read_line(&mut buf).map_err(|source| SetupError::Read {
                line: self.line + 1,
                source,
            })?;
            if read == 0 {
                return Err(SetupError::malformed(
                    self.line,
                    format!("unexpected end of input, expected {}", what),
                ));
            }

            self.line += 1;
            self.tokens.extend(buf.split_whitespace().map(str::to_owned));
        }
    }

    /// Reads a non-negative integer
    pub fn next_usize(&mut self, what: &str) -> Result<usize> {
        let token = self.next_token(what)?;
        token
            .parse()
            .map_err(|_| SetupError::malformed(self.line, format!("invalid {} {:?}", what, token)))
    }

    /// Reads a 1-based index in `1..=n` and returns it 0-based
    pub fn next_index(&mut self, what: &str, n: usize) -> Result<usize> {
        let index = self.next_usize(what)?;
        if index == 0 || index > n {
            return Err(SetupError::malformed(
                self.line,
                format!("{} {} outside 1..={}", what, index, n),
            ));
        }
        Ok(index - 1)
    }

    /// Reads a floating point number
    pub fn next_f64(&mut self, what: &str) -> Result<f64> {
        let token = self.next_token(what)?;
        token
            .parse()
            .map_err(|_| SetupError::malformed(self.line, format!("invalid {} {:?}", what, token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_tokens_across_lines() {
        let mut reader = DistributionReader::new(Cursor::new("4 4\n\n  7 \n1 2 -0.5e1\n"));

        assert_eq!(reader.next_usize("a").unwrap(), 4);
        assert_eq!(reader.next_usize("b").unwrap(), 4);
        assert_eq!(reader.next_usize("c").unwrap(), 7);
        assert_eq!(reader.line(), 3);
        assert_eq!(reader.next_index("row", 4).unwrap(), 0);
        assert_eq!(reader.next_index("col", 4).unwrap(), 1);
        assert_eq!(reader.next_f64("value").unwrap(), -5.0);
        assert_eq!(reader.line(), 4);

        match reader.next_usize("more") {
            Err(SetupError::MalformedEntry { line: 4, message }) => assert!(message.contains("end of input")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_tokens() {
        let mut reader = DistributionReader::new(Cursor::new("x 0 5"));
        assert!(matches!(reader.next_usize("count"), Err(SetupError::MalformedEntry { line: 1, .. })));
        assert!(reader.next_index("row", 4).is_err());
        assert!(reader.next_index("row", 4).is_err());
    }

    #[test]
    fn test_missing_file() {
        match DistributionReader::open("/nonexistent/matrix.mtx") {
            Err(err @ SetupError::FileUnavailable { .. }) => assert_eq!(err.abort_code(), -2),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a missing file"),
        }
    }
}
