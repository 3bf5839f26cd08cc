use crate::error::ParseError;

/// Largest engine output line accepted before it is discarded.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Splits an incrementally delivered byte stream into newline-terminated
/// lines. Bytes after the last newline are held until the next push.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_bytes: usize,
    discarding: bool,
}

impl LineFramer {
    #[must_use]
    pub const fn new(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_bytes,
            discarding: false,
        }
    }

    /// Feed a chunk and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<String, ParseError>> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.extend(head);
            if let Some(line) = self.take_line() {
                lines.push(line);
            }
            rest = tail.get(1..).unwrap_or_default();
        }
        self.extend(rest);
        lines
    }

    /// Flush the trailing partial line at end of stream.
    pub fn finish(&mut self) -> Option<Result<String, ParseError>> {
        if self.buffer.is_empty() && !self.discarding {
            return None;
        }
        self.take_line()
    }

    fn extend(&mut self, bytes: &[u8]) {
        if self.discarding {
            return;
        }
        if self.buffer.len().saturating_add(bytes.len()) > self.max_bytes {
            self.buffer.clear();
            self.discarding = true;
            return;
        }
        self.buffer.extend_from_slice(bytes);
    }

    fn take_line(&mut self) -> Option<Result<String, ParseError>> {
        if self.discarding {
            self.discarding = false;
            self.buffer.clear();
            return Some(Err(ParseError::LineTooLong {
                max_bytes: self.max_bytes,
            }));
        }
        let mut bytes = std::mem::take(&mut self.buffer);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        if bytes.is_empty() {
            return None;
        }
        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
    }
}
