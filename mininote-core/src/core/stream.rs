use super::error::{PDFError, PDFResult};
use std::sync::Arc;

/// A cursor over an in-memory PDF byte buffer.
///
/// The buffer is shared through an `Arc`, so sub-streams (an object at an
/// xref offset, the body of an object stream) are cheap windows onto the same
/// allocation. Positions are absolute offsets into the shared buffer.
#[derive(Clone)]
pub struct Stream {
    bytes: Arc<[u8]>,
    pos: usize,
    start: usize,
    end: usize,
}

impl Stream {
    /// Creates a stream covering the whole buffer.
    pub fn new(bytes: Arc<[u8]>) -> Self {
        let end = bytes.len();
        Stream {
            bytes,
            pos: 0,
            start: 0,
            end,
        }
    }

    /// Creates a stream that owns a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(Arc::from(bytes))
    }

    /// Creates a window `[start, start + length)` sharing the same buffer.
    ///
    /// The window is clamped to the end of the parent.
    pub fn sub_stream(&self, start: usize, length: usize) -> PDFResult<Stream> {
        if start > self.end {
            return Err(PDFError::InvalidByteRange {
                begin: start,
                end: start.saturating_add(length),
            });
        }
        Ok(Stream {
            bytes: Arc::clone(&self.bytes),
            pos: start,
            start,
            end: start.saturating_add(length).min(self.end),
        })
    }

    /// Window from `start` to the end of this stream.
    pub fn tail(&self, start: usize) -> PDFResult<Stream> {
        self.sub_stream(start, self.end.saturating_sub(start))
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos < self.start || pos > self.end {
            return Err(PDFError::InvalidByteRange {
                begin: pos,
                end: self.end,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.end
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.pos < self.end {
            Some(self.bytes[self.pos])
        } else {
            None
        }
    }

    /// Returns the byte `offset` positions ahead without consuming anything.
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        let idx = self.pos.checked_add(offset)?;
        if idx < self.end {
            Some(self.bytes[idx])
        } else {
            None
        }
    }

    /// Consumes and returns the next byte.
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Consumes exactly `length` bytes.
    pub fn take(&mut self, length: usize) -> PDFResult<&[u8]> {
        let end = self
            .pos
            .checked_add(length)
            .filter(|&end| end <= self.end)
            .ok_or(PDFError::UnexpectedEndOfStream)?;
        let begin = self.pos;
        self.pos = end;
        Ok(&self.bytes[begin..end])
    }

    /// Bytes from the current position to the end of the window.
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.pos.min(self.end)..self.end]
    }

    /// Returns an absolute byte range of the underlying buffer.
    pub fn slice(&self, begin: usize, end: usize) -> PDFResult<&[u8]> {
        if begin > end || end > self.bytes.len() {
            return Err(PDFError::InvalidByteRange { begin, end });
        }
        Ok(&self.bytes[begin..end])
    }

    /// Finds the next occurrence of `needle` at or after the current position.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        find_subslice(self.remaining(), needle).map(|off| self.pos + off)
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
pub fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of the last occurrence of `needle` in `haystack`.
pub fn rfind_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_reads_in_order() {
        let mut stream = Stream::from_bytes(&[10, 20, 30]);
        assert_eq!(stream.peek(), Some(10));
        assert_eq!(stream.next_byte(), Some(10));
        assert_eq!(stream.next_byte(), Some(20));
        assert_eq!(stream.pos(), 2);
        assert_eq!(stream.next_byte(), Some(30));
        assert_eq!(stream.next_byte(), None);
        assert!(stream.is_at_end());
    }

    #[test]
    fn test_sub_stream_shares_buffer_and_clamps() {
        let stream = Stream::from_bytes(b"0123456789");
        let mut sub = stream.sub_stream(4, 100).unwrap();
        assert_eq!(sub.pos(), 4);
        assert_eq!(sub.end(), 10);
        assert_eq!(sub.take(3).unwrap(), b"456");
        assert!(stream.sub_stream(11, 1).is_err());
    }

    #[test]
    fn test_take_past_end_fails_without_moving() {
        let mut stream = Stream::from_bytes(b"abc");
        assert_eq!(stream.take(4), Err(PDFError::UnexpectedEndOfStream));
        assert_eq!(stream.pos(), 0);
    }

    #[test]
    fn test_find_helpers() {
        let stream = Stream::from_bytes(b"xx endstream yy endstream");
        assert_eq!(stream.find(b"endstream"), Some(3));
        assert_eq!(rfind_subslice(b"ab ab ab", b"ab"), Some(6));
        assert_eq!(find_subslice(b"ab", b"abc"), None);
    }
}
