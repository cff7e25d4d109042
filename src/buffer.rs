use std::io::{self, Read};

use crate::cursor::SENTINEL_LEN;

/// Growable byte window keeping [`SENTINEL_LEN`] zero bytes readable past
/// the last data byte at all times.
///
/// Layout: `buf[..write_end]` is data, of which `buf[read_pos..write_end]`
/// is unread; `buf[write_end..write_end + SENTINEL_LEN]` is the sentinel
/// tail. The consumed prefix is compacted away once it exceeds a threshold,
/// which never moves bytes relative to `read_pos`.
pub(crate) struct PaddedBuffer {
    buf: Vec<u8>,
    read_pos: usize,
    write_end: usize,
    consumed: u64,
    compact_at: usize,
}

impl PaddedBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity + SENTINEL_LEN);
        buf.resize(SENTINEL_LEN, 0);

        Self {
            buf,
            read_pos: 0,
            write_end: 0,
            consumed: 0,
            compact_at: capacity.max(SENTINEL_LEN),
        }
    }

    #[inline(always)]
    pub(crate) fn window(&self) -> &[u8] {
        &self.buf[self.read_pos..]
    }

    #[inline(always)]
    pub(crate) fn remaining(&self) -> usize {
        self.write_end - self.read_pos
    }

    #[inline(always)]
    pub(crate) fn position(&self) -> u64 {
        self.consumed
    }

    #[inline]
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());

        self.read_pos += n;
        self.consumed += n as u64;
    }

    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }

        self.buf
            .copy_within(self.read_pos..self.write_end + SENTINEL_LEN, 0);
        self.write_end -= self.read_pos;
        self.read_pos = 0;
        self.buf.truncate(self.write_end + SENTINEL_LEN);
    }

    fn reserve(&mut self, extra: usize) {
        if self.read_pos >= self.compact_at {
            self.compact();
        }

        self.buf.resize(self.write_end + extra + SENTINEL_LEN, 0);
    }

    /// Reads up to `chunk` bytes from `reader` into the tail, returning the
    /// number of bytes obtained (0 only at EOF).
    pub(crate) fn fill_from_reader<R: Read>(
        &mut self,
        reader: &mut R,
        chunk: usize,
    ) -> io::Result<usize> {
        self.reserve(chunk);

        let start = self.write_end;
        let end = start + chunk;

        loop {
            match reader.read(&mut self.buf[start..end]) {
                Ok(n) => {
                    self.write_end += n;
                    self.buf.truncate(self.write_end + SENTINEL_LEN);
                    return Ok(n);
                }
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.buf.truncate(self.write_end + SENTINEL_LEN);
                    return Err(err);
                }
            }
        }
    }

    /// Appends a whole chunk to the tail.
    pub(crate) fn push_chunk(&mut self, chunk: &[u8]) {
        self.reserve(chunk.len());

        self.buf[self.write_end..self.write_end + chunk.len()].copy_from_slice(chunk);
        self.write_end += chunk.len();
        self.buf.truncate(self.write_end + SENTINEL_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn assert_sentinel(buffer: &PaddedBuffer) {
        let window = buffer.window();
        let len = buffer.remaining();

        assert!(window.len() >= len + SENTINEL_LEN);
        assert!(window[len..len + SENTINEL_LEN].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_fill_and_advance() -> io::Result<()> {
        let mut reader = Cursor::new(b"hello world".to_vec());
        let mut buffer = PaddedBuffer::with_capacity(4);

        assert_eq!(buffer.remaining(), 0);
        assert_sentinel(&buffer);

        assert_eq!(buffer.fill_from_reader(&mut reader, 4)?, 4);
        assert_eq!(&buffer.window()[..buffer.remaining()], b"hell");
        assert_sentinel(&buffer);

        buffer.advance(2);
        assert_eq!(buffer.position(), 2);
        assert_eq!(&buffer.window()[..buffer.remaining()], b"ll");

        while buffer.fill_from_reader(&mut reader, 4)? > 0 {
            assert_sentinel(&buffer);
        }

        assert_eq!(&buffer.window()[..buffer.remaining()], b"llo world");
        assert_eq!(buffer.position(), 2);

        Ok(())
    }

    #[test]
    fn test_compaction_preserves_unread_bytes() -> io::Result<()> {
        let mut reader = Cursor::new(b"abcdefghijklmnopqrstuvwxyz".repeat(8));
        let mut buffer = PaddedBuffer::with_capacity(16);

        buffer.fill_from_reader(&mut reader, 64)?;
        buffer.advance(40);

        let before = buffer.window()[..buffer.remaining()].to_vec();
        let position = buffer.position();

        // Next fill crosses the compaction threshold.
        buffer.fill_from_reader(&mut reader, 16)?;

        assert_eq!(&buffer.window()[..before.len()], &before[..]);
        assert_eq!(buffer.position(), position);
        assert_sentinel(&buffer);

        Ok(())
    }

    #[test]
    fn test_push_chunk() {
        let mut buffer = PaddedBuffer::with_capacity(8);

        buffer.push_chunk(b"one,");
        buffer.push_chunk(b"two");
        buffer.push_chunk(b"");

        assert_eq!(&buffer.window()[..buffer.remaining()], b"one,two");
        assert_sentinel(&buffer);
    }
}
