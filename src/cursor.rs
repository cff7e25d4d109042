use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use crate::buffer::PaddedBuffer;

/// Readable padding guaranteed past the last data byte of every cursor
/// window, sized for one scanner block.
pub const SENTINEL_LEN: usize = 16;

const DEFAULT_BUFFER_CAPACITY: usize = 256 * 1024;

/// Source of contiguous byte windows feeding the parser.
///
/// Implementations must keep the unread bytes stable across calls that
/// neither advance nor refill, and must expose at least [`SENTINEL_LEN`]
/// readable bytes past the last data byte. The sentinel bytes carry no
/// meaning: the parser discards any scanner hit landing in them.
pub trait StreamCursor {
    /// The unread window. The first [`StreamCursor::remaining`] bytes are
    /// data, followed by at least [`SENTINEL_LEN`] readable padding bytes.
    fn peek(&self) -> &[u8];

    /// Number of unread data bytes in the current window.
    fn remaining(&self) -> usize;

    /// Consumes `n` bytes. `n` must not exceed [`StreamCursor::remaining`].
    fn advance(&mut self, n: usize);

    /// Attempts to extend the window, returning `false` only at end of
    /// stream. The sentinel tail is re-established after every refill.
    fn refill(&mut self) -> io::Result<bool>;

    /// Absolute byte offset consumed so far.
    fn position(&self) -> u64;
}

enum MapInner {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Cursor over a whole memory-mapped file, or over an owned buffer.
///
/// `refill` is a no-op: the entire stream is visible from the start.
pub struct MappedCursor {
    inner: MapInner,
    data_len: usize,
    read_pos: usize,
}

// Smallest page size among supported targets. Real pages are a multiple of
// this, which only increases the zero-filled slack past EOF, so the slack
// check below stays valid everywhere.
const MIN_PAGE_SIZE: usize = 4096;

impl MappedCursor {
    /// Memory-maps `path`.
    ///
    /// When the file's last page holds at least [`SENTINEL_LEN`] bytes of
    /// zero-filled slack past EOF, the mapping is extended into that slack
    /// to obtain the sentinel tail without copying. Otherwise the file is
    /// read into an owned padded buffer.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len() as usize;

        let tail = len % MIN_PAGE_SIZE;

        if tail != 0 && MIN_PAGE_SIZE - tail >= SENTINEL_LEN {
            let mmap = unsafe { MmapOptions::new().len(len + SENTINEL_LEN).map(&file)? };

            return Ok(Self {
                inner: MapInner::Mapped(mmap),
                data_len: len,
                read_pos: 0,
            });
        }

        let mut bytes = Vec::with_capacity(len + SENTINEL_LEN);
        file.read_to_end(&mut bytes)?;

        Ok(Self::from_vec(bytes))
    }

    /// Wraps an in-memory buffer, for parsing data already fully loaded.
    pub fn from_vec(mut bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        bytes.resize(len + SENTINEL_LEN, 0);

        Self {
            inner: MapInner::Owned(bytes),
            data_len: len,
            read_pos: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        match &self.inner {
            MapInner::Mapped(mmap) => mmap,
            MapInner::Owned(bytes) => bytes,
        }
    }
}

impl StreamCursor for MappedCursor {
    #[inline(always)]
    fn peek(&self) -> &[u8] {
        &self.bytes()[self.read_pos..]
    }

    #[inline(always)]
    fn remaining(&self) -> usize {
        self.data_len - self.read_pos
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.read_pos += n;
    }

    #[inline(always)]
    fn refill(&mut self) -> io::Result<bool> {
        Ok(false)
    }

    #[inline(always)]
    fn position(&self) -> u64 {
        self.read_pos as u64
    }
}

/// Cursor reading from any [`Read`] source in fixed-size chunks.
pub struct BufferedCursor<R> {
    reader: R,
    buffer: PaddedBuffer,
    chunk_size: usize,
    eof: bool,
}

impl<R: Read> BufferedCursor<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY, reader)
    }

    pub fn with_capacity(capacity: usize, reader: R) -> Self {
        let capacity = capacity.max(1);

        Self {
            reader,
            buffer: PaddedBuffer::with_capacity(capacity),
            chunk_size: capacity,
            eof: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> StreamCursor for BufferedCursor<R> {
    #[inline(always)]
    fn peek(&self) -> &[u8] {
        self.buffer.window()
    }

    #[inline(always)]
    fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.buffer.advance(n);
    }

    fn refill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }

        let n = self
            .buffer
            .fill_from_reader(&mut self.reader, self.chunk_size)?;

        if n == 0 {
            self.eof = true;
            return Ok(false);
        }

        Ok(true)
    }

    #[inline(always)]
    fn position(&self) -> u64 {
        self.buffer.position()
    }
}

/// Cursor consuming arbitrarily-sized chunks from an external supplier.
pub struct IterCursor<I> {
    chunks: I,
    buffer: PaddedBuffer,
    eof: bool,
}

impl<I> IterCursor<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    pub fn new(chunks: I) -> Self {
        Self {
            chunks,
            buffer: PaddedBuffer::with_capacity(DEFAULT_BUFFER_CAPACITY),
            eof: false,
        }
    }
}

impl<I> StreamCursor for IterCursor<I>
where
    I: Iterator,
    I::Item: AsRef<[u8]>,
{
    #[inline(always)]
    fn peek(&self) -> &[u8] {
        self.buffer.window()
    }

    #[inline(always)]
    fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    #[inline]
    fn advance(&mut self, n: usize) {
        self.buffer.advance(n);
    }

    fn refill(&mut self) -> io::Result<bool> {
        if self.eof {
            return Ok(false);
        }

        loop {
            match self.chunks.next() {
                None => {
                    self.eof = true;
                    return Ok(false);
                }
                Some(chunk) => {
                    let chunk = chunk.as_ref();

                    if chunk.is_empty() {
                        continue;
                    }

                    self.buffer.push_chunk(chunk);
                    return Ok(true);
                }
            }
        }
    }

    #[inline(always)]
    fn position(&self) -> u64 {
        self.buffer.position()
    }
}

/// Memory-maps `path` into a [`MappedCursor`].
pub fn open_mapped<P: AsRef<Path>>(path: P) -> io::Result<MappedCursor> {
    MappedCursor::open(path)
}

/// Wraps any [`Read`] source into a [`BufferedCursor`] with the default
/// 256 KiB chunk size.
pub fn open_buffered<R: Read>(reader: R) -> BufferedCursor<R> {
    BufferedCursor::new(reader)
}

/// Same as [`open_buffered`] with an explicit chunk size.
pub fn open_buffered_with_capacity<R: Read>(capacity: usize, reader: R) -> BufferedCursor<R> {
    BufferedCursor::with_capacity(capacity, reader)
}

/// Wraps a chunk supplier into an [`IterCursor`].
pub fn open_iter<I>(chunks: I) -> IterCursor<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    IterCursor::new(chunks.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    fn drain<C: StreamCursor>(cursor: &mut C) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();

        loop {
            let len = cursor.remaining();

            if len > 0 {
                out.extend_from_slice(&cursor.peek()[..len]);
                cursor.advance(len);
            }

            if !cursor.refill()? {
                return Ok(out);
            }
        }
    }

    fn assert_sentinel<C: StreamCursor>(cursor: &C) {
        let len = cursor.remaining();
        let window = cursor.peek();

        assert!(window.len() >= len + SENTINEL_LEN);
        assert!(window[len..len + SENTINEL_LEN].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_buffered_cursor() -> io::Result<()> {
        let data = b"name,surname,age\nlucy,rose,67\n".to_vec();

        for capacity in [1usize, 2, 3, 7, 1024] {
            let mut cursor = BufferedCursor::with_capacity(capacity, Cursor::new(data.clone()));

            assert_eq!(cursor.remaining(), 0);
            assert!(cursor.refill()?);
            assert_sentinel(&cursor);

            assert_eq!(drain(&mut cursor)?, data);
            assert_eq!(cursor.position(), data.len() as u64);

            // EOF is final.
            assert!(!cursor.refill()?);
        }

        Ok(())
    }

    #[test]
    fn test_iter_cursor() -> io::Result<()> {
        let chunks: Vec<&[u8]> = vec![b"na", b"", b"me,sur", b"name\n", b"", b"rest"];

        let mut cursor = open_iter(chunks);

        assert_eq!(drain(&mut cursor)?, b"name,surname\nrest");
        assert!(!cursor.refill()?);

        Ok(())
    }

    #[test]
    fn test_mapped_cursor_from_vec() -> io::Result<()> {
        let mut cursor = MappedCursor::from_vec(b"a,b\nc,d".to_vec());

        assert_sentinel(&cursor);
        assert!(!cursor.refill()?);
        assert_eq!(cursor.remaining(), 7);

        cursor.advance(4);
        assert_eq!(cursor.position(), 4);
        assert_eq!(&cursor.peek()[..cursor.remaining()], b"c,d");
        assert_sentinel(&cursor);

        Ok(())
    }

    #[test]
    fn test_mapped_cursor_open() -> io::Result<()> {
        let dir = std::env::temp_dir();

        // One length with in-page slack, one exactly at a page boundary to
        // exercise the padded-copy fallback, one empty.
        for (name, len) in [("slack", 1000usize), ("aligned", 4096), ("empty", 0)] {
            let path = dir.join(format!("spancsv-cursor-{}-{}.csv", std::process::id(), name));
            let data = b"0123456789abcdef".repeat(256)[..len].to_vec();

            std::fs::write(&path, &data)?;

            let mut cursor = MappedCursor::open(&path)?;

            assert_sentinel(&cursor);
            assert_eq!(drain(&mut cursor)?, data);

            std::fs::remove_file(&path)?;
        }

        Ok(())
    }
}
