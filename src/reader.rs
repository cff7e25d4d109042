use std::io::{self, Read};
use std::mem;
use std::path::Path;

use crate::core::{CoreParser, Dialect, RowOutcome};
use crate::cursor::{BufferedCursor, MappedCursor, StreamCursor};
use crate::error::{self, Error};
use crate::records::{CellSpan, HeaderMap, RowView};
use crate::utils::{trim_bom, unescape};

/// How the first record of the stream is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// The first record names the columns and is not emitted as data.
    HasHeader,
    /// Every record is data; lookups by name fail with `UnknownColumn`.
    NoHeader,
    /// Caller-supplied column names; every record is data.
    Provided(Vec<Vec<u8>>),
}

/// Builds a [`Reader`] with given configuration.
#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    dialect: Dialect,
    header_policy: HeaderPolicy,
    buffer_capacity: Option<usize>,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            header_policy: HeaderPolicy::HasHeader,
            buffer_capacity: None,
        }
    }
}

impl ReaderBuilder {
    /// Create a new [`ReaderBuilder`] with default configuration: comma
    /// delimiter, doubled-quote escaping, first record read as a header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new [`ReaderBuilder`] with provided buffer `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut builder = Self::default();
        builder.buffer_capacity(capacity);
        builder
    }

    /// Replace the whole dialect at once.
    pub fn dialect(&mut self, dialect: Dialect) -> &mut Self {
        self.dialect = dialect;
        self
    }

    /// Set the delimiter to be used by the created [`Reader`].
    ///
    /// This delimiter must be a single byte.
    ///
    /// Will default to a comma.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.dialect.delimiter = delimiter;
        self
    }

    /// Set the quote char to be used by the created [`Reader`].
    ///
    /// This char must be a single byte.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.dialect.quote = quote;
        self
    }

    /// Set the escape byte. Equal to the quote by default, which selects
    /// the doubled-quote convention; any distinct byte selects single-byte
    /// C-style escaping.
    pub fn escape(&mut self, escape: u8) -> &mut Self {
        self.dialect.escape = escape;
        self
    }

    /// Skip records whose first byte equals `comment`.
    pub fn comment(&mut self, comment: u8) -> &mut Self {
        self.dialect.comment = Some(comment);
        self
    }

    /// Emit a flagged partial record instead of erroring when the stream
    /// ends inside a quoted field.
    ///
    /// Will default to `false`.
    pub fn yield_incomplete_row(&mut self, yes: bool) -> &mut Self {
        self.dialect.yield_incomplete_row = yes;
        self
    }

    /// Set the header policy of the created [`Reader`].
    pub fn header_policy(&mut self, policy: HeaderPolicy) -> &mut Self {
        self.header_policy = policy;
        self
    }

    /// Indicate whether first record must be understood as a header.
    ///
    /// Will default to `true`.
    pub fn has_headers(&mut self, yes: bool) -> &mut Self {
        self.header_policy = if yes {
            HeaderPolicy::HasHeader
        } else {
            HeaderPolicy::NoHeader
        };
        self
    }

    /// Provide column names explicitly; every record is then data.
    pub fn provided_names<I>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        self.header_policy = HeaderPolicy::Provided(
            names
                .into_iter()
                .map(|name| name.as_ref().to_vec())
                .collect(),
        );
        self
    }

    /// Set the capacity of the buffered cursor created by
    /// [`Self::from_reader`].
    pub fn buffer_capacity(&mut self, capacity: usize) -> &mut Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Create a new [`Reader`] over any [`StreamCursor`].
    pub fn from_cursor<C: StreamCursor>(&self, cursor: C) -> Reader<C> {
        Reader {
            cursor,
            core: CoreParser::new(&self.dialect),
            dialect: self.dialect,
            cells: Vec::new(),
            headers: None,
            policy: self.header_policy.clone(),
            has_read: false,
            pending_advance: 0,
            rows_read: 0,
            sticky: None,
        }
    }

    /// Create a new [`Reader`] over a [`BufferedCursor`] wrapping the
    /// provided reader implementing [`std::io::Read`].
    pub fn from_reader<R: Read>(&self, reader: R) -> Reader<BufferedCursor<R>> {
        let cursor = match self.buffer_capacity {
            None => BufferedCursor::new(reader),
            Some(capacity) => BufferedCursor::with_capacity(capacity, reader),
        };

        self.from_cursor(cursor)
    }

    /// Create a new [`Reader`] over a memory-mapped file.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> error::Result<Reader<MappedCursor>> {
        Ok(self.from_cursor(MappedCursor::open(path)?))
    }

    /// Create a new [`Reader`] over bytes already in memory.
    pub fn from_bytes(&self, bytes: Vec<u8>) -> Reader<MappedCursor> {
        self.from_cursor(MappedCursor::from_vec(bytes))
    }
}

/// An already configured streaming CSV reader emitting borrowed row views.
///
/// Each [`Self::next_row`] call tokenizes one record and returns a
/// [`RowView`] aliasing the cursor's buffer; the view lives until the next
/// call on the reader.
pub struct Reader<C> {
    cursor: C,
    core: CoreParser,
    dialect: Dialect,
    cells: Vec<CellSpan>,
    headers: Option<HeaderMap>,
    policy: HeaderPolicy,
    has_read: bool,
    pending_advance: usize,
    rows_read: u64,
    sticky: Option<(io::ErrorKind, String)>,
}

impl<C: StreamCursor> Reader<C> {
    /// Create a new [`Reader`] with default configuration.
    pub fn from_cursor(cursor: C) -> Self {
        ReaderBuilder::new().from_cursor(cursor)
    }

    fn guard<T>(&mut self, result: error::Result<T>) -> error::Result<T> {
        if let Err(err) = &result {
            if let Some(parts) = err.io_parts() {
                self.sticky = Some(parts);
            }
        }

        result
    }

    fn on_first_read(&mut self) -> error::Result<()> {
        if self.has_read {
            return Ok(());
        }

        self.has_read = true;

        // Trimming BOM
        while self.cursor.remaining() < 3 {
            if !self.cursor.refill()? {
                break;
            }
        }

        let bom_len = trim_bom(&self.cursor.peek()[..self.cursor.remaining()]);

        if bom_len > 0 {
            self.cursor.advance(bom_len);
        }

        match mem::replace(&mut self.policy, HeaderPolicy::NoHeader) {
            HeaderPolicy::NoHeader => {}
            HeaderPolicy::Provided(names) => {
                self.headers = Some(HeaderMap::from_names(names));
            }
            HeaderPolicy::HasHeader => {
                match self.core.read_row(&mut self.cursor, &mut self.cells)? {
                    RowOutcome::End => {
                        self.headers = Some(HeaderMap::default());
                    }
                    RowOutcome::Row { end, consumed, .. } => {
                        let window = &self.cursor.peek()[..end];

                        let names = self
                            .cells
                            .iter()
                            .map(|span| {
                                let raw = &window[span.range()];

                                if span.escaped() {
                                    unescape(raw, self.dialect.quote, self.dialect.escape)
                                        .into_owned()
                                } else {
                                    raw.to_vec()
                                }
                            })
                            .collect();

                        self.headers = Some(HeaderMap::from_names(names));
                        self.cursor.advance(consumed);
                    }
                }
            }
        }

        Ok(())
    }

    /// Header map of this reader, reading the first record if required.
    ///
    /// `Ok(None)` when the reader was configured without headers.
    pub fn headers(&mut self) -> error::Result<Option<&HeaderMap>> {
        let first = self.on_first_read();
        self.guard(first)?;

        Ok(self.headers.as_ref())
    }

    /// Tokenizes the next record, or returns `Ok(None)` at end of stream.
    ///
    /// I/O errors are sticky: once one is returned, every subsequent call
    /// returns it again. Parse errors are not: the cursor is left at the
    /// offending byte and a resync helper may skip past it.
    pub fn next_row(&mut self) -> error::Result<Option<RowView<'_>>> {
        if let Some((kind, message)) = &self.sticky {
            return Err(Error::from(io::Error::new(*kind, message.clone())));
        }

        let first = self.on_first_read();
        self.guard(first)?;

        let pending = mem::take(&mut self.pending_advance);

        if pending > 0 {
            self.cursor.advance(pending);
        }

        let outcome = self.core.read_row(&mut self.cursor, &mut self.cells);

        match self.guard(outcome)? {
            RowOutcome::End => Ok(None),
            RowOutcome::Row {
                end,
                consumed,
                incomplete,
            } => {
                self.pending_advance = consumed;
                self.rows_read += 1;

                Ok(Some(RowView::new(
                    &self.cursor.peek()[..end],
                    &self.cells,
                    self.headers.as_ref(),
                    self.dialect.quote,
                    self.dialect.escape,
                    incomplete,
                )))
            }
        }
    }

    /// Absolute byte offset at which the next record starts.
    #[inline]
    pub fn position(&self) -> u64 {
        self.cursor.position() + self.pending_advance as u64
    }

    /// Number of records emitted so far, headers excluded.
    #[inline]
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Unwrap into the underlying cursor, positioned after the last record
    /// returned.
    pub fn into_cursor(mut self) -> C {
        let pending = mem::take(&mut self.pending_advance);

        if pending > 0 {
            self.cursor.advance(pending);
        }

        self.cursor
    }
}
