use memchr::memchr2;

use crate::cursor::StreamCursor;
use crate::error::{Error, Result};
use crate::records::CellSpan;
use crate::scanner::{ClassScanner, BLOCK};

/// CSV dialect fixed at reader construction.
///
/// `escape == quote` (the default) selects the doubled-quote convention; a
/// distinct byte selects single-byte C-style escaping. When `comment` is
/// set, records whose first byte equals it are skipped wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: u8,
    pub quote: u8,
    pub escape: u8,
    pub comment: Option<u8>,
    pub yield_incomplete_row: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: b'"',
            comment: None,
            yield_incomplete_row: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FieldStart,
    Unquoted,
    Quoted,
    AfterQuoted,
}

pub(crate) enum RowOutcome {
    /// One record was parsed. `end` is the length of the record's bytes
    /// within the window; `consumed` additionally covers the terminator.
    /// Nothing has been advanced yet: spans stay valid until the caller
    /// consumes the record.
    Row {
        end: usize,
        consumed: usize,
        incomplete: bool,
    },
    End,
}

/// The byte-level CSV state machine.
///
/// Holds no cross-record state: every [`Self::read_row`] call parses one
/// complete record from the cursor's current position, refilling on demand.
pub(crate) struct CoreParser {
    delimiter: u8,
    quote: u8,
    escape: u8,
    comment: Option<u8>,
    yield_incomplete_row: bool,
    field_scan: ClassScanner,
    quote_scan: ClassScanner,
}

impl CoreParser {
    pub(crate) fn new(dialect: &Dialect) -> Self {
        debug_assert!(dialect.delimiter != dialect.quote);
        debug_assert!(!matches!(dialect.delimiter, b'\r' | b'\n'));

        let quote_scan = if dialect.escape == dialect.quote {
            ClassScanner::new(&[dialect.quote])
        } else {
            ClassScanner::new(&[dialect.quote, dialect.escape])
        };

        Self {
            delimiter: dialect.delimiter,
            quote: dialect.quote,
            escape: dialect.escape,
            comment: dialect.comment,
            yield_incomplete_row: dialect.yield_incomplete_row,
            field_scan: ClassScanner::new(&[dialect.delimiter, b'\r', b'\n']),
            quote_scan,
        }
    }

    /// Parses the next record into `cells` as spans relative to the
    /// cursor's current read position, which is left untouched.
    pub(crate) fn read_row<C: StreamCursor>(
        &self,
        cursor: &mut C,
        cells: &mut Vec<CellSpan>,
    ) -> Result<RowOutcome> {
        cells.clear();

        let mut pos: usize = 0;
        let mut start: usize = 0;
        let mut escaped = false;
        let mut state = State::FieldStart;

        loop {
            while pos >= cursor.remaining() {
                if !cursor.refill()? {
                    return self.finish_at_eof(cursor, cells, start, state);
                }
            }

            if state == State::FieldStart && pos == 0 && cells.is_empty() {
                if let Some(comment) = self.comment {
                    if cursor.peek()[0] == comment {
                        self.skip_comment_line(cursor)?;
                        continue;
                    }
                }
            }

            let len = cursor.remaining();
            let window = cursor.peek();

            match state {
                State::FieldStart => {
                    escaped = false;

                    if window[pos] == self.quote {
                        pos += 1;
                        start = pos;
                        state = State::Quoted;
                    } else {
                        start = pos;
                        state = State::Unquoted;
                    }
                }
                State::Unquoted => {
                    let k = self.field_scan.scan(&window[pos..pos + BLOCK]);

                    // No hit in this block, or a hit at or past the end of
                    // data (a sentinel artefact): move on and rescan.
                    if k == BLOCK || pos + k >= len {
                        pos = (pos + k).min(len);
                        continue;
                    }

                    pos += k;

                    let byte = window[pos];

                    cells.push(CellSpan::new(start, pos, false));

                    if byte == self.delimiter {
                        pos += 1;
                        state = State::FieldStart;
                    } else {
                        return self.finish_row(cursor, pos);
                    }
                }
                State::Quoted => {
                    let k = self.quote_scan.scan(&window[pos..pos + BLOCK]);

                    if k == BLOCK || pos + k >= len {
                        pos = (pos + k).min(len);
                        continue;
                    }

                    pos += k;

                    let byte = window[pos];

                    if byte == self.escape && self.escape != self.quote {
                        // The escaped byte is consumed unconditionally; if
                        // it lies past the window the next refill provides
                        // it before anything else is inspected.
                        escaped = true;
                        pos += 2;
                    } else if self.escape == self.quote {
                        // Doubled-quote convention: one byte of lookahead
                        // decides between an escape pair and a closing
                        // quote.
                        if pos + 1 >= len {
                            if cursor.refill()? {
                                continue;
                            }

                            cells.push(CellSpan::new(start, pos, escaped));
                            pos += 1;
                            state = State::AfterQuoted;
                            continue;
                        }

                        if window[pos + 1] == self.quote {
                            escaped = true;
                            pos += 2;
                        } else {
                            cells.push(CellSpan::new(start, pos, escaped));
                            pos += 1;
                            state = State::AfterQuoted;
                        }
                    } else {
                        cells.push(CellSpan::new(start, pos, escaped));
                        pos += 1;
                        state = State::AfterQuoted;
                    }
                }
                State::AfterQuoted => {
                    let byte = window[pos];

                    if byte == self.delimiter {
                        pos += 1;
                        state = State::FieldStart;
                    } else if byte == b'\r' || byte == b'\n' {
                        return self.finish_row(cursor, pos);
                    } else {
                        let at = cursor.position() + pos as u64;
                        cursor.advance(pos);
                        return Err(Error::malformed_quoted_field(at));
                    }
                }
            }
        }
    }

    /// Consumes exactly one record boundary: `LF`, `CR`, `CR LF` or
    /// `LF CR`, looking one byte ahead across refills for the pair forms.
    fn finish_row<C: StreamCursor>(&self, cursor: &mut C, nl_pos: usize) -> Result<RowOutcome> {
        let first = cursor.peek()[nl_pos];
        let mut consumed = nl_pos + 1;

        while consumed >= cursor.remaining() {
            if !cursor.refill()? {
                return Ok(RowOutcome::Row {
                    end: nl_pos,
                    consumed,
                    incomplete: false,
                });
            }
        }

        let second = cursor.peek()[consumed];

        if (first == b'\n' && second == b'\r') || (first == b'\r' && second == b'\n') {
            consumed += 1;
        }

        Ok(RowOutcome::Row {
            end: nl_pos,
            consumed,
            incomplete: false,
        })
    }

    fn finish_at_eof<C: StreamCursor>(
        &self,
        cursor: &mut C,
        cells: &mut Vec<CellSpan>,
        start: usize,
        state: State,
    ) -> Result<RowOutcome> {
        let len = cursor.remaining();

        match state {
            State::FieldStart => {
                if cells.is_empty() {
                    cursor.advance(len);
                    return Ok(RowOutcome::End);
                }

                // A trailing delimiter leaves one last empty field.
                cells.push(CellSpan::new(len, len, false));
            }
            State::Unquoted => {
                let all_blank = cells.is_empty()
                    && cursor.peek()[start..len].iter().all(u8::is_ascii_whitespace);

                if all_blank {
                    cursor.advance(len);
                    return Ok(RowOutcome::End);
                }

                cells.push(CellSpan::new(start, len, false));
            }
            State::Quoted => {
                if !self.yield_incomplete_row {
                    let at = cursor.position() + start as u64 - 1;
                    cursor.advance(len);
                    return Err(Error::unterminated_quoted_field(at));
                }

                cells.push(CellSpan::new(start, len, true));

                return Ok(RowOutcome::Row {
                    end: len,
                    consumed: len,
                    incomplete: true,
                });
            }
            State::AfterQuoted => {}
        }

        Ok(RowOutcome::Row {
            end: len,
            consumed: len,
            incomplete: false,
        })
    }

    /// Skips a comment line through its terminator. Comment lines never
    /// contribute cells, so plain `memchr` beats the block scanner here.
    fn skip_comment_line<C: StreamCursor>(&self, cursor: &mut C) -> Result<()> {
        loop {
            let len = cursor.remaining();
            let window = cursor.peek();

            match memchr2(b'\r', b'\n', &window[..len]) {
                Some(at) => {
                    let first = window[at];

                    cursor.advance(at + 1);

                    while cursor.remaining() == 0 {
                        if !cursor.refill()? {
                            return Ok(());
                        }
                    }

                    let second = cursor.peek()[0];

                    if (first == b'\r' && second == b'\n') || (first == b'\n' && second == b'\r') {
                        cursor.advance(1);
                    }

                    return Ok(());
                }
                None => {
                    cursor.advance(len);

                    if !cursor.refill()? {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cursor::MappedCursor;
    use crate::rowvec;

    fn parse(data: &[u8], dialect: Dialect) -> Result<Vec<Vec<Vec<u8>>>> {
        let parser = CoreParser::new(&dialect);
        let mut cursor = MappedCursor::from_vec(data.to_vec());
        let mut cells: Vec<CellSpan> = Vec::new();
        let mut rows = Vec::new();

        loop {
            match parser.read_row(&mut cursor, &mut cells)? {
                RowOutcome::End => return Ok(rows),
                RowOutcome::Row { end, consumed, .. } => {
                    let window = &cursor.peek()[..end];

                    rows.push(
                        cells
                            .iter()
                            .map(|span| window[span.range()].to_vec())
                            .collect(),
                    );

                    cursor.advance(consumed);
                }
            }
        }
    }

    #[test]
    fn test_state_machine_spans() -> Result<()> {
        let rows = parse(b"a,b,c\n1,2,3\n", Dialect::default())?;

        assert_eq!(
            rows,
            vec![rowvec!["a", "b", "c"], rowvec!["1", "2", "3"]]
        );

        Ok(())
    }

    #[test]
    fn test_quoted_spans_exclude_quotes() -> Result<()> {
        // Raw spans keep inner escapes but never the surrounding quotes.
        let rows = parse(b"\"a,b\",\"c\"\"d\"\n", Dialect::default())?;

        assert_eq!(rows, vec![rowvec!["a,b", "c\"\"d"]]);

        Ok(())
    }

    #[test]
    fn test_long_unquoted_run_crosses_blocks() -> Result<()> {
        // A cell longer than several scanner blocks.
        let long = "x".repeat(100);
        let data = format!("{},y\n", long);

        let rows = parse(data.as_bytes(), Dialect::default())?;

        assert_eq!(rows, vec![rowvec![long.as_str(), "y"]]);

        Ok(())
    }

    #[test]
    fn test_malformed_after_quote_position() {
        let err = parse(b"ok,fine\n\"cell\"junk\n", Dialect::default()).unwrap_err();

        // The offending byte is the `j` right after the closing quote.
        assert_eq!(err.position(), Some(14));
    }

    #[test]
    fn test_unterminated_position() {
        let err = parse(b"ab,\"open\n", Dialect::default()).unwrap_err();

        assert_eq!(err.position(), Some(3));
    }
}
