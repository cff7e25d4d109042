use std::borrow::Cow;

use memchr::{memchr, memchr3};

use crate::cursor::StreamCursor;
use crate::error::Result;

#[inline(always)]
pub(crate) fn trim_bom(slice: &[u8]) -> usize {
    if slice.len() >= 3 && &slice[..3] == b"\xef\xbb\xbf" {
        3
    } else {
        0
    }
}

/// Unescape the inner bytes of a quoted CSV cell.
///
/// With the doubled-quote convention (`escape == quote`), every doubled
/// quote collapses to a single one. With a distinct escape byte, every
/// escape byte is dropped and the byte following it is copied verbatim.
///
/// Returns a [`Cow::Borrowed`] if nothing needed unescaping, and a
/// [`Cow::Owned`] if something was actually unescaped.
///
/// This function will therefore not allocate if this is not actually
/// required.
pub fn unescape(cell: &[u8], quote: u8, escape: u8) -> Cow<[u8]> {
    if escape == quote {
        unescape_doubled(cell, quote)
    } else {
        unescape_dropped(cell, escape)
    }
}

/// Same as [`unescape`], appending into caller-supplied scratch instead of
/// allocating.
pub fn unescape_to(cell: &[u8], quote: u8, escape: u8, out: &mut Vec<u8>) {
    if escape == quote {
        unescape_doubled_to(cell, quote, out);
    } else {
        unescape_dropped_to(cell, escape, out);
    }
}

fn unescape_doubled(cell: &[u8], quote: u8) -> Cow<[u8]> {
    let len = cell.len();
    let mut output = Vec::new();

    let mut pos: usize = 0;

    while pos < len {
        if let Some(offset) = memchr(quote, &cell[pos..]) {
            if output.is_empty() {
                output.reserve_exact(len);
            }

            let limit = pos + offset + 1;

            output.extend_from_slice(&cell[pos..limit]);

            if limit < len && cell[limit] == quote {
                pos = limit + 1;
            } else {
                pos = limit;
                break;
            }
        } else {
            break;
        }
    }

    if output.is_empty() {
        Cow::Borrowed(cell)
    } else {
        output.extend_from_slice(&cell[pos..]);
        Cow::Owned(output)
    }
}

fn unescape_doubled_to(cell: &[u8], quote: u8, out: &mut Vec<u8>) {
    let len = cell.len();
    let mut pos: usize = 0;

    while pos < len {
        if let Some(offset) = memchr(quote, &cell[pos..]) {
            let limit = pos + offset + 1;

            out.extend_from_slice(&cell[pos..limit]);

            if limit < len && cell[limit] == quote {
                pos = limit + 1;
            } else {
                pos = limit;
                break;
            }
        } else {
            break;
        }
    }

    out.extend_from_slice(&cell[pos..]);
}

fn unescape_dropped(cell: &[u8], escape: u8) -> Cow<[u8]> {
    match memchr(escape, cell) {
        None => Cow::Borrowed(cell),
        Some(_) => {
            let mut output = Vec::with_capacity(cell.len());
            unescape_dropped_to(cell, escape, &mut output);
            Cow::Owned(output)
        }
    }
}

fn unescape_dropped_to(cell: &[u8], escape: u8, out: &mut Vec<u8>) {
    let len = cell.len();
    let mut pos: usize = 0;

    while pos < len {
        match memchr(escape, &cell[pos..]) {
            Some(offset) => {
                let hit = pos + offset;

                out.extend_from_slice(&cell[pos..hit]);

                // An escape as the very last byte has nothing to protect
                // and is dropped.
                if hit + 1 < len {
                    out.push(cell[hit + 1]);
                }

                pos = hit + 2;
            }
            None => {
                out.extend_from_slice(&cell[pos..]);
                return;
            }
        }
    }
}

/// Parses a signed decimal number with optional fraction and exponent,
/// ignoring surrounding ASCII whitespace.
///
/// Returns [`f64::NAN`] when the bytes do not hold such a number; never
/// panics. Spellings like `inf` or `nan` are rejected.
pub fn parse_double(bytes: &[u8]) -> f64 {
    let trimmed = bytes.trim_ascii();

    if !is_decimal(trimmed) {
        return f64::NAN;
    }

    // is_decimal only accepts ASCII, so the utf8 conversion cannot fail.
    std::str::from_utf8(trimmed)
        .ok()
        .and_then(|text| text.parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn is_decimal(s: &[u8]) -> bool {
    let len = s.len();
    let mut i: usize = 0;

    if i < len && (s[i] == b'+' || s[i] == b'-') {
        i += 1;
    }

    let mut mantissa_digits: usize = 0;

    while i < len && s[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }

    if i < len && s[i] == b'.' {
        i += 1;

        while i < len && s[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }

    if mantissa_digits == 0 {
        return false;
    }

    if i < len && (s[i] == b'e' || s[i] == b'E') {
        i += 1;

        if i < len && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }

        let mut exponent_digits: usize = 0;

        while i < len && s[i].is_ascii_digit() {
            i += 1;
            exponent_digits += 1;
        }

        if exponent_digits == 0 {
            return false;
        }
    }

    i == len
}

/// Skips bytes up to and including the next record terminator lying outside
/// quotes, counting quote parity from the current position.
///
/// Returns `false` when end of stream is reached before a terminator was
/// found. This is a best-effort resynchronization helper for use after a
/// parse error; it is not part of the state machine and makes no attempt at
/// validating what it skips.
pub fn skip_to_record_boundary<C: StreamCursor>(cursor: &mut C, quote: u8) -> Result<bool> {
    let mut in_quotes = false;

    loop {
        let mut terminator = None;
        let len = cursor.remaining();

        {
            let window = &cursor.peek()[..len];
            let mut pos: usize = 0;

            while let Some(offset) = memchr3(quote, b'\r', b'\n', &window[pos..]) {
                let at = pos + offset;
                let byte = window[at];

                if byte == quote {
                    in_quotes = !in_quotes;
                } else if !in_quotes {
                    terminator = Some((at, byte));
                    break;
                }

                pos = at + 1;
            }
        }

        match terminator {
            Some((at, first)) => {
                cursor.advance(at + 1);
                consume_paired_terminator(cursor, first)?;
                return Ok(true);
            }
            None => {
                cursor.advance(len);

                if !cursor.refill()? {
                    return Ok(false);
                }
            }
        }
    }
}

fn consume_paired_terminator<C: StreamCursor>(cursor: &mut C, first: u8) -> Result<()> {
    while cursor.remaining() == 0 {
        if !cursor.refill()? {
            return Ok(());
        }
    }

    let second = cursor.peek()[0];

    if (first == b'\r' && second == b'\n') || (first == b'\n' && second == b'\r') {
        cursor.advance(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::cursor::{open_iter, MappedCursor};

    #[test]
    fn test_unescape_doubled() {
        assert_eq!(unescape(b"test", b'"', b'"'), Cow::Borrowed(b"test"));
        assert_eq!(
            unescape(b"\"\"hello\"\"", b'"', b'"'),
            Cow::<[u8]>::Owned(b"\"hello\"".to_vec())
        );
        assert_eq!(
            unescape(b"this is \"\"hello\"\" then?", b'"', b'"'),
            Cow::<[u8]>::Owned(b"this is \"hello\" then?".to_vec())
        );

        // It should remain safe with incomplete/invalid data
        assert_eq!(
            unescape(b"goettigen\"\"", b'"', b'"'),
            Cow::<[u8]>::Owned(b"goettigen\"".to_vec())
        );
        assert_eq!(
            unescape(b"goettigen\"", b'"', b'"'),
            Cow::<[u8]>::Owned(b"goettigen\"".to_vec())
        );
        assert_eq!(
            unescape(b"goettigen\"whatever", b'"', b'"'),
            Cow::<[u8]>::Owned(b"goettigen\"whatever".to_vec())
        );
    }

    #[test]
    fn test_unescape_doubled_runs() {
        // 2k doubled quotes must collapse to k.
        for k in 1usize..5 {
            let raw = b"\"".repeat(2 * k);
            let expected = b"\"".repeat(k);

            assert_eq!(unescape(&raw, b'"', b'"').as_ref(), &expected[..]);
        }
    }

    #[test]
    fn test_unescape_dropped() {
        assert_eq!(unescape(b"test", b'"', b'\\'), Cow::Borrowed(b"test"));
        assert_eq!(
            unescape(b"say \\\"hi\\\"", b'"', b'\\'),
            Cow::<[u8]>::Owned(b"say \"hi\"".to_vec())
        );
        assert_eq!(
            unescape(b"a\\\\b", b'"', b'\\'),
            Cow::<[u8]>::Owned(b"a\\b".to_vec())
        );

        // Trailing escape with nothing to protect.
        assert_eq!(
            unescape(b"dangling\\", b'"', b'\\'),
            Cow::<[u8]>::Owned(b"dangling".to_vec())
        );
    }

    #[test]
    fn test_unescape_to() {
        let mut scratch = Vec::new();

        unescape_to(b"test", b'"', b'"', &mut scratch);
        assert_eq!(scratch, b"test");

        scratch.clear();
        unescape_to(b"this is \"\"hello\"\" then?", b'"', b'"', &mut scratch);
        assert_eq!(scratch, b"this is \"hello\" then?");

        scratch.clear();
        unescape_to(b"say \\\"hi\\\"", b'"', b'\\', &mut scratch);
        assert_eq!(scratch, b"say \"hi\"");

        scratch.clear();
        unescape_to(b"goettigen\"", b'"', b'"', &mut scratch);
        assert_eq!(scratch, b"goettigen\"");
    }

    #[test]
    fn test_parse_double() {
        assert_eq!(parse_double(b"1"), 1.0);
        assert_eq!(parse_double(b"-12.5"), -12.5);
        assert_eq!(parse_double(b"+0.5"), 0.5);
        assert_eq!(parse_double(b"  42 "), 42.0);
        assert_eq!(parse_double(b"6.02e23"), 6.02e23);
        assert_eq!(parse_double(b"-1E-9"), -1e-9);
        assert_eq!(parse_double(b"12."), 12.0);
        assert_eq!(parse_double(b".5"), 0.5);

        assert!(parse_double(b"").is_nan());
        assert!(parse_double(b"   ").is_nan());
        assert!(parse_double(b"abc").is_nan());
        assert!(parse_double(b"12a").is_nan());
        assert!(parse_double(b"1e").is_nan());
        assert!(parse_double(b"1e+").is_nan());
        assert!(parse_double(b".").is_nan());
        assert!(parse_double(b"+").is_nan());
        assert!(parse_double(b"inf").is_nan());
        assert!(parse_double(b"nan").is_nan());
        assert!(parse_double(b"0x10").is_nan());
        assert!(parse_double(b"1 2").is_nan());
    }

    #[test]
    fn test_skip_to_record_boundary() -> Result<()> {
        let mut cursor = MappedCursor::from_vec(b"broken \"cell\nstill quoted\" end\nnext".to_vec());

        assert!(skip_to_record_boundary(&mut cursor, b'"')?);
        assert_eq!(&cursor.peek()[..cursor.remaining()], b"next");

        assert!(!skip_to_record_boundary(&mut cursor, b'"')?);
        assert_eq!(cursor.remaining(), 0);

        Ok(())
    }

    #[test]
    fn test_skip_to_record_boundary_crlf_across_chunks() -> Result<()> {
        let chunks: Vec<&[u8]> = vec![b"garbage\r", b"\nnext"];
        let mut cursor = open_iter(chunks);

        assert!(skip_to_record_boundary(&mut cursor, b'"')?);
        assert_eq!(&cursor.peek()[..cursor.remaining()], b"next");

        Ok(())
    }
}
