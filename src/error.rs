use std::{error, fmt, io, result};

#[derive(Debug)]
pub(crate) enum ErrorKind {
    Io(io::Error),
    UnterminatedQuotedField { pos: u64 },
    MalformedQuotedField { pos: u64 },
    IndexOutOfRange { index: usize, len: usize },
    UnknownColumn { name: Vec<u8> },
}

#[derive(Debug)]
pub struct Error(ErrorKind);

impl Error {
    pub(crate) fn unterminated_quoted_field(pos: u64) -> Self {
        Self(ErrorKind::UnterminatedQuotedField { pos })
    }

    pub(crate) fn malformed_quoted_field(pos: u64) -> Self {
        Self(ErrorKind::MalformedQuotedField { pos })
    }

    pub(crate) fn index_out_of_range(index: usize, len: usize) -> Self {
        Self(ErrorKind::IndexOutOfRange { index, len })
    }

    pub(crate) fn unknown_column(name: &[u8]) -> Self {
        Self(ErrorKind::UnknownColumn {
            name: name.to_vec(),
        })
    }

    /// Returns whether this error comes from the underlying byte source.
    ///
    /// I/O errors are fatal for the stream: the reader will keep returning
    /// them on subsequent calls.
    pub fn is_io(&self) -> bool {
        matches!(self.0, ErrorKind::Io(_))
    }

    /// Absolute byte offset of the offending byte, for parse errors.
    pub fn position(&self) -> Option<u64> {
        match self.0 {
            ErrorKind::UnterminatedQuotedField { pos } | ErrorKind::MalformedQuotedField { pos } => {
                Some(pos)
            }
            _ => None,
        }
    }

    pub(crate) fn io_parts(&self) -> Option<(io::ErrorKind, String)> {
        match &self.0 {
            ErrorKind::Io(err) => Some((err.kind(), err.to_string())),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        Self::new(io::ErrorKind::Other, err)
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.0 {
            ErrorKind::Io(err) => err.fmt(f),
            ErrorKind::UnterminatedQuotedField { pos } => {
                write!(
                    f,
                    "CSV error: quoted field starting at byte {} never closed",
                    pos
                )
            }
            ErrorKind::MalformedQuotedField { pos } => write!(
                f,
                "CSV error: unexpected byte at offset {} after a closing quote",
                pos
            ),
            ErrorKind::IndexOutOfRange { index, len } => write!(
                f,
                "CSV error: column index {} out of range for record with {} fields",
                index, len
            ),
            ErrorKind::UnknownColumn { name } => {
                write!(f, "CSV error: no column named \"{}\"", name.escape_ascii())
            }
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
