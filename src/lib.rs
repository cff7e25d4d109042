mod buffer;
mod core;
mod cursor;
mod debug;
mod error;
mod reader;
mod records;
mod scanner;
mod utils;

pub use crate::core::Dialect;
pub use cursor::{
    open_buffered, open_buffered_with_capacity, open_iter, open_mapped, BufferedCursor,
    IterCursor, MappedCursor, StreamCursor, SENTINEL_LEN,
};
pub use error::{Error, Result};
pub use reader::{HeaderPolicy, Reader, ReaderBuilder};
pub use records::{CellView, CellsIter, HeaderMap, RowView};
pub use scanner::{ClassScanner, BLOCK};
pub use utils::{parse_double, skip_to_record_boundary, unescape, unescape_to};
