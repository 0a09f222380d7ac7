//! Buffers and the read/write cursor over them.

pub mod cursor;

pub use cursor::BufCursor;
