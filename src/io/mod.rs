//! Byte streams for file-backed traces.
//!
//! ## Compression Support
//!
//! Gzip input is detected from its magic bytes, so `trace.erf` and
//! `trace.erf.gz` open the same way. Output is compressed when a non-zero
//! compression level is requested.

mod decompress;
mod stream;

pub use decompress::{read_full, Compression, DecompressReader};
pub use stream::{FileFlags, TraceInput, TraceOutput, STDIO_PATH};
