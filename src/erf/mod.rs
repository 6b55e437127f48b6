//! ERF (Extended Record Format) traces.
//!
//! - [`record`] - the 16-byte record header and its length rules
//! - [`linktype`] - link types, padding and the demotion chain
//! - [`index`] - the `<trace>.idx` timestamp index
//! - [`ErfInput`] / [`ErfOutput`] - file backends

pub mod index;
mod input;
pub mod linktype;
mod output;
pub mod record;

pub use index::{build_index, index_path, IndexEntry, IndexWriter, SeekIndex};
pub use input::ErfInput;
pub use linktype::{Demotion, LinkType};
pub use output::{encode_for_output, ErfOutput, ErfOutputOptions, DEFAULT_COMPRESSION_LEVEL};
pub use record::{ErfHeader, ERF_HEADER_LEN, MAX_RECORD_LEN};
