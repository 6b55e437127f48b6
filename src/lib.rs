//! erftrace - ERF traces, DAG capture cards and RT streams as packet sources.
//!
//! Every backend is reached through a URI (`erf:`, `dag:`, `rt:`) and the
//! capability traits in [`format`].
//!
//! # Example
//!
//! ```no_run
//! use erftrace::format::Registry;
//! use erftrace::packet::Packet;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut input = Registry::new().open_input("erf:capture.erf.gz")?;
//!     input.start()?;
//!     input.seek_erf(1_700_000_000u64 << 32)?;
//!
//!     let mut packet = Packet::new();
//!     while input.read_packet(&mut packet)?.is_some() {
//!         println!("{} bytes", packet.capture_length());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod dag;
pub mod erf;
pub mod error;
pub mod format;
pub mod io;
pub mod packet;
pub mod rt;

pub use error::{Error, Result};
