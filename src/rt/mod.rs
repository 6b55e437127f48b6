//! RT streaming protocol client.
//!
//! - [`protocol`] - message header, type codes and deny reasons
//! - [`RtConnection`] - handshake, reassembly, acknowledgements
//! - [`RtInput`] - the `rt:` input backend

mod client;
mod input;
pub mod protocol;

pub use client::{RtConnection, RtTransport, RECV_BUFFER_SIZE};
pub use input::{RtAddress, RtInput};
pub use protocol::{
    rt_type, DataKind, DenyReason, MessageKind, RtHeader, DEFAULT_HOST, DEFAULT_PORT,
    RT_HEADER_LEN,
};
