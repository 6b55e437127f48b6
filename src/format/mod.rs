//! Capability interfaces shared by every trace backend.
//!
//! Backends implement [`InputFormat`] and/or [`OutputFormat`]. The
//! [`Registry`] maps URI schemes (`erf:`, `dag:`, `rt:`) onto them and hands
//! out boxed trait objects, so callers never match on the backend type.
//!
//! ## Design
//!
//! Each backend owns its session state (stream, socket or ring cursor)
//! exclusively. Reads come in two flavours:
//! - `read_packet` blocks until a record is available or the trace ends
//! - `event` never blocks and reports what the caller should do next

mod registry;

use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::io::FileFlags;
use crate::packet::Packet;

pub use registry::{help_text, FormatInfo, Registry, TraceUri, FORMATS};

/// Decides whether a packet is delivered to the caller.
///
/// Filter evaluation lives outside this crate; any closure over a packet
/// works as a filter.
pub trait PacketFilter {
    fn matches(&self, packet: &Packet) -> bool;
}

impl<F> PacketFilter for F
where
    F: Fn(&Packet) -> bool,
{
    fn matches(&self, packet: &Packet) -> bool {
        self(packet)
    }
}

/// Generic input configuration knob.
#[derive(Clone)]
pub enum TraceOption {
    /// Truncate captured payloads to this many bytes
    SnapLength(usize),
    /// Capture in promiscuous mode
    Promiscuous(bool),
    /// Drop packets the filter rejects
    Filter(Arc<dyn PacketFilter + Send + Sync>),
    /// Seconds between DAG clock-sync retrievals; 0 disables
    DuckFrequency(u32),
}

impl TraceOption {
    pub fn name(&self) -> &'static str {
        match self {
            TraceOption::SnapLength(_) => "snaplen",
            TraceOption::Promiscuous(_) => "promisc",
            TraceOption::Filter(_) => "filter",
            TraceOption::DuckFrequency(_) => "duck_freq",
        }
    }

    /// Error for a backend that does not understand this option.
    pub fn unsupported(&self) -> Error {
        Error::UnsupportedOption {
            option: self.name().to_string(),
        }
    }
}

impl fmt::Debug for TraceOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceOption::SnapLength(n) => f.debug_tuple("SnapLength").field(n).finish(),
            TraceOption::Promiscuous(p) => f.debug_tuple("Promiscuous").field(p).finish(),
            TraceOption::Filter(_) => f.write_str("Filter(..)"),
            TraceOption::DuckFrequency(s) => f.debug_tuple("DuckFrequency").field(s).finish(),
        }
    }
}

/// Generic output configuration knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOption {
    /// 0 writes plain files, 1 to 9 gzip at that level
    CompressionLevel(u32),
    /// How the output file is opened
    FileFlags(FileFlags),
    /// Write a timestamp index alongside the trace
    WriteIndex(bool),
}

impl OutputOption {
    pub fn name(&self) -> &'static str {
        match self {
            OutputOption::CompressionLevel(_) => "compress_level",
            OutputOption::FileFlags(_) => "file_flags",
            OutputOption::WriteIndex(_) => "write_index",
        }
    }
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// A packet of `size` bytes was read into the caller's packet
    Packet { size: usize },
    /// Nothing ready; wait for the descriptor to become readable
    IoWait { fd: Option<RawFd> },
    /// Nothing ready and no descriptor to wait on; poll again later
    Sleep(Duration),
    /// The trace has ended
    Terminate,
}

/// Per-call settings for [`InputFormat::event`].
#[derive(Default, Clone, Copy)]
pub struct EventContext<'a> {
    pub filter: Option<&'a dyn PacketFilter>,
    pub snaplen: Option<usize>,
}

/// A source of packets.
pub trait InputFormat {
    /// Short format name, matching the URI scheme.
    fn name(&self) -> &'static str;

    /// Apply a configuration option before `start`.
    fn configure(&mut self, option: &TraceOption) -> Result<()> {
        Err(option.unsupported())
    }

    /// Begin delivering packets.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop delivering packets; `start` may be called again.
    fn pause(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read the next packet.
    ///
    /// Returns `Ok(None)` at end of trace. The returned size is the number
    /// of record bytes consumed.
    fn read_packet(&mut self, packet: &mut Packet) -> Result<Option<usize>>;

    /// Position the trace so the next packet has timestamp >= `ts`.
    fn seek_erf(&mut self, _ts: u64) -> Result<()> {
        Err(Error::SeekUnsupported { format: self.name() })
    }

    /// Descriptor a caller can poll for readiness.
    fn fd(&self) -> Option<RawFd> {
        None
    }

    /// Non-blocking read.
    ///
    /// File-backed inputs never block for long, so the default just reads.
    fn event(&mut self, packet: &mut Packet, _ctx: &EventContext<'_>) -> Result<TraceEvent> {
        Ok(match self.read_packet(packet)? {
            Some(size) => TraceEvent::Packet { size },
            None => TraceEvent::Terminate,
        })
    }
}

/// A sink for packets.
pub trait OutputFormat {
    fn name(&self) -> &'static str;

    /// Apply a configuration option before `start`.
    fn configure(&mut self, option: &OutputOption) -> Result<()>;

    /// Open the underlying output.
    fn start(&mut self) -> Result<()>;

    /// Write one packet, converting it if needed. Returns bytes written.
    fn write_packet(&mut self, packet: &Packet) -> Result<usize>;

    /// Flush and close the output.
    fn finish(&mut self) -> Result<()>;
}
