//! Error types for erftrace.
//!
//! This module provides structured error types for every backend:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`RecordError`] - Errors from decoding or encoding ERF records
//! - [`RtError`] - Errors from the RT streaming protocol client
//! - [`DagError`] - Errors from the DAG capture card adapter
//!
//! All errors implement `std::error::Error` and can be converted to `anyhow::Error`.

use std::path::PathBuf;

use thiserror::Error;

use crate::erf::LinkType;
use crate::rt::DenyReason;

/// Main error type for erftrace operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error decoding or encoding a trace record
    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    /// Error talking to an RT collector
    #[error("RT error: {0}")]
    Rt(#[from] RtError),

    /// Error driving a DAG card
    #[error("DAG error: {0}")]
    Dag(#[from] DagError),

    /// I/O error on a named trace or index file
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Option not understood by this backend
    #[error("Unknown or unsupported option: {option}")]
    UnsupportedOption { option: String },

    /// Backend cannot reposition its input
    #[error("{format} traces do not support seeking")]
    SeekUnsupported { format: &'static str },

    /// Packet accessor used on a record of another format
    #[error("Expected a {expected} record, found {actual}")]
    WrongFormat {
        expected: &'static str,
        actual: &'static str,
    },

    /// URI could not be mapped to a backend
    #[error("Invalid trace URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// True when a non-blocking read found no data yet.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Error::Rt(RtError::WouldBlock))
    }
}

/// Errors related to ERF records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// Header fields are inconsistent with each other or with the bounds
    #[error("Corrupt ERF record: {reason}")]
    CorruptHeader { reason: String },

    /// Fewer bytes were available than the record declared
    #[error("Truncated record: wanted {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// No ERF type exists for the packet, even after demotion
    #[error("No ERF type for packet ({link_type:?})")]
    NoLinkTypeConversion { link_type: Option<LinkType> },

    /// Framing plus capture does not fit in a record
    #[error("Record of {length} bytes exceeds the {max} byte limit")]
    TooLarge { length: usize, max: usize },
}

/// Errors related to the RT protocol.
#[derive(Error, Debug)]
pub enum RtError {
    /// TCP connection could not be established
    #[error("Could not connect to host {host} on port {port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Server refused the connection
    #[error("Connection attempt is denied: {reason}")]
    ConnectionDenied { reason: DenyReason },

    /// Server sent something the protocol does not allow here
    #[error("Protocol violation: {reason}")]
    Protocol { reason: String },

    /// Non-blocking read found no data ready
    #[error("No data ready on RT socket")]
    WouldBlock,

    /// Receiving into the reassembly buffer failed
    #[error("Failed to read data into rt recv buffer: {reason}")]
    Recv { reason: String },

    /// Sending a control message or acknowledgement failed
    #[error("Failed to send {what}: {source}")]
    Send {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Legacy ATM/POS/Ethernet payloads cannot be carried over RT
    #[error("Legacy packet type {rt_type} cannot be sent over rt")]
    UnsupportedLegacyEmbedding { rt_type: u16 },
}

/// Errors related to DAG hardware.
#[derive(Error, Debug)]
pub enum DagError {
    /// Path does not name a character device
    #[error("Not a valid dag device: {path}")]
    NotADevice { path: String },

    /// A driver call failed
    #[error("Cannot {op} DAG {path}: {source}")]
    Hardware {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
