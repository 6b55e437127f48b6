//! RT wire format.
//!
//! Every message is an 8-byte header followed by `length` payload bytes:
//!
//! ```text
//! +----------------+----------------+--------------------------------+
//! | type (u16 LE)  | length (u16 LE)| sequence (u32 LE)              |
//! +----------------+----------------+--------------------------------+
//! ```
//!
//! Types below [`rt_type::DATA_SIMPLE`] are control messages; everything from
//! there up carries a captured packet.

use std::fmt;

/// Size of the message header.
pub const RT_HEADER_LEN: usize = 8;

/// Largest payload a header can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Port collectors listen on unless told otherwise.
pub const DEFAULT_PORT: u16 = 3435;

pub const DEFAULT_HOST: &str = "localhost";

/// RT message type codes.
pub mod rt_type {
    pub const HELLO: u16 = 1;
    pub const START: u16 = 2;
    pub const ACK: u16 = 3;
    pub const STATUS: u16 = 4;
    pub const DUCK: u16 = 5;
    pub const END_DATA: u16 = 6;
    pub const CLOSE: u16 = 7;
    pub const DENY: u16 = 8;
    pub const PAUSE: u16 = 9;
    pub const PAUSE_ACK: u16 = 10;
    pub const OPTION: u16 = 11;
    pub const KEYCHANGE: u16 = 12;
    pub const DUCK_2_4: u16 = 13;
    pub const DUCK_2_5: u16 = 14;

    /// First data message type
    pub const DATA_SIMPLE: u16 = 1000;
    pub const DATA_ERF: u16 = 1001;
    pub const DATA_WAG: u16 = 1004;
    pub const DATA_LEGACY_ATM: u16 = 1006;
    pub const DATA_LEGACY_POS: u16 = 1007;
    pub const DATA_LEGACY_ETH: u16 = 1008;
    /// pcap data; the DLT is added to this value
    pub const DATA_PCAP: u16 = 2000;
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtHeader {
    pub rt_type: u16,
    pub length: u16,
    pub sequence: u32,
}

impl RtHeader {
    pub fn new(rt_type: u16, length: u16, sequence: u32) -> Self {
        Self {
            rt_type,
            length,
            sequence,
        }
    }

    pub fn decode(data: &[u8; RT_HEADER_LEN]) -> Self {
        Self {
            rt_type: u16::from_le_bytes([data[0], data[1]]),
            length: u16::from_le_bytes([data[2], data[3]]),
            sequence: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        }
    }

    pub fn encode(&self) -> [u8; RT_HEADER_LEN] {
        let mut out = [0u8; RT_HEADER_LEN];
        out[0..2].copy_from_slice(&self.rt_type.to_le_bytes());
        out[2..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(self.rt_type)
    }
}

/// Why a server refused a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// TCP wrappers rejected the client
    Wrapper,
    /// Server already has its maximum number of clients
    Full,
    /// Authentication failed
    Auth,
    /// Anything else, including a deny with no reason attached
    Unknown(u8),
}

impl DenyReason {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => DenyReason::Wrapper,
            2 => DenyReason::Full,
            3 => DenyReason::Auth,
            other => DenyReason::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            DenyReason::Wrapper => 1,
            DenyReason::Full => 2,
            DenyReason::Auth => 3,
            DenyReason::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::Wrapper => "Rejected by TCP Wrappers",
            DenyReason::Full => "Max connections reached on server",
            DenyReason::Auth => "Authentication failed",
            DenyReason::Unknown(_) => "Unknown reason",
        };
        f.write_str(text)
    }
}

/// Layout of a data message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Erf,
    Wag,
    Pcap { dlt: u16 },
    /// Legacy ATM/POS/Ethernet records; not carried over RT
    Legacy(u16),
    /// In the data range but not a known layout
    Unknown(u16),
}

/// Control or data, with the data layout resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Control(u16),
    Data(DataKind),
}

impl MessageKind {
    pub fn classify(code: u16) -> Self {
        if code < rt_type::DATA_SIMPLE {
            return MessageKind::Control(code);
        }
        let kind = match code {
            rt_type::DATA_ERF => DataKind::Erf,
            rt_type::DATA_WAG => DataKind::Wag,
            rt_type::DATA_LEGACY_ATM | rt_type::DATA_LEGACY_POS | rt_type::DATA_LEGACY_ETH => {
                DataKind::Legacy(code)
            }
            code if code >= rt_type::DATA_PCAP => DataKind::Pcap {
                dlt: code - rt_type::DATA_PCAP,
            },
            code => DataKind::Unknown(code),
        };
        MessageKind::Data(kind)
    }
}
