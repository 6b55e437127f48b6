//! ERF record header codec.
//!
//! Every ERF record starts with a fixed 16-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//! +-------------------------------+-------------------------------+
//! |                 ts (u64, little-endian, 32.32)                |
//! +---------------+---------------+-------------------------------+
//! |     type      |     flags     |          rlen (u16 BE)        |
//! +---------------+---------------+-------------------------------+
//! |          lctr (u16 BE)        |          wlen (u16 BE)        |
//! +-------------------------------+-------------------------------+
//! ```
//!
//! followed by link-type padding (two bytes for Ethernet) and the captured
//! frame. `rlen` covers header, padding and capture.

use crate::error::RecordError;

use super::LinkType;

/// Size of the fixed ERF header.
pub const ERF_HEADER_LEN: usize = 16;

/// Largest record (framing plus capture) a header can describe.
pub const MAX_RECORD_LEN: usize = 65536;

/// ERF record type codes.
pub mod erf_type {
    pub const LEGACY: u8 = 0;
    pub const HDLC_POS: u8 = 1;
    pub const ETH: u8 = 2;
    pub const ATM: u8 = 3;
    pub const AAL5: u8 = 4;
    pub const MC_HDLC: u8 = 5;
    pub const MC_RAW: u8 = 6;
    pub const MC_ATM: u8 = 7;
    pub const MC_RAW_CHANNEL: u8 = 8;
    pub const MC_AAL5: u8 = 9;
    /// First code this implementation does not understand.
    pub const UNKNOWN: u8 = 10;
}

/// Bits of the ERF flags byte.
pub mod flags {
    /// Capture interface, used as the packet direction
    pub const IFACE_MASK: u8 = 0x03;
    /// Varying record length
    pub const VLEN: u8 = 0x04;
    /// Record was truncated by the card
    pub const TRUNC: u8 = 0x08;
    /// Frame arrived with a receive error; payload is garbage
    pub const RXERROR: u8 = 0x10;
    /// Internal data-stream error
    pub const DSERROR: u8 = 0x20;
}

/// Decoded ERF record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErfHeader {
    /// 32.32 fixed-point timestamp
    pub ts: u64,
    /// Record type code (see [`erf_type`])
    pub erf_type: u8,
    /// Flag bits (see [`flags`])
    pub flags: u8,
    /// Record length: header + padding + capture
    pub rlen: u16,
    /// Loss counter
    pub lctr: u16,
    /// Original length on the wire
    pub wlen: u16,
}

impl ErfHeader {
    /// Parse a header from the first 16 bytes of `data`.
    ///
    /// Rejects records whose type is unknown or whose `rlen` cannot hold the
    /// header and padding.
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() < ERF_HEADER_LEN {
            return Err(RecordError::Truncated {
                expected: ERF_HEADER_LEN,
                actual: data.len(),
            });
        }

        let header = Self {
            ts: u64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]),
            erf_type: data[8],
            flags: data[9],
            rlen: u16::from_be_bytes([data[10], data[11]]),
            lctr: u16::from_be_bytes([data[12], data[13]]),
            wlen: u16::from_be_bytes([data[14], data[15]]),
        };

        if header.erf_type >= erf_type::UNKNOWN {
            return Err(RecordError::CorruptHeader {
                reason: format!("unknown record type {}", header.erf_type),
            });
        }
        if (header.rlen as usize) < header.framing_length() {
            return Err(RecordError::CorruptHeader {
                reason: format!(
                    "rlen {} is shorter than the {} byte framing",
                    header.rlen,
                    header.framing_length()
                ),
            });
        }

        Ok(header)
    }

    /// Serialize into the 16-byte on-disk layout.
    pub fn encode(&self) -> [u8; ERF_HEADER_LEN] {
        let mut out = [0u8; ERF_HEADER_LEN];
        self.write_to(&mut out);
        out
    }

    /// Serialize into the first 16 bytes of `out`.
    pub fn write_to(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.ts.to_le_bytes());
        out[8] = self.erf_type;
        out[9] = self.flags;
        out[10..12].copy_from_slice(&self.rlen.to_be_bytes());
        out[12..14].copy_from_slice(&self.lctr.to_be_bytes());
        out[14..16].copy_from_slice(&self.wlen.to_be_bytes());
    }

    /// Link type of the record, if the type code has one.
    pub fn link_type(&self) -> Option<LinkType> {
        LinkType::from_erf_type(self.erf_type)
    }

    /// Alignment padding between header and payload.
    #[inline]
    pub fn padding(&self) -> usize {
        match self.erf_type {
            erf_type::ETH => 2,
            _ => 0,
        }
    }

    /// Header size plus padding.
    #[inline]
    pub fn framing_length(&self) -> usize {
        ERF_HEADER_LEN + self.padding()
    }

    /// Whether the card flagged a receive error.
    #[inline]
    pub fn has_rx_error(&self) -> bool {
        self.flags & flags::RXERROR != 0
    }

    /// Captured payload length.
    ///
    /// Never larger than the wire length, and zero for receive-error records.
    pub fn capture_length(&self) -> usize {
        if self.has_rx_error() {
            return 0;
        }
        let caplen = (self.rlen as usize).saturating_sub(self.framing_length());
        caplen.min(self.wlen as usize)
    }

    /// Shrink the record to `len` captured bytes.
    ///
    /// Records can't grow: asking for more than the current capture length
    /// leaves the header untouched. Returns the resulting capture length.
    pub fn set_capture_length(&mut self, len: usize) -> usize {
        if len > self.capture_length() {
            return self.capture_length();
        }
        self.rlen = (len + self.framing_length()) as u16;
        self.capture_length()
    }

    /// Capture interface, used as the packet direction.
    #[inline]
    pub fn interface(&self) -> u8 {
        self.flags & flags::IFACE_MASK
    }

    /// Set the capture interface bits.
    pub fn set_interface(&mut self, iface: u8) -> u8 {
        self.flags = (self.flags & !flags::IFACE_MASK) | (iface & flags::IFACE_MASK);
        self.interface()
    }

    /// Whole seconds of the timestamp.
    #[inline]
    pub fn seconds(&self) -> u32 {
        (self.ts >> 32) as u32
    }
}

/// Convert seconds and microseconds to an ERF 32.32 timestamp.
pub fn erf_timestamp_from_micros(secs: u32, usecs: u32) -> u64 {
    ((secs as u64) << 32) + (((usecs as u64) << 32) / 1_000_000)
}
