//! Packets produced and consumed by the backends.
//!
//! A [`Packet`] owns one record's bytes together with a [`RecordFormat`] tag
//! saying how those bytes are laid out. Every generic accessor (link type,
//! timestamp, lengths, payload) is a pure function of the tag and the buffer,
//! so packets pulled off an RT stream can be interpreted without any session
//! for the embedded format.

use bytes::{Bytes, BytesMut};

use crate::erf::record::{erf_timestamp_from_micros, ErfHeader, ERF_HEADER_LEN};
use crate::erf::LinkType;
use crate::error::{Error, RecordError, Result};
use crate::rt::rt_type;

/// Length of the pcap per-record header embedded in RT pcap messages.
pub const PCAP_RECORD_HEADER_LEN: usize = 16;

/// Framing of a WAG data frame: 6-byte frame header, 8-byte timestamp and
/// 8 bytes of receive parameters.
pub const WAG_FRAMING_LEN: usize = 22;

/// Layout of the bytes held by a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    /// ERF header, padding, frame
    Erf,
    /// WAG 802.11 data frame
    Wag,
    /// pcap record header followed by a frame of the given DLT
    Pcap { dlt: u16 },
    /// Opaque clock-sync snapshot from a DAG card
    Duck,
    /// RT server status blob
    Status,
    /// RT control message with no packet data
    Control,
}

impl RecordFormat {
    pub fn name(&self) -> &'static str {
        match self {
            RecordFormat::Erf => "erf",
            RecordFormat::Wag => "wag",
            RecordFormat::Pcap { .. } => "pcap",
            RecordFormat::Duck => "duck",
            RecordFormat::Status => "status",
            RecordFormat::Control => "control",
        }
    }
}

/// One record read from, or about to be written to, a trace.
#[derive(Debug, Clone)]
pub struct Packet {
    format: RecordFormat,
    rt_type: u16,
    buffer: BytesMut,
    payload_offset: Option<usize>,
}

impl Default for Packet {
    fn default() -> Self {
        Self::new()
    }
}

impl Packet {
    /// An empty control packet, ready to be filled by a read.
    pub fn new() -> Self {
        Self {
            format: RecordFormat::Control,
            rt_type: 0,
            buffer: BytesMut::new(),
            payload_offset: None,
        }
    }

    /// Build an ERF packet from a header and its frame.
    ///
    /// `rlen` is recomputed from the frame length; padding is zero-filled.
    pub fn erf(mut header: ErfHeader, frame: &[u8]) -> Result<Self> {
        let framing = header.framing_length();
        let rlen = framing + frame.len();
        if rlen > u16::MAX as usize {
            return Err(RecordError::TooLarge {
                length: rlen,
                max: u16::MAX as usize,
            }
            .into());
        }
        header.rlen = rlen as u16;

        let mut record = vec![0u8; framing];
        header.write_to(&mut record);
        record.extend_from_slice(frame);

        let mut packet = Self::new();
        packet.fill(rt_type::DATA_ERF, RecordFormat::Erf, &record)?;
        Ok(packet)
    }

    /// Build a pcap-framed packet (as carried by RT pcap messages).
    pub fn pcap(dlt: u16, ts_sec: u32, ts_usec: u32, wire_len: u32, frame: &[u8]) -> Self {
        let mut record = Vec::with_capacity(PCAP_RECORD_HEADER_LEN + frame.len());
        record.extend_from_slice(&ts_sec.to_le_bytes());
        record.extend_from_slice(&ts_usec.to_le_bytes());
        record.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        record.extend_from_slice(&wire_len.to_le_bytes());
        record.extend_from_slice(frame);

        Self {
            format: RecordFormat::Pcap { dlt },
            rt_type: rt_type::DATA_PCAP.saturating_add(dlt),
            buffer: BytesMut::from(&record[..]),
            payload_offset: Some(PCAP_RECORD_HEADER_LEN),
        }
    }

    /// Replace the packet contents with `data` laid out as `format`.
    ///
    /// ERF data is validated; a receive-error record keeps its bytes but
    /// exposes no payload.
    pub(crate) fn fill(&mut self, rt_type: u16, format: RecordFormat, data: &[u8]) -> Result<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.format = format;
        self.rt_type = rt_type;

        self.payload_offset = match format {
            RecordFormat::Erf => {
                let header = ErfHeader::decode(data)?;
                if (header.rlen as usize) > data.len() {
                    return Err(RecordError::Truncated {
                        expected: header.rlen as usize,
                        actual: data.len(),
                    }
                    .into());
                }
                self.buffer.truncate(header.rlen as usize);
                if header.has_rx_error() {
                    None
                } else {
                    Some(header.framing_length())
                }
            }
            RecordFormat::Duck | RecordFormat::Status | RecordFormat::Control => Some(0),
            RecordFormat::Wag | RecordFormat::Pcap { .. } => {
                let framing = self.framing_length();
                (data.len() >= framing).then_some(framing)
            }
        };
        Ok(())
    }

    /// Record layout of this packet.
    #[inline]
    pub fn format(&self) -> RecordFormat {
        self.format
    }

    /// RT message type that produced (or would carry) this packet.
    #[inline]
    pub fn rt_type(&self) -> u16 {
        self.rt_type
    }

    /// The whole record: header, padding and captured bytes.
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Copy of the record as shareable bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }

    /// Decoded ERF header.
    pub fn erf_header(&self) -> Result<ErfHeader> {
        if self.format != RecordFormat::Erf {
            return Err(Error::WrongFormat {
                expected: "erf",
                actual: self.format.name(),
            });
        }
        Ok(ErfHeader::decode(&self.buffer)?)
    }

    /// Link-layer type of the captured frame.
    pub fn link_type(&self) -> Option<LinkType> {
        match self.format {
            RecordFormat::Erf => self.erf_header().ok()?.link_type(),
            RecordFormat::Pcap { dlt } => LinkType::from_dlt(dlt),
            RecordFormat::Wag => Some(LinkType::Ieee80211),
            _ => None,
        }
    }

    /// Capture interface, when the format records one.
    pub fn direction(&self) -> Option<u8> {
        match self.format {
            RecordFormat::Erf => self.erf_header().ok().map(|h| h.interface()),
            _ => None,
        }
    }

    /// Set the capture interface of an ERF packet.
    pub fn set_direction(&mut self, direction: u8) -> Result<u8> {
        let mut header = self.erf_header()?;
        let iface = header.set_interface(direction);
        header.write_to(&mut self.buffer);
        Ok(iface)
    }

    /// 32.32 fixed-point timestamp.
    pub fn erf_timestamp(&self) -> Option<u64> {
        match self.format {
            RecordFormat::Erf => self.erf_header().ok().map(|h| h.ts),
            RecordFormat::Pcap { .. } if self.buffer.len() >= PCAP_RECORD_HEADER_LEN => {
                Some(erf_timestamp_from_micros(
                    self.pcap_field(0),
                    self.pcap_field(4),
                ))
            }
            _ => None,
        }
    }

    /// Bytes preceding the payload in the record.
    pub fn framing_length(&self) -> usize {
        match self.format {
            RecordFormat::Erf => self
                .erf_header()
                .map(|h| h.framing_length())
                .unwrap_or(ERF_HEADER_LEN),
            RecordFormat::Pcap { .. } => PCAP_RECORD_HEADER_LEN,
            RecordFormat::Wag => WAG_FRAMING_LEN,
            RecordFormat::Duck | RecordFormat::Status | RecordFormat::Control => 0,
        }
    }

    /// Number of captured payload bytes available to the caller.
    pub fn capture_length(&self) -> usize {
        let Some(offset) = self.payload_offset else {
            return 0;
        };
        let available = self.buffer.len().saturating_sub(offset);
        match self.format {
            RecordFormat::Erf => self
                .erf_header()
                .map(|h| h.capture_length())
                .unwrap_or(0)
                .min(available),
            RecordFormat::Pcap { .. } => (self.pcap_field(8) as usize).min(available),
            _ => available,
        }
    }

    /// Length of the frame on the wire.
    pub fn wire_length(&self) -> usize {
        match self.format {
            RecordFormat::Erf => self.erf_header().map(|h| h.wlen as usize).unwrap_or(0),
            RecordFormat::Pcap { .. } if self.buffer.len() >= PCAP_RECORD_HEADER_LEN => {
                self.pcap_field(12) as usize
            }
            RecordFormat::Wag => self.capture_length(),
            _ => 0,
        }
    }

    /// Shrink the captured payload; packets never grow.
    ///
    /// Returns the resulting capture length.
    pub fn set_capture_length(&mut self, len: usize) -> usize {
        let current = self.capture_length();
        if len > current || self.payload_offset.is_none() {
            return current;
        }
        match self.format {
            RecordFormat::Erf => {
                let Ok(mut header) = self.erf_header() else {
                    return current;
                };
                header.set_capture_length(len);
                header.write_to(&mut self.buffer);
                self.buffer.truncate(header.rlen as usize);
            }
            RecordFormat::Pcap { .. } => {
                self.buffer[8..12].copy_from_slice(&(len as u32).to_le_bytes());
                self.buffer.truncate(PCAP_RECORD_HEADER_LEN + len);
            }
            _ => {
                if let Some(offset) = self.payload_offset {
                    self.buffer.truncate(offset + len);
                }
            }
        }
        self.capture_length()
    }

    /// Captured frame bytes; `None` when the record has no valid payload.
    pub fn payload(&self) -> Option<&[u8]> {
        let offset = self.payload_offset?;
        Some(&self.buffer[offset..offset + self.capture_length()])
    }

    fn pcap_field(&self, at: usize) -> u32 {
        u32::from_le_bytes([
            self.buffer[at],
            self.buffer[at + 1],
            self.buffer[at + 2],
            self.buffer[at + 3],
        ])
    }
}
