//! ERF trace writer.
//!
//! Native ERF packets are written as they are. Anything else gets a new
//! header synthesized from the generic packet accessors, after walking the
//! link-type demotion chain when ERF has no record type for the packet.

use std::path::{Path, PathBuf};

use crate::error::{RecordError, Result};
use crate::format::{OutputFormat, OutputOption};
use crate::io::{FileFlags, TraceOutput, STDIO_PATH};
use crate::packet::{Packet, RecordFormat};

use super::index::{build_index, IndexEntry, IndexWriter};
use super::linktype::{find_erf_representation, Demotion};
use super::record::{flags, ErfHeader, ERF_HEADER_LEN, MAX_RECORD_LEN};

/// Default gzip level for new traces.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Settings for an [`ErfOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErfOutputOptions {
    /// 0 writes plain ERF, 1 to 9 gzip at that level
    pub compression_level: u32,
    pub file_flags: FileFlags,
    /// Also write `<path>.idx` while writing the trace
    pub write_index: bool,
}

impl Default for ErfOutputOptions {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            file_flags: FileFlags::default(),
            write_index: false,
        }
    }
}

/// Writes packets to an ERF trace.
pub struct ErfOutput {
    path: PathBuf,
    options: ErfOutputOptions,
    output: Option<TraceOutput>,
    index: Option<IndexWriter>,
    /// Appending to an indexed trace: the index is rebuilt on finish
    rebuild_index: bool,
    scratch: Vec<u8>,
}

impl ErfOutput {
    /// Prepare an output; nothing is opened until [`start`](Self::start).
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_options(path, ErfOutputOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(path: P, options: ErfOutputOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
            output: None,
            index: None,
            rebuild_index: false,
            scratch: Vec::with_capacity(MAX_RECORD_LEN),
        }
    }

    /// Open an output right away.
    pub fn create<P: AsRef<Path>>(path: P, options: ErfOutputOptions) -> Result<Self> {
        let mut output = Self::with_options(path, options);
        output.start()?;
        Ok(output)
    }

    pub fn options(&self) -> &ErfOutputOptions {
        &self.options
    }

    pub fn start(&mut self) -> Result<()> {
        if self.output.is_some() {
            return Ok(());
        }
        self.output = Some(TraceOutput::create(
            &self.path,
            self.options.compression_level,
            self.options.file_flags,
        )?);

        if self.options.write_index {
            if self.path.as_os_str() == STDIO_PATH {
                tracing::warn!("Cannot write an index for a trace written to stdout");
            } else if self.options.file_flags.append {
                // Offsets of new records depend on what the trace already holds
                self.rebuild_index = true;
            } else {
                self.index = Some(IndexWriter::create(&self.path)?);
            }
        }
        Ok(())
    }

    /// Write one packet. Returns the number of bytes written.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
        self.start()?;
        let header = encode_for_output(packet, &mut self.scratch)?;

        let Some(output) = self.output.as_mut() else {
            return Ok(0);
        };
        let offset = output.position();
        output.write_all(&self.scratch)?;

        if let Some(index) = self.index.as_mut() {
            index.append(IndexEntry {
                timestamp: header.ts,
                offset,
            })?;
        }
        Ok(self.scratch.len())
    }

    /// Flush and close the trace and its index.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(mut output) = self.output.take() {
            output.finish()?;
        }
        if let Some(index) = self.index.take() {
            index.finish()?;
        }
        if std::mem::take(&mut self.rebuild_index) {
            build_index(&self.path)?;
        }
        Ok(())
    }
}

impl OutputFormat for ErfOutput {
    fn name(&self) -> &'static str {
        "erf"
    }

    fn configure(&mut self, option: &OutputOption) -> Result<()> {
        match *option {
            OutputOption::CompressionLevel(level) => {
                if level > 9 {
                    tracing::warn!("Compression level {} out of range, using 9", level);
                }
                self.options.compression_level = level.min(9);
            }
            OutputOption::FileFlags(file_flags) => self.options.file_flags = file_flags,
            OutputOption::WriteIndex(write_index) => self.options.write_index = write_index,
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        ErfOutput::start(self)
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<usize> {
        ErfOutput::write_packet(self, packet)
    }

    fn finish(&mut self) -> Result<()> {
        ErfOutput::finish(self)
    }
}

/// Encode `packet` as an ERF record into `out`, returning its header.
///
/// Native records are copied; a receive-error record loses its payload and
/// is written as header and padding only.
pub fn encode_for_output(packet: &Packet, out: &mut Vec<u8>) -> Result<ErfHeader> {
    out.clear();

    if packet.format() == RecordFormat::Erf {
        let mut header = packet.erf_header()?;
        let record = packet.buffer();
        if header.has_rx_error() {
            let framing = header.framing_length();
            header.rlen = framing as u16;
            out.extend_from_slice(&record[..framing]);
            header.write_to(out);
        } else {
            let rlen = (header.rlen as usize).min(record.len());
            out.extend_from_slice(&record[..rlen]);
        }
        return Ok(header);
    }

    let link_type = packet
        .link_type()
        .ok_or(RecordError::NoLinkTypeConversion { link_type: None })?;
    let frame = packet.payload().unwrap_or_default();
    let (erf_type, step) = find_erf_representation(Demotion::new(link_type, frame))
        .map_err(|last| RecordError::NoLinkTypeConversion {
            link_type: Some(last),
        })?;

    let mut header = ErfHeader {
        ts: packet.erf_timestamp().unwrap_or(0),
        erf_type,
        flags: packet.direction().unwrap_or(0) & flags::IFACE_MASK,
        rlen: 0,
        lctr: 0,
        wlen: 0,
    };

    let framing = header.framing_length();
    let caplen = step.frame.len();
    let rlen = framing + caplen;
    if rlen > u16::MAX as usize {
        return Err(RecordError::TooLarge {
            length: rlen,
            max: u16::MAX as usize,
        }
        .into());
    }

    // Demotion changes the header bytes in front of the frame; the wire
    // length moves by the same amount.
    let wire = packet.wire_length() as isize + caplen as isize - frame.len() as isize;
    header.rlen = rlen as u16;
    header.wlen = wire.clamp(0, u16::MAX as isize) as u16;

    out.resize(framing, 0);
    header.write_to(&mut out[..ERF_HEADER_LEN]);
    out.extend_from_slice(&step.frame);
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erf::linktype::dlt;
    use crate::erf::record::erf_type;
    use crate::erf::LinkType;
    use crate::error::Error;

    fn eth_packet(flags: u8, frame: &[u8]) -> Packet {
        let header = ErfHeader {
            ts: 7 << 32,
            erf_type: erf_type::ETH,
            flags,
            rlen: 0,
            lctr: 3,
            wlen: frame.len() as u16,
        };
        Packet::erf(header, frame).unwrap()
    }

    #[test]
    fn test_native_record_copied_verbatim() {
        let packet = eth_packet(0x01, &[0xab; 60]);
        let mut out = Vec::new();
        encode_for_output(&packet, &mut out).unwrap();
        assert_eq!(out, packet.buffer());
    }

    #[test]
    fn test_rx_error_record_written_without_payload() {
        let packet = eth_packet(flags::RXERROR, &[0xab; 60]);
        let mut out = Vec::new();
        let header = encode_for_output(&packet, &mut out).unwrap();

        assert_eq!(out.len(), 18);
        assert_eq!(header.rlen, 18);
        assert_eq!(ErfHeader::decode(&out).unwrap().rlen, 18);
    }

    #[test]
    fn test_pcap_ethernet_gets_synthesized_header() {
        let frame = [0x42u8; 50];
        let packet = Packet::pcap(dlt::EN10MB, 5, 250_000, 90, &frame);
        let mut out = Vec::new();
        let header = encode_for_output(&packet, &mut out).unwrap();

        assert_eq!(header.erf_type, erf_type::ETH);
        assert_eq!(header.ts, (5u64 << 32) + (1u64 << 30));
        assert_eq!(header.flags, 0);
        assert_eq!(header.lctr, 0);
        assert_eq!(header.wlen, 90);
        assert_eq!(header.rlen as usize, 18 + 50);
        assert_eq!(&out[16..18], &[0, 0]);
        assert_eq!(&out[18..], &frame[..]);
    }

    #[test]
    fn test_linux_sll_demoted_to_ethernet() {
        let mut frame = vec![0, 0, 0, 1, 0, 6, 1, 2, 3, 4, 5, 6, 0, 0, 0x08, 0x00];
        frame.extend_from_slice(&[0x45; 20]);
        let packet = Packet::pcap(dlt::LINUX_SLL, 1, 0, frame.len() as u32, &frame);

        let mut out = Vec::new();
        let header = encode_for_output(&packet, &mut out).unwrap();
        assert_eq!(header.erf_type, erf_type::ETH);
        // 16-byte cooked header replaced by a 14-byte Ethernet header
        assert_eq!(header.wlen as usize, frame.len() - 2);
        assert_eq!(out.len(), 18 + 14 + 20);
        assert_eq!(&out[18 + 6..18 + 12], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_raw_ip_has_no_conversion() {
        let packet = Packet::pcap(dlt::RAW, 1, 0, 20, &[0x45; 20]);
        let err = encode_for_output(&packet, &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Record(RecordError::NoLinkTypeConversion {
                link_type: Some(LinkType::None)
            })
        ));
    }

    #[test]
    fn test_control_packet_has_no_conversion() {
        let err = encode_for_output(&Packet::new(), &mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::Record(RecordError::NoLinkTypeConversion { link_type: None })
        ));
    }

    #[test]
    fn test_write_with_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.erf");
        let options = ErfOutputOptions {
            compression_level: 0,
            write_index: true,
            ..Default::default()
        };

        let mut output = ErfOutput::create(&path, options).unwrap();
        assert_eq!(output.write_packet(&eth_packet(0, &[1; 30])).unwrap(), 48);
        assert_eq!(output.write_packet(&eth_packet(0, &[2; 10])).unwrap(), 28);
        output.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap().len(), 76);
        let index = crate::erf::SeekIndex::open(&path).unwrap().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entry(1).offset, 48);
    }

    #[test]
    fn test_append_rebuilds_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.erf");
        let options = ErfOutputOptions {
            compression_level: 0,
            file_flags: FileFlags {
                append: true,
                ..Default::default()
            },
            write_index: true,
        };

        for fill in [1u8, 2] {
            let mut output = ErfOutput::create(&path, options).unwrap();
            output.write_packet(&eth_packet(0, &[fill; 30])).unwrap();
            output.finish().unwrap();
        }

        let index = crate::erf::SeekIndex::open(&path).unwrap().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entry(0).offset, 0);
        assert_eq!(index.entry(1).offset, 48);
    }

    #[test]
    fn test_configure_clamps_level() {
        let mut output = ErfOutput::new("unused.erf");
        output
            .configure(&OutputOption::CompressionLevel(12))
            .unwrap();
        assert_eq!(output.options().compression_level, 9);
    }
}
