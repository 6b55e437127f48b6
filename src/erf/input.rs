//! ERF trace file reader with timestamp seeking.

use std::path::Path;

use crate::error::{Error, RecordError, Result};
use crate::format::InputFormat;
use crate::io::TraceInput;
use crate::packet::{Packet, RecordFormat};
use crate::rt::rt_type;

use super::index::SeekIndex;
use super::record::{ErfHeader, ERF_HEADER_LEN};

/// Whether a side index has been looked for, and what was found.
enum IndexState {
    Unknown,
    None,
    Exists(SeekIndex),
}

/// Reads ERF records from a file, a gzip file or stdin.
pub struct ErfInput {
    input: TraceInput,
    index: IndexState,
    /// Scratch space for one record
    record: Vec<u8>,
}

impl ErfInput {
    /// Open an ERF trace; `-` reads stdin.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_input(TraceInput::open(path)?))
    }

    pub fn from_input(input: TraceInput) -> Self {
        Self {
            input,
            index: IndexState::Unknown,
            record: Vec::with_capacity(u16::MAX as usize),
        }
    }

    /// Offset of the next record in the uncompressed trace.
    #[inline]
    pub fn tell(&self) -> u64 {
        self.input.tell()
    }

    /// Whether a side index was found by a previous seek.
    pub fn has_index(&self) -> Option<bool> {
        match self.index {
            IndexState::Unknown => None,
            IndexState::None => Some(false),
            IndexState::Exists(_) => Some(true),
        }
    }

    /// Read the next record.
    ///
    /// Returns the record length, or `None` at a clean end of trace. A trace
    /// that ends inside a record is an error.
    pub fn read_packet(&mut self, packet: &mut Packet) -> Result<Option<usize>> {
        let mut raw = [0u8; ERF_HEADER_LEN];
        let n = self.input.read_full(&mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        if n < ERF_HEADER_LEN {
            return Err(RecordError::Truncated {
                expected: ERF_HEADER_LEN,
                actual: n,
            }
            .into());
        }

        let header = ErfHeader::decode(&raw)?;
        let rlen = header.rlen as usize;

        self.record.clear();
        self.record.extend_from_slice(&raw);
        self.record.resize(rlen, 0);
        let body = self.input.read_full(&mut self.record[ERF_HEADER_LEN..])?;
        if body < rlen - ERF_HEADER_LEN {
            return Err(RecordError::Truncated {
                expected: rlen,
                actual: ERF_HEADER_LEN + body,
            }
            .into());
        }

        packet.fill(rt_type::DATA_ERF, RecordFormat::Erf, &self.record)?;
        Ok(Some(rlen))
    }

    /// Position the trace so the next record read has timestamp >= `ts`.
    ///
    /// Uses `<trace>.idx` when present to jump close to the target, otherwise
    /// starts from the beginning, then scans forward. Seeking past the last
    /// record leaves the trace at its end.
    pub fn seek_erf(&mut self, ts: u64) -> Result<()> {
        let Some(path) = self.input.path().map(Path::to_path_buf) else {
            return Err(Error::SeekUnsupported { format: "erf (stdin)" });
        };

        if matches!(self.index, IndexState::Unknown) {
            self.index = match SeekIndex::open(&path)? {
                Some(index) => {
                    tracing::debug!("Seeking with index {}", index.path().display());
                    IndexState::Exists(index)
                }
                None => IndexState::None,
            };
        }

        match &self.index {
            IndexState::Exists(index) => {
                if let Some(entry) = index.locate(ts) {
                    self.input.seek(entry.offset)?;
                }
            }
            _ => self.input.reopen()?,
        }

        let mut packet = Packet::new();
        loop {
            let offset = self.input.tell();
            if self.read_packet(&mut packet)?.is_none() {
                return Ok(());
            }
            if packet.erf_header()?.ts >= ts {
                self.input.seek(offset)?;
                return Ok(());
            }
        }
    }
}

impl InputFormat for ErfInput {
    fn name(&self) -> &'static str {
        "erf"
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<Option<usize>> {
        ErfInput::read_packet(self, packet)
    }

    fn seek_erf(&mut self, ts: u64) -> Result<()> {
        ErfInput::seek_erf(self, ts)
    }
}
