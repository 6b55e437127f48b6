//! DAG capture card input.
//!
//! The card writes ERF records into a memory-mapped ring. [`DagInput`] keeps
//! a cursor into the readable range the driver reports, hands out one record
//! per read, and now and then swaps in a clock-sync ("duck") snapshot.

mod driver;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::erf::record::ErfHeader;
use crate::error::{DagError, Error, RecordError, Result};
use crate::format::{EventContext, InputFormat, TraceEvent, TraceOption};
use crate::packet::{Packet, RecordFormat};
use crate::rt::rt_type;

pub use driver::{DagDevice, DagDriver, SimulatedDag, SimulatedDevice};

/// Back-off when a filter rejects a packet.
pub const FILTERED_SLEEP: Duration = Duration::from_micros(1);

/// Back-off when the ring is empty.
pub const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Settings for a [`DagInput`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DagOptions {
    /// Seconds of capture between clock-sync snapshots; 0 disables them
    pub duck_frequency: u32,
}

/// Reads records from a capture card.
pub struct DagInput<D: DagDevice> {
    path: PathBuf,
    device: D,
    /// Start of the range fetched by the last advance
    bottom: usize,
    /// End of the readable range
    top: usize,
    /// Bytes of the range not yet consumed
    diff: usize,
    /// Consumed bytes since `bottom`
    offset: usize,
    last_duck: u32,
    last_pkt: u32,
    duck_freq: u32,
    streaming: bool,
}

fn hardware<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Error + 'a {
    move |source| {
        DagError::Hardware {
            op,
            path: path.display().to_string(),
            source,
        }
        .into()
    }
}

impl<D: DagDevice> DagInput<D> {
    /// Open and map the card at `path`.
    pub fn open<Dr, P>(driver: &Dr, path: P, options: DagOptions) -> Result<Self>
    where
        Dr: DagDriver<Device = D>,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let is_device = driver
            .validate_path(path)
            .map_err(hardware("stat", path))?;
        if !is_device {
            return Err(DagError::NotADevice {
                path: path.display().to_string(),
            }
            .into());
        }

        let mut device = driver.open(path).map_err(hardware("open", path))?;
        device.map().map_err(hardware("mmap", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            device,
            bottom: 0,
            top: 0,
            diff: 0,
            offset: 0,
            last_duck: 0,
            last_pkt: 0,
            duck_freq: options.duck_frequency,
            streaming: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current clock-sync interval; 0 once disabled.
    pub fn duck_frequency(&self) -> u32 {
        self.duck_freq
    }

    /// Attach and start the stream, then throw away anything the card
    /// buffered while stopped.
    pub fn start(&mut self) -> Result<()> {
        self.device
            .attach_stream()
            .map_err(hardware("attach", &self.path))?;
        self.device
            .start_stream()
            .map_err(hardware("start", &self.path))?;
        self.streaming = true;

        let mut drained = 0;
        while self.advance(false)? > 0 {
            drained += self.diff;
            self.offset += self.diff;
            self.diff = 0;
        }
        if drained > 0 {
            tracing::debug!("Discarded {} stale bytes from {}", drained, self.path.display());
        }
        Ok(())
    }

    /// Stop and detach the stream.
    pub fn pause(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.device
            .stop_stream()
            .map_err(hardware("stop", &self.path))?;
        self.device
            .detach_stream()
            .map_err(hardware("detach", &self.path))?;
        Ok(())
    }

    /// Bytes ready to read, asking the driver for more when the last range
    /// is used up.
    pub fn advance(&mut self, block: bool) -> Result<usize> {
        if self.diff != 0 {
            return Ok(self.diff);
        }
        let mut bottom = self.top;
        self.top = self
            .device
            .advance(&mut bottom, block)
            .map_err(hardware("read", &self.path))?;
        self.bottom = bottom;
        self.diff = self.top.saturating_sub(self.bottom);
        self.offset = 0;
        Ok(self.diff)
    }

    /// Read the next record, or a clock-sync snapshot when one is due.
    ///
    /// Blocks until the card has data. Returns the number of bytes exposed.
    pub fn read_packet(&mut self, packet: &mut Packet) -> Result<usize> {
        if self.duck_freq != 0 && self.last_pkt.saturating_sub(self.last_duck) > self.duck_freq {
            self.last_duck = self.last_pkt;
            match self
                .device
                .duck_info()
                .map_err(hardware("read duck info from", &self.path))?
            {
                Some(duck) => {
                    packet.fill(rt_type::DUCK, RecordFormat::Duck, &duck)?;
                    return Ok(duck.len());
                }
                None => {
                    tracing::warn!(
                        "{} has no clock-sync support, disabling duck retrieval",
                        self.path.display()
                    );
                    self.duck_freq = 0;
                }
            }
        }

        while self.advance(true)? == 0 {}
        self.read_record(packet)
    }

    fn read_record(&mut self, packet: &mut Packet) -> Result<usize> {
        let start = self.bottom + self.offset;
        let ring = self.device.buffer();
        let end = self.top.min(ring.len());
        let data = ring.get(start..end).unwrap_or_default();

        let mut header = ErfHeader::decode(data)?;
        let rlen = header.rlen as usize;
        if rlen > data.len() {
            return Err(RecordError::Truncated {
                expected: rlen,
                actual: data.len(),
            }
            .into());
        }

        let size = if header.has_rx_error() {
            // Only the header and padding leave the ring
            let framing = header.framing_length();
            header.rlen = framing as u16;
            let mut record = data[..framing].to_vec();
            header.write_to(&mut record);
            packet.fill(rt_type::DATA_ERF, RecordFormat::Erf, &record)?;
            framing
        } else {
            packet.fill(rt_type::DATA_ERF, RecordFormat::Erf, &data[..rlen])?;
            rlen
        };

        self.offset += rlen;
        self.diff -= rlen;
        self.last_pkt = header.seconds();
        Ok(size)
    }
}

impl<D: DagDevice> InputFormat for DagInput<D> {
    fn name(&self) -> &'static str {
        "dag"
    }

    fn configure(&mut self, option: &TraceOption) -> Result<()> {
        match option {
            TraceOption::DuckFrequency(seconds) => {
                self.duck_freq = *seconds;
                Ok(())
            }
            // The card is always promiscuous; snapping and filtering happen
            // above this layer
            _ => Err(option.unsupported()),
        }
    }

    fn start(&mut self) -> Result<()> {
        DagInput::start(self)
    }

    fn pause(&mut self) -> Result<()> {
        DagInput::pause(self)
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<Option<usize>> {
        DagInput::read_packet(self, packet).map(Some)
    }

    fn event(&mut self, packet: &mut Packet, ctx: &EventContext<'_>) -> Result<TraceEvent> {
        if self.advance(false)? == 0 {
            return Ok(TraceEvent::Sleep(IDLE_SLEEP));
        }
        let size = DagInput::read_packet(self, packet)?;

        if let Some(filter) = ctx.filter {
            if !filter.matches(packet) {
                return Ok(TraceEvent::Sleep(FILTERED_SLEEP));
            }
        }
        if let Some(snaplen) = ctx.snaplen {
            packet.set_capture_length(snaplen);
        }
        Ok(TraceEvent::Packet { size })
    }
}

impl<D: DagDevice> Drop for DagInput<D> {
    fn drop(&mut self) {
        if let Err(e) = self.pause() {
            tracing::warn!("Failed to stop {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erf::record::{erf_type, flags};
    use bytes::Bytes;

    fn record(secs: u64, flags: u8, frame: &[u8]) -> Vec<u8> {
        let header = ErfHeader {
            ts: secs << 32,
            erf_type: erf_type::ETH,
            flags,
            rlen: 0,
            lctr: 0,
            wlen: frame.len() as u16,
        };
        Packet::erf(header, frame).unwrap().buffer().to_vec()
    }

    fn open(card: &SimulatedDag, duck_frequency: u32) -> DagInput<SimulatedDevice> {
        DagInput::open(card, "/dev/dag0", DagOptions { duck_frequency }).unwrap()
    }

    #[test]
    fn test_reads_records_in_order() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        input.start().unwrap();

        card.feed(&record(1, 0, &[1; 40]));
        card.feed(&record(2, 0, &[2; 20]));

        let mut packet = Packet::new();
        assert_eq!(input.read_packet(&mut packet).unwrap(), 58);
        assert_eq!(packet.payload().unwrap(), &[1; 40][..]);
        assert_eq!(input.read_packet(&mut packet).unwrap(), 38);
        assert_eq!(packet.payload().unwrap(), &[2; 20][..]);
    }

    #[test]
    fn test_start_drains_stale_data() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        card.feed(&record(1, 0, &[0xff; 40]));

        input.start().unwrap();
        assert!(card.is_streaming());
        assert_eq!(card.pending(), 0);

        card.feed(&record(5, 0, &[5; 10]));
        let mut packet = Packet::new();
        input.read_packet(&mut packet).unwrap();
        assert_eq!(packet.erf_header().unwrap().seconds(), 5);
    }

    #[test]
    fn test_rx_error_record_is_cut_to_framing() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        input.start().unwrap();

        card.feed(&record(1, flags::RXERROR, &[0xaa; 100]));
        card.feed(&record(2, 0, &[0xbb; 4]));

        let mut packet = Packet::new();
        assert_eq!(input.read_packet(&mut packet).unwrap(), 18);
        assert_eq!(packet.buffer().len(), 18);
        assert_eq!(packet.erf_header().unwrap().rlen, 18);
        assert!(packet.payload().is_none());

        // The cursor still skips the whole record
        assert_eq!(input.read_packet(&mut packet).unwrap(), 22);
        assert_eq!(packet.payload().unwrap(), &[0xbb; 4][..]);
    }

    #[test]
    fn test_duck_interleaved_by_capture_time() {
        let card = SimulatedDag::new();
        card.set_duck(Some(Bytes::from_static(&[0xd0; 24])));
        let mut input = open(&card, 10);
        input.start().unwrap();

        card.feed(&record(100, 0, &[1; 8]));
        card.feed(&record(105, 0, &[2; 8]));

        let mut packet = Packet::new();
        input.read_packet(&mut packet).unwrap();
        assert_eq!(packet.format(), RecordFormat::Erf);

        // 100 seconds since the last (initial) snapshot
        assert_eq!(input.read_packet(&mut packet).unwrap(), 24);
        assert_eq!(packet.format(), RecordFormat::Duck);
        assert_eq!(card.duck_requests(), 1);

        input.read_packet(&mut packet).unwrap();
        assert_eq!(packet.erf_header().unwrap().seconds(), 105);
        assert_eq!(card.duck_requests(), 1);
    }

    #[test]
    fn test_missing_duck_support_disables_it() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 1);
        input.start().unwrap();

        card.feed(&record(50, 0, &[1; 8]));
        card.feed(&record(60, 0, &[2; 8]));

        let mut packet = Packet::new();
        input.read_packet(&mut packet).unwrap();
        input.read_packet(&mut packet).unwrap();
        assert_eq!(packet.format(), RecordFormat::Erf);
        assert_eq!(input.duck_frequency(), 0);
        assert_eq!(card.duck_requests(), 1);
    }

    #[test]
    fn test_options() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        input.configure(&TraceOption::DuckFrequency(30)).unwrap();
        assert_eq!(input.duck_frequency(), 30);

        for option in [TraceOption::SnapLength(64), TraceOption::Promiscuous(true)] {
            assert!(matches!(
                input.configure(&option),
                Err(Error::UnsupportedOption { .. })
            ));
        }
    }

    #[test]
    fn test_event_poll() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        input.start().unwrap();
        let mut packet = Packet::new();

        let ctx = EventContext::default();
        assert_eq!(
            input.event(&mut packet, &ctx).unwrap(),
            TraceEvent::Sleep(IDLE_SLEEP)
        );

        card.feed(&record(1, 0, &[7; 60]));
        let ctx = EventContext {
            filter: None,
            snaplen: Some(20),
        };
        assert_eq!(
            input.event(&mut packet, &ctx).unwrap(),
            TraceEvent::Packet { size: 78 }
        );
        assert_eq!(packet.capture_length(), 20);

        card.feed(&record(2, 0, &[8; 60]));
        let reject = |_: &Packet| false;
        let ctx = EventContext {
            filter: Some(&reject),
            snaplen: None,
        };
        assert_eq!(
            input.event(&mut packet, &ctx).unwrap(),
            TraceEvent::Sleep(FILTERED_SLEEP)
        );
    }

    #[test]
    fn test_stop_detaches() {
        let card = SimulatedDag::new();
        let mut input = open(&card, 0);
        input.start().unwrap();
        input.pause().unwrap();
        assert!(!card.is_streaming());
    }
}
