//! Capture card driver seam.
//!
//! [`DagDriver`] opens devices; [`DagDevice`] is the per-card handle whose
//! ring buffer holds ERF records back to back. Vendor bindings implement both
//! traits. [`SimulatedDag`] is an in-memory card fed by the caller.

use std::io::{self, ErrorKind};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

/// Opens capture devices.
pub trait DagDriver {
    type Device: DagDevice;

    /// Check that `path` names a capture device before opening it.
    ///
    /// Cards appear as character devices.
    fn validate_path(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::metadata(path)?.file_type().is_char_device())
    }

    fn open(&self, path: &Path) -> io::Result<Self::Device>;
}

/// An open capture device.
pub trait DagDevice {
    /// Map the card's ring buffer into memory.
    fn map(&mut self) -> io::Result<()>;

    /// The mapped ring. Offsets returned by [`advance`](Self::advance) index
    /// into it.
    fn buffer(&self) -> &[u8];

    fn attach_stream(&mut self) -> io::Result<()>;
    fn start_stream(&mut self) -> io::Result<()>;
    fn stop_stream(&mut self) -> io::Result<()>;
    fn detach_stream(&mut self) -> io::Result<()>;

    /// Release the bytes before `*bottom` and return the end of the readable
    /// range.
    ///
    /// The driver may move `*bottom` when the ring wraps. With `block` set
    /// the call waits until some data is readable.
    fn advance(&mut self, bottom: &mut usize, block: bool) -> io::Result<usize>;

    /// Fetch a clock-sync snapshot; `None` when the card has no support.
    fn duck_info(&mut self) -> io::Result<Option<Bytes>>;
}

#[derive(Default)]
struct SimState {
    /// Records fed but not yet pulled into a device ring
    pending: Vec<u8>,
    duck: Option<Bytes>,
    duck_requests: usize,
    streaming: bool,
    closed: bool,
}

#[derive(Default)]
struct SimShared {
    state: Mutex<SimState>,
    fed: Condvar,
}

/// In-memory capture card.
///
/// Clones share the same card, so a test can keep one handle to feed records
/// while a [`DagInput`](super::DagInput) reads through another. Paths are
/// not checked.
#[derive(Clone, Default)]
pub struct SimulatedDag {
    shared: Arc<SimShared>,
}

impl SimulatedDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw ERF records to the card.
    pub fn feed(&self, records: &[u8]) {
        self.shared.state.lock().pending.extend_from_slice(records);
        self.shared.fed.notify_all();
    }

    /// Clock-sync blob returned by the card; `None` disables support.
    pub fn set_duck(&self, duck: Option<Bytes>) {
        self.shared.state.lock().duck = duck;
    }

    /// Number of clock-sync requests made so far.
    pub fn duck_requests(&self) -> usize {
        self.shared.state.lock().duck_requests
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state.lock().streaming
    }

    /// Bytes fed but not yet seen by a reader.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Wake blocked readers; once the feed is drained they get an error.
    pub fn close(&self) {
        self.shared.state.lock().closed = true;
        self.shared.fed.notify_all();
    }
}

impl DagDriver for SimulatedDag {
    type Device = SimulatedDevice;

    fn validate_path(&self, _path: &Path) -> io::Result<bool> {
        Ok(true)
    }

    fn open(&self, _path: &Path) -> io::Result<SimulatedDevice> {
        Ok(SimulatedDevice {
            shared: Arc::clone(&self.shared),
            ring: Vec::new(),
            mapped: false,
            attached: false,
        })
    }
}

/// Device handle of a [`SimulatedDag`].
pub struct SimulatedDevice {
    shared: Arc<SimShared>,
    ring: Vec<u8>,
    mapped: bool,
    attached: bool,
}

impl DagDevice for SimulatedDevice {
    fn map(&mut self) -> io::Result<()> {
        self.mapped = true;
        Ok(())
    }

    fn buffer(&self) -> &[u8] {
        &self.ring
    }

    fn attach_stream(&mut self) -> io::Result<()> {
        if !self.mapped {
            return Err(io::Error::new(ErrorKind::Other, "buffer not mapped"));
        }
        self.attached = true;
        Ok(())
    }

    fn start_stream(&mut self) -> io::Result<()> {
        if !self.attached {
            return Err(io::Error::new(ErrorKind::Other, "stream not attached"));
        }
        self.shared.state.lock().streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> io::Result<()> {
        self.shared.state.lock().streaming = false;
        Ok(())
    }

    fn detach_stream(&mut self) -> io::Result<()> {
        self.attached = false;
        Ok(())
    }

    fn advance(&mut self, bottom: &mut usize, block: bool) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        if block {
            while state.pending.is_empty() && *bottom >= self.ring.len() {
                if state.closed {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "simulated card closed",
                    ));
                }
                self.shared.fed.wait(&mut state);
            }
        }

        // Everything consumed: wrap to the start of the ring
        if *bottom >= self.ring.len() {
            self.ring.clear();
            *bottom = 0;
        }
        self.ring.append(&mut state.pending);
        Ok(self.ring.len())
    }

    fn duck_info(&mut self) -> io::Result<Option<Bytes>> {
        let mut state = self.shared.state.lock();
        state.duck_requests += 1;
        Ok(state.duck.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_ring_wraps_when_drained() {
        let card = SimulatedDag::new();
        let mut device = card.open(Path::new("/dev/dag0")).unwrap();
        device.map().unwrap();

        card.feed(&[1, 2, 3, 4]);
        let mut bottom = 0;
        assert_eq!(device.advance(&mut bottom, false).unwrap(), 4);
        assert_eq!(card.pending(), 0);

        // Partially consumed: new data lands after the old
        bottom = 2;
        card.feed(&[5, 6]);
        assert_eq!(device.advance(&mut bottom, false).unwrap(), 6);
        assert_eq!(bottom, 2);

        // Fully consumed: the ring starts over
        bottom = 6;
        card.feed(&[7]);
        assert_eq!(device.advance(&mut bottom, false).unwrap(), 1);
        assert_eq!(bottom, 0);
        assert_eq!(device.buffer(), &[7]);
    }

    #[test]
    fn test_blocking_advance_wakes_on_feed() {
        let card = SimulatedDag::new();
        let mut device = card.open(Path::new("sim")).unwrap();
        device.map().unwrap();

        let feeder = card.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            feeder.feed(&[9; 8]);
        });

        let mut bottom = 0;
        assert_eq!(device.advance(&mut bottom, true).unwrap(), 8);
        handle.join().unwrap();

        bottom = 8;
        card.close();
        assert_eq!(
            device.advance(&mut bottom, true).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn test_start_requires_attach() {
        let card = SimulatedDag::new();
        let mut device = card.open(Path::new("sim")).unwrap();
        assert!(device.attach_stream().is_err());
        device.map().unwrap();
        assert!(device.start_stream().is_err());
        device.attach_stream().unwrap();
        device.start_stream().unwrap();
        assert!(card.is_streaming());
    }

    #[test]
    fn test_default_path_check_rejects_regular_files() {
        struct Cards;
        impl DagDriver for Cards {
            type Device = SimulatedDevice;
            fn open(&self, path: &Path) -> io::Result<SimulatedDevice> {
                SimulatedDag::new().open(path)
            }
        }

        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!Cards.validate_path(file.path()).unwrap());
        assert!(Cards.validate_path(Path::new("/nonexistent/dag0")).is_err());
    }
}
