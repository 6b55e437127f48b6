//! RT protocol client connection.
//!
//! The server speaks first: a hello (optionally asking for acknowledgements)
//! or a deny. After the client sends start, the server streams messages until
//! end-of-data. Messages are reassembled from however the transport chooses
//! to split them; callers only ever see whole messages.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::ops::Range;
use std::os::fd::{AsRawFd, RawFd};

use crate::error::{Error, Result, RtError};
use crate::packet::{Packet, RecordFormat};

use super::protocol::{rt_type, DataKind, DenyReason, MessageKind, RtHeader, MAX_PAYLOAD_LEN, RT_HEADER_LEN};

/// Receive buffer capacity: one header plus the largest payload.
pub const RECV_BUFFER_SIZE: usize = RT_HEADER_LEN + MAX_PAYLOAD_LEN;

const ACK_LEN: usize = RT_HEADER_LEN + 4;

/// Byte stream an RT connection runs over.
pub trait RtTransport: Read + Write {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    /// Descriptor for external poll loops.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

impl RtTransport for TcpStream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.as_raw_fd())
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Started,
    Closed,
}

/// A connection that completed the hello handshake.
pub struct RtConnection<T: RtTransport> {
    transport: T,
    state: State,
    /// Server asked for an ack per data message
    reliable: bool,
    /// Whether the transport is currently in non-blocking mode
    nonblocking: bool,
    buffer: Box<[u8]>,
    /// Start of the unconsumed bytes in `buffer`
    cursor: usize,
    /// Number of unconsumed bytes
    left: usize,
    ack: [u8; ACK_LEN],
}

impl RtConnection<TcpStream> {
    /// Connect to a collector and perform the handshake.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).map_err(|source| RtError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        tracing::debug!("Connected to RT server {}:{}", host, port);
        Self::handshake(stream)
    }
}

impl<T: RtTransport> RtConnection<T> {
    /// Wait for the server's greeting on an already connected transport.
    ///
    /// A deny fails with [`RtError::ConnectionDenied`]; anything other than
    /// a hello or deny is a protocol error.
    pub fn handshake(transport: T) -> Result<Self> {
        let mut conn = Self {
            transport,
            state: State::Connected,
            reliable: false,
            nonblocking: false,
            buffer: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            cursor: 0,
            left: 0,
            ack: [0u8; ACK_LEN],
        };

        let header = conn.read_header(true)?;
        let len = header.length as usize;
        match header.rt_type {
            rt_type::DENY => {
                let reason = match conn.take(len, true) {
                    Ok(range) if !range.is_empty() => DenyReason::from_code(conn.buffer[range.start]),
                    _ => DenyReason::Unknown(0),
                };
                conn.state = State::Closed;
                Err(RtError::ConnectionDenied { reason }.into())
            }
            rt_type::HELLO => {
                if len == 0 {
                    conn.state = State::Closed;
                    return Err(RtError::Protocol {
                        reason: "Failed to receive RT_HELLO options".to_string(),
                    }
                    .into());
                }
                let range = conn.take(len, true)?;
                conn.reliable = conn.buffer[range.start] != 0;
                tracing::debug!("RT hello received, reliable = {}", conn.reliable);
                Ok(conn)
            }
            other => {
                conn.state = State::Closed;
                Err(RtError::Protocol {
                    reason: format!("Unknown message type received: {}", other),
                }
                .into())
            }
        }
    }

    /// Whether every data message is acknowledged.
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.transport.raw_fd()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Ask the server to begin streaming.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Connected {
            return Ok(());
        }
        self.send_control(rt_type::START, "start message")?;
        self.state = State::Started;
        Ok(())
    }

    /// Tell the server we are done and shut the socket.
    pub fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closed;
        self.send_control(rt_type::CLOSE, "close message")?;
        if let Err(e) = self.transport.shutdown() {
            tracing::debug!("Shutting down RT socket failed: {}", e);
        }
        Ok(())
    }

    /// Read the next message into `packet`.
    ///
    /// Data, status and duck messages and the pause-ack, option and
    /// key-change controls are returned with the payload length. End-of-data
    /// returns `None`. Any other control message is consumed, logged and
    /// skipped.
    ///
    /// With `blocking` false, [`RtError::WouldBlock`] is returned when no
    /// header is ready; bytes already received stay buffered for the next
    /// call. Once a header has arrived its payload is always read in full.
    pub fn read_message(&mut self, packet: &mut Packet, blocking: bool) -> Result<Option<usize>> {
        loop {
            let header = self.read_header(blocking)?;
            let len = header.length as usize;

            let format = match header.kind() {
                MessageKind::Data(kind) => {
                    let range = self.take(len, true)?;
                    let format = match kind {
                        DataKind::Erf => RecordFormat::Erf,
                        DataKind::Wag => RecordFormat::Wag,
                        DataKind::Pcap { dlt } => RecordFormat::Pcap { dlt },
                        DataKind::Legacy(code) => {
                            return Err(RtError::UnsupportedLegacyEmbedding { rt_type: code }.into())
                        }
                        DataKind::Unknown(code) => {
                            return Err(RtError::Protocol {
                                reason: format!("Unrecognised packet format: {}", code),
                            }
                            .into())
                        }
                    };
                    packet.fill(header.rt_type, format, &self.buffer[range])?;
                    if self.reliable {
                        self.send_ack(header.sequence)?;
                    }
                    return Ok(Some(len));
                }
                MessageKind::Control(rt_type::STATUS) => RecordFormat::Status,
                MessageKind::Control(
                    rt_type::DUCK | rt_type::DUCK_2_4 | rt_type::DUCK_2_5,
                ) => RecordFormat::Duck,
                MessageKind::Control(rt_type::PAUSE_ACK | rt_type::OPTION | rt_type::KEYCHANGE) => {
                    RecordFormat::Control
                }
                MessageKind::Control(rt_type::END_DATA) => {
                    self.take(len, true)?;
                    tracing::debug!("RT server signalled end of data");
                    return Ok(None);
                }
                MessageKind::Control(other) => {
                    self.take(len, true)?;
                    tracing::warn!("Bad rt type for client receipt: {}", other);
                    continue;
                }
            };

            let range = self.take(len, true)?;
            packet.fill(header.rt_type, format, &self.buffer[range])?;
            return Ok(Some(len));
        }
    }

    fn read_header(&mut self, blocking: bool) -> Result<RtHeader> {
        let range = self.take(RT_HEADER_LEN, blocking)?;
        let mut raw = [0u8; RT_HEADER_LEN];
        raw.copy_from_slice(&self.buffer[range]);
        Ok(RtHeader::decode(&raw))
    }

    /// Make `len` bytes available and consume them, returning where they sit
    /// in the buffer.
    fn take(&mut self, len: usize, blocking: bool) -> std::result::Result<Range<usize>, RtError> {
        if len > self.left {
            self.buffer.copy_within(self.cursor..self.cursor + self.left, 0);
            self.cursor = 0;
            self.set_nonblocking(!blocking)?;

            while len > self.left {
                match self.transport.read(&mut self.buffer[self.left..]) {
                    Ok(0) => {
                        return Err(RtError::Recv {
                            reason: "No data received".to_string(),
                        })
                    }
                    Ok(n) => self.left += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == ErrorKind::WouldBlock && !blocking => {
                        return Err(RtError::WouldBlock)
                    }
                    Err(e) => {
                        return Err(RtError::Recv {
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }

        let range = self.cursor..self.cursor + len;
        self.cursor += len;
        self.left -= len;
        Ok(range)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> std::result::Result<(), RtError> {
        if self.nonblocking != nonblocking {
            self.transport
                .set_nonblocking(nonblocking)
                .map_err(|e| RtError::Recv {
                    reason: format!("Could not change socket mode: {}", e),
                })?;
            self.nonblocking = nonblocking;
        }
        Ok(())
    }

    fn send_ack(&mut self, sequence: u32) -> Result<()> {
        let header = RtHeader::new(rt_type::ACK, 4, 0);
        self.ack[..RT_HEADER_LEN].copy_from_slice(&header.encode());
        self.ack[RT_HEADER_LEN..].copy_from_slice(&sequence.to_le_bytes());
        send_all(&mut self.transport, &self.ack, "ack")
    }

    fn send_control(&mut self, code: u16, what: &'static str) -> Result<()> {
        let header = RtHeader::new(code, 0, 0).encode();
        send_all(&mut self.transport, &header, what)
    }
}

impl<T: RtTransport> Drop for RtConnection<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Failed to close RT connection: {}", e);
        }
    }
}

/// Write all of `data`, resuming after short writes.
fn send_all<W: Write>(writer: &mut W, data: &[u8], what: &'static str) -> Result<()> {
    let mut written = 0;
    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => {
                return Err(Error::Rt(RtError::Send {
                    what,
                    source: io::Error::from(ErrorKind::WriteZero),
                }))
            }
            Ok(n) => written += n,
            Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                continue
            }
            Err(source) => return Err(RtError::Send { what, source }.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Transport that replays scripted reads and records writes.
    #[derive(Default)]
    struct Script {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
        /// Copy of every write, readable after the transport is dropped
        sent: Rc<RefCell<Vec<u8>>>,
        /// Cap on bytes accepted per write call
        write_chunk: Option<usize>,
    }

    impl Script {
        fn chunk(mut self, data: &[u8]) -> Self {
            self.reads.push_back(Ok(data.to_vec()));
            self
        }

        fn fail(mut self, kind: ErrorKind) -> Self {
            self.reads.push_back(Err(io::Error::from(kind)));
            self
        }
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.reads.push_front(Ok(data.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.write_chunk.map_or(buf.len(), |c| c.min(buf.len()));
            self.written.extend_from_slice(&buf[..n]);
            self.sent.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl RtTransport for Script {
        fn set_nonblocking(&self, _nonblocking: bool) -> io::Result<()> {
            Ok(())
        }
    }

    fn message(code: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = RtHeader::new(code, payload.len() as u16, seq).encode().to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn hello(reliable: bool) -> Vec<u8> {
        message(rt_type::HELLO, 0, &[reliable as u8])
    }

    #[test]
    fn test_hello_sets_reliability() {
        let conn = RtConnection::handshake(Script::default().chunk(&hello(true))).unwrap();
        assert!(conn.is_reliable());

        let conn = RtConnection::handshake(Script::default().chunk(&hello(false))).unwrap();
        assert!(!conn.is_reliable());
    }

    #[test]
    fn test_deny_without_reason_is_unknown() {
        let script = Script::default().chunk(&RtHeader::new(rt_type::DENY, 1, 0).encode());
        let err = RtConnection::handshake(script).err().unwrap();
        assert!(matches!(
            err,
            Error::Rt(RtError::ConnectionDenied {
                reason: DenyReason::Unknown(_)
            })
        ));
    }

    #[test]
    fn test_unexpected_greeting() {
        for greeting in [message(rt_type::START, 0, &[]), message(rt_type::HELLO, 0, &[])] {
            let script = Script::default().chunk(&greeting);
            let sent = Rc::clone(&script.sent);
            let err = RtConnection::handshake(script).err().unwrap();
            assert!(matches!(err, Error::Rt(RtError::Protocol { .. })));
            // No CLOSE goes to a peer that broke the handshake
            assert!(sent.borrow().is_empty());
        }
    }

    #[test]
    fn test_header_split_across_reads() {
        let status = message(rt_type::STATUS, 0, &[1, 0, 5, 0]);
        let script = Script::default()
            .chunk(&hello(false))
            .chunk(&status[..3])
            .chunk(&status[3..7])
            .chunk(&status[7..]);
        let mut conn = RtConnection::handshake(script).unwrap();

        let mut packet = Packet::new();
        assert_eq!(conn.read_message(&mut packet, true).unwrap(), Some(4));
        assert_eq!(packet.format(), RecordFormat::Status);
        assert_eq!(packet.payload(), Some(&[1u8, 0, 5, 0][..]));
    }

    #[test]
    fn test_would_block_keeps_partial_header() {
        let duck = message(rt_type::DUCK, 0, &[9; 6]);
        let script = Script::default()
            .chunk(&hello(false))
            .chunk(&duck[..5])
            .fail(ErrorKind::WouldBlock)
            .fail(ErrorKind::Interrupted)
            .chunk(&duck[5..]);
        let mut conn = RtConnection::handshake(script).unwrap();

        let mut packet = Packet::new();
        assert!(conn.read_message(&mut packet, false).unwrap_err().is_would_block());
        assert_eq!(conn.read_message(&mut packet, false).unwrap(), Some(6));
        assert_eq!(packet.format(), RecordFormat::Duck);
    }

    #[test]
    fn test_unknown_control_is_skipped() {
        let script = Script::default()
            .chunk(&hello(false))
            .chunk(&message(rt_type::PAUSE, 0, &[1, 2, 3]))
            .chunk(&message(600, 0, &[]))
            .chunk(&message(rt_type::END_DATA, 0, &[]));
        let mut conn = RtConnection::handshake(script).unwrap();

        assert_eq!(conn.read_message(&mut Packet::new(), true).unwrap(), None);
    }

    #[test]
    fn test_legacy_data_rejected() {
        let script = Script::default()
            .chunk(&hello(false))
            .chunk(&message(rt_type::DATA_LEGACY_ETH, 0, &[0; 10]));
        let mut conn = RtConnection::handshake(script).unwrap();

        let err = conn.read_message(&mut Packet::new(), true).unwrap_err();
        assert!(matches!(
            err,
            Error::Rt(RtError::UnsupportedLegacyEmbedding { rt_type: 1008 })
        ));
    }

    #[test]
    fn test_unknown_data_type_is_protocol_error() {
        let script = Script::default()
            .chunk(&hello(false))
            .chunk(&message(1500, 0, &[0; 4]));
        let mut conn = RtConnection::handshake(script).unwrap();

        let err = conn.read_message(&mut Packet::new(), true).unwrap_err();
        assert!(matches!(err, Error::Rt(RtError::Protocol { .. })));
    }

    #[test]
    fn test_close_before_message_complete() {
        let status = message(rt_type::STATUS, 0, &[1, 0, 5, 0]);
        let script = Script::default().chunk(&hello(false)).chunk(&status[..10]);
        let mut conn = RtConnection::handshake(script).unwrap();

        let err = conn.read_message(&mut Packet::new(), true).unwrap_err();
        assert!(matches!(err, Error::Rt(RtError::Recv { .. })));
    }

    #[test]
    fn test_ack_survives_short_writes() {
        let pcap = Packet::pcap(1, 1, 0, 4, &[1, 2, 3, 4]);
        let mut script = Script::default()
            .chunk(&hello(true))
            .chunk(&message(pcap.rt_type(), 77, pcap.buffer()));
        script.write_chunk = Some(5);
        let mut conn = RtConnection::handshake(script).unwrap();

        let mut packet = Packet::new();
        assert_eq!(conn.read_message(&mut packet, true).unwrap(), Some(20));
        assert_eq!(packet.format(), RecordFormat::Pcap { dlt: 1 });
        assert_eq!(packet.payload(), Some(&[1u8, 2, 3, 4][..]));

        let mut expected = RtHeader::new(rt_type::ACK, 4, 0).encode().to_vec();
        expected.extend_from_slice(&77u32.to_le_bytes());
        assert_eq!(conn.transport().written, expected);
    }

    #[test]
    fn test_start_and_close_messages() {
        let mut conn = RtConnection::handshake(Script::default().chunk(&hello(false))).unwrap();
        conn.start().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();

        let mut expected = RtHeader::new(rt_type::START, 0, 0).encode().to_vec();
        expected.extend_from_slice(&RtHeader::new(rt_type::CLOSE, 0, 0).encode());
        assert_eq!(conn.transport().written, expected);
    }
}
