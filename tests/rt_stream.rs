//! Integration tests for the RT client against a loopback server.
//!
//! The server side is scripted: it writes canned messages, optionally split
//! into small chunks, and records everything the client sends back.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use erftrace::erf::record::erf_type;
use erftrace::erf::ErfHeader;
use erftrace::error::{Error, RtError};
use erftrace::format::{EventContext, InputFormat, Registry, TraceEvent};
use erftrace::packet::{Packet, RecordFormat};
use erftrace::rt::{rt_type, DenyReason, RtHeader, RtInput, RT_HEADER_LEN};

fn message(code: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = RtHeader::new(code, payload.len() as u16, seq)
        .encode()
        .to_vec();
    out.extend_from_slice(payload);
    out
}

fn hello(reliable: bool) -> Vec<u8> {
    message(rt_type::HELLO, 0, &[reliable as u8, 0, 0, 0])
}

fn erf_record(secs: u64, fill: u8) -> Vec<u8> {
    let header = ErfHeader {
        ts: secs << 32,
        erf_type: erf_type::ETH,
        flags: 0,
        rlen: 0,
        lctr: 0,
        wlen: 46,
    };
    Packet::erf(header, &[fill; 46])
        .unwrap()
        .buffer()
        .to_vec()
}

/// Start a one-shot server. `script` runs on the accepted socket; afterwards
/// the server reads until the client hangs up and returns what it sent.
fn serve<F>(script: F) -> (u16, JoinHandle<Vec<u8>>)
where
    F: FnOnce(&mut TcpStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.set_nodelay(true).unwrap();
        script(&mut stream);
        let mut received = Vec::new();
        let _ = stream.read_to_end(&mut received);
        received
    });
    (port, handle)
}

/// Write `data` in pieces of `chunk` bytes with a pause between them.
fn write_chunked(stream: &mut TcpStream, data: &[u8], chunk: usize) {
    for piece in data.chunks(chunk) {
        stream.write_all(piece).unwrap();
        stream.flush().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
}

/// Split the client's byte stream into (type, sequence-or-ack) pairs.
fn client_messages(mut data: &[u8]) -> Vec<(u16, Option<u32>)> {
    let mut out = Vec::new();
    while data.len() >= RT_HEADER_LEN {
        let mut raw = [0u8; RT_HEADER_LEN];
        raw.copy_from_slice(&data[..RT_HEADER_LEN]);
        let header = RtHeader::decode(&raw);
        let end = RT_HEADER_LEN + header.length as usize;
        let body = &data[RT_HEADER_LEN..end];
        let acked = (header.rt_type == rt_type::ACK)
            .then(|| u32::from_le_bytes([body[0], body[1], body[2], body[3]]));
        out.push((header.rt_type, acked));
        data = &data[end..];
    }
    out
}

fn connect(port: u16) -> Box<dyn InputFormat> {
    Registry::new()
        .open_input(&format!("rt:127.0.0.1:{}", port))
        .unwrap()
}

#[test]
fn test_deny_reasons() {
    for (code, reason) in [
        (1u8, DenyReason::Wrapper),
        (2, DenyReason::Full),
        (3, DenyReason::Auth),
        (9, DenyReason::Unknown(9)),
    ] {
        let (port, server) = serve(move |stream| {
            stream
                .write_all(&message(rt_type::DENY, 0, &[code, 0, 0, 0]))
                .unwrap();
            let _ = stream.shutdown(std::net::Shutdown::Write);
        });

        let err = RtInput::open(&format!("127.0.0.1:{}", port)).err().unwrap();
        match err {
            Error::Rt(RtError::ConnectionDenied { reason: got }) => assert_eq!(got, reason),
            other => panic!("unexpected error: {}", other),
        }
        // A denied client sends nothing back
        assert!(server.join().unwrap().is_empty());
    }

    assert_eq!(
        DenyReason::Full.to_string(),
        "Max connections reached on server"
    );
}

#[test]
fn test_connect_refused() {
    // Bind then drop to find a port nobody listens on
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let err = RtInput::open(&format!("127.0.0.1:{}", port)).err().unwrap();
    assert!(matches!(err, Error::Rt(RtError::Connect { .. })));
}

#[test]
fn test_reassembly_and_acks() {
    let records: Vec<Vec<u8>> = (0..3).map(|i| erf_record(10 + i, i as u8)).collect();
    let mut stream_bytes = Vec::new();
    for (i, record) in records.iter().enumerate() {
        stream_bytes.extend(message(rt_type::DATA_ERF, 100 + i as u32, record));
    }
    stream_bytes.extend(message(rt_type::STATUS, 0, &[0; 8]));
    stream_bytes.extend(message(999, 0, &[1, 2, 3]));
    stream_bytes.extend(message(rt_type::END_DATA, 0, &[]));

    for chunk in [stream_bytes.len(), 7, 1] {
        let data = stream_bytes.clone();
        let (port, server) = serve(move |stream| {
            stream.write_all(&hello(true)).unwrap();
            write_chunked(stream, &data, chunk);
        });

        let mut input = connect(port);
        input.start().unwrap();

        let mut packet = Packet::new();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(input.read_packet(&mut packet).unwrap(), Some(record.len()));
            assert_eq!(packet.format(), RecordFormat::Erf);
            assert_eq!(packet.buffer(), &record[..]);
            assert_eq!(packet.payload().unwrap(), &[i as u8; 46][..]);
        }

        assert_eq!(input.read_packet(&mut packet).unwrap(), Some(8));
        assert_eq!(packet.format(), RecordFormat::Status);

        // Unknown control skipped, then end of data
        assert_eq!(input.read_packet(&mut packet).unwrap(), None);
        drop(input);

        let sent = client_messages(&server.join().unwrap());
        assert_eq!(
            sent,
            vec![
                (rt_type::START, None),
                (rt_type::ACK, Some(100)),
                (rt_type::ACK, Some(101)),
                (rt_type::ACK, Some(102)),
                (rt_type::CLOSE, None),
            ],
            "chunk size {}",
            chunk
        );
    }
}

#[test]
fn test_unreliable_server_gets_no_acks() {
    let pcap = Packet::pcap(1, 5, 0, 60, &[0x77; 60]);
    let mut data = message(pcap.rt_type(), 1, pcap.buffer());
    data.extend(message(rt_type::END_DATA, 0, &[]));
    let (port, server) = serve(move |stream| {
        stream.write_all(&hello(false)).unwrap();
        stream.write_all(&data).unwrap();
    });

    let mut input = connect(port);
    input.start().unwrap();
    let mut packet = Packet::new();
    assert!(input.read_packet(&mut packet).unwrap().is_some());
    assert_eq!(packet.format(), RecordFormat::Pcap { dlt: 1 });
    assert_eq!(packet.erf_timestamp(), Some(5 << 32));
    assert_eq!(input.read_packet(&mut packet).unwrap(), None);
    drop(input);

    let sent = client_messages(&server.join().unwrap());
    assert_eq!(sent, vec![(rt_type::START, None), (rt_type::CLOSE, None)]);
}

#[test]
fn test_event_waits_then_terminates() {
    let (go_tx, go_rx) = mpsc::channel::<()>();
    let record = erf_record(42, 0xab);
    let data = message(rt_type::DATA_ERF, 1, &record);
    let (port, server) = serve(move |stream| {
        stream.write_all(&hello(false)).unwrap();
        go_rx.recv().unwrap();
        write_chunked(stream, &data, 5);
        stream
            .write_all(&message(rt_type::END_DATA, 0, &[]))
            .unwrap();
    });

    let mut input = connect(port);
    input.start().unwrap();
    let ctx = EventContext::default();
    let mut packet = Packet::new();

    match input.event(&mut packet, &ctx).unwrap() {
        TraceEvent::IoWait { fd } => assert_eq!(fd, input.fd()),
        other => panic!("expected IoWait, got {:?}", other),
    }
    assert!(input.fd().is_some());
    go_tx.send(()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    loop {
        let event = input.event(&mut packet, &ctx).unwrap();
        match event {
            TraceEvent::IoWait { .. } => thread::sleep(Duration::from_millis(1)),
            TraceEvent::Packet { size } => {
                assert_eq!(size, record.len());
                assert_eq!(packet.erf_header().unwrap().seconds(), 42);
                events.push(event);
            }
            TraceEvent::Terminate => {
                events.push(event);
                break;
            }
            TraceEvent::Sleep(_) => panic!("rt inputs never sleep"),
        }
        assert!(Instant::now() < deadline, "timed out waiting for data");
    }
    assert_eq!(
        events,
        vec![
            TraceEvent::Packet {
                size: record.len()
            },
            TraceEvent::Terminate
        ]
    );

    drop(input);
    server.join().unwrap();
}
