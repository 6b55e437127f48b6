//! `rt:` input backend.

use std::net::TcpStream;
use std::os::fd::RawFd;

use crate::error::{Error, Result};
use crate::format::{EventContext, InputFormat, TraceEvent};
use crate::packet::Packet;

use super::client::RtConnection;
use super::protocol::{DEFAULT_HOST, DEFAULT_PORT};

/// Host and port named by an `rt:` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtAddress {
    pub host: String,
    pub port: u16,
}

impl RtAddress {
    /// Parse `host[:port]`; an empty string means the local collector.
    pub fn parse(data: &str) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
            });
        }
        match data.split_once(':') {
            None => Ok(Self {
                host: data.to_string(),
                port: DEFAULT_PORT,
            }),
            Some((host, port)) => {
                let port = port.parse().map_err(|_| Error::InvalidUri {
                    uri: format!("rt:{}", data),
                    reason: format!("invalid port '{}'", port),
                })?;
                let host = if host.is_empty() { DEFAULT_HOST } else { host };
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
        }
    }
}

/// Reads packets streamed by a remote RT collector.
///
/// The connection and handshake happen on open; `start` asks the server to
/// begin sending.
pub struct RtInput {
    address: RtAddress,
    connection: RtConnection<TcpStream>,
}

impl RtInput {
    /// Connect using the data part of an `rt:` URI.
    pub fn open(data: &str) -> Result<Self> {
        let address = RtAddress::parse(data)?;
        let connection = RtConnection::connect(&address.host, address.port)?;
        Ok(Self {
            address,
            connection,
        })
    }

    pub fn address(&self) -> &RtAddress {
        &self.address
    }

    pub fn is_reliable(&self) -> bool {
        self.connection.is_reliable()
    }

    /// Send close and shut the socket.
    pub fn close(&mut self) -> Result<()> {
        self.connection.close()
    }
}

impl InputFormat for RtInput {
    fn name(&self) -> &'static str {
        "rt"
    }

    fn start(&mut self) -> Result<()> {
        self.connection.start()
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<Option<usize>> {
        self.connection.read_message(packet, true)
    }

    fn fd(&self) -> Option<RawFd> {
        self.connection.fd()
    }

    fn event(&mut self, packet: &mut Packet, _ctx: &EventContext<'_>) -> Result<TraceEvent> {
        match self.connection.read_message(packet, false) {
            Ok(Some(size)) => Ok(TraceEvent::Packet { size }),
            Ok(None) => Ok(TraceEvent::Terminate),
            Err(e) if e.is_would_block() => Ok(TraceEvent::IoWait {
                fd: self.connection.fd(),
            }),
            Err(e) => Err(e),
        }
    }
}
