// src/instruments/scpi.rs
use crate::error::InstrumentError;
use log::{debug, info};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// How a reply is delimited on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framing {
    /// Command sent as-is, reply is whatever one read returns (max 1024 bytes).
    Packet,
    /// Command and reply are newline terminated.
    Line,
}

/// Blocking TCP session to a text-command instrument.
///
/// Connect uses a 10 s timeout; every read/write after that uses 2 s, so a
/// dead instrument surfaces as an `InstrumentError::Io` instead of a hang.
pub struct ScpiLink {
    addr: String,
    framing: Framing,
    reader: BufReader<TcpStream>,
}

impl ScpiLink {
    pub fn connect(host: &str, port: u16, framing: Framing) -> Result<Self, InstrumentError> {
        let addr = format!("{host}:{port}");
        let sock = addr
            .to_socket_addrs()
            .map_err(|_| InstrumentError::Address(addr.clone()))?
            .next()
            .ok_or_else(|| InstrumentError::Address(addr.clone()))?;
        let stream = TcpStream::connect_timeout(&sock, CONNECT_TIMEOUT).map_err(|source| {
            InstrumentError::Connect {
                addr: addr.clone(),
                source,
            }
        })?;
        let io_err = |source| InstrumentError::Io {
            addr: addr.clone(),
            source,
        };
        stream.set_read_timeout(Some(IO_TIMEOUT)).map_err(io_err)?;
        stream.set_write_timeout(Some(IO_TIMEOUT)).map_err(io_err)?;
        stream.set_nodelay(true).map_err(io_err)?;
        info!("Connected to {addr}");

        Ok(Self {
            addr,
            framing,
            reader: BufReader::new(stream),
        })
    }

    pub fn send(&mut self, cmd: &str) -> Result<(), InstrumentError> {
        let framing = self.framing;
        let stream = self.reader.get_mut();
        let res = match framing {
            Framing::Packet => stream.write_all(cmd.as_bytes()),
            Framing::Line => stream
                .write_all(cmd.as_bytes())
                .and_then(|_| stream.write_all(b"\n")),
        };
        res.and_then(|_| stream.flush()).map_err(|e| self.io(e))
    }

    /// Sends `cmd` and returns the right-trimmed reply.
    pub fn query(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        self.send(cmd)?;
        let reply = match self.framing {
            Framing::Packet => {
                let mut buf = [0u8; 1024];
                let n = self.reader.read(&mut buf).map_err(|e| self.io(e))?;
                String::from_utf8_lossy(&buf[..n]).into_owned()
            }
            Framing::Line => {
                let mut line = String::new();
                self.reader.read_line(&mut line).map_err(|e| self.io(e))?;
                line
            }
        };
        let reply = reply.trim_end().to_owned();
        debug!("[{}] {cmd} -> {reply}", self.addr);
        Ok(reply)
    }

    fn io(&self, source: std::io::Error) -> InstrumentError {
        InstrumentError::Io {
            addr: self.addr.clone(),
            source,
        }
    }
}

impl Drop for ScpiLink {
    fn drop(&mut self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        info!("Disconnected from {}", self.addr);
    }
}

/// Parses a numeric reply, tolerating surrounding whitespace.
pub fn parse_number(reply: &str) -> Result<f64, InstrumentError> {
    reply
        .trim()
        .parse::<f64>()
        .map_err(|_| InstrumentError::BadReply(reply.to_owned()))
}
