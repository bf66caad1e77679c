//! Client for the local strip relay: a persistent duplex TCP connection
//! carrying one JSON message per line in each direction.
//!
//! The relay is found by probing a few well-known localhost ports until one
//! answers the handshake. Lost frames are fine; a failed send just drops the
//! connection so the next tick reconnects.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// Ports the relay process may be listening on, probed in order.
pub const RELAY_PORTS: &[u16] = &[7120, 7121, 7122];

const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(250);
/// How long to wait for a frame acknowledgment before declaring failure.
const ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
struct Hello {
    hello: bool,
}

#[derive(Serialize)]
struct FrameMessage<'a> {
    addr: &'a str,
    pixels: Vec<[u8; 3]>,
}

#[derive(Deserialize)]
struct Ack {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct RelayClient {
    ports: Vec<u16>,
    conn: Option<Conn>,
}

struct Conn {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl RelayClient {
    pub fn new() -> Self {
        Self::with_ports(RELAY_PORTS)
    }

    /// Probe a custom port list. Tests point this at ports nothing listens on.
    pub fn with_ports(ports: &[u16]) -> Self {
        Self { ports: ports.to_vec(), conn: None }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Send one frame as an addressed message and wait for the ack.
    /// Returns false on any failure; the connection is dropped so the next
    /// call starts fresh.
    pub fn send_frame(&mut self, addr: &str, frame: &[Rgb]) -> bool {
        if self.conn.is_none() {
            match self.connect() {
                Ok(conn) => self.conn = Some(conn),
                Err(e) => {
                    debug!("relay unavailable: {e:#}");
                    return false;
                }
            }
        }

        let msg = FrameMessage {
            addr,
            pixels: frame.iter().map(|px| [px.0, px.1, px.2]).collect(),
        };
        let Some(conn) = self.conn.as_mut() else { return false };
        match conn.round_trip(&msg) {
            Ok(ack) if ack.success => true,
            Ok(ack) => {
                warn!(
                    "relay refused frame for {addr}: {}",
                    ack.error.as_deref().unwrap_or("unknown error")
                );
                false
            }
            Err(e) => {
                debug!("relay send failed, dropping connection: {e:#}");
                self.conn = None;
                false
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Try each known port in turn until one accepts the handshake.
    fn connect(&self) -> Result<Conn> {
        for &port in &self.ports {
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            let stream = match TcpStream::connect_timeout(&addr, HANDSHAKE_TIMEOUT) {
                Ok(s) => s,
                Err(e) => {
                    trace!("relay port {port}: {e}");
                    continue;
                }
            };
            match Conn::handshake(stream) {
                Ok(conn) => {
                    debug!("connected to strip relay on port {port}");
                    return Ok(conn);
                }
                Err(e) => trace!("relay handshake on port {port} failed: {e:#}"),
            }
        }
        bail!("no strip relay answering on ports {:?}", self.ports)
    }
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Conn {
    fn handshake(stream: TcpStream) -> Result<Self> {
        stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        let mut conn = Self { stream, reader };

        let ack: Ack = conn.round_trip(&Hello { hello: true })?;
        if !ack.success {
            bail!("relay rejected handshake: {:?}", ack.error);
        }
        conn.stream.set_read_timeout(Some(ACK_TIMEOUT))?;
        Ok(conn)
    }

    /// Write one JSON line, read one JSON line back.
    fn round_trip<T: Serialize>(&mut self, msg: &T) -> Result<Ack> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        self.stream
            .write_all(line.as_bytes())
            .context("writing to relay")?;

        let mut reply = String::new();
        let n = self
            .reader
            .read_line(&mut reply)
            .context("awaiting relay ack")?;
        if n == 0 {
            bail!("relay closed the connection");
        }
        serde_json::from_str(reply.trim_end()).context("decoding relay ack")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn unreachable_ports_report_failure_not_hang() {
        init_logging();
        // port 1 is never listening on localhost in the test environment
        let mut relay = RelayClient::with_ports(&[1]);
        assert!(!relay.send_frame("10.0.0.2", &[Rgb::RED]));
        assert!(!relay.is_connected());
    }

    #[test]
    fn frames_are_acked_over_a_live_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let mut seen = Vec::new();
            for _ in 0..2 {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                seen.push(line);
                out.write_all(b"{\"success\":true}\n").unwrap();
            }
            seen
        });

        let mut relay = RelayClient::with_ports(&[port]);
        assert!(relay.send_frame("10.0.0.2", &[Rgb::RED, Rgb::OFF]));
        assert!(relay.is_connected());

        let seen = server.join().unwrap();
        // first line is the handshake, second the addressed frame
        assert!(seen[0].contains("hello"));
        assert!(seen[1].contains("\"addr\":\"10.0.0.2\""));
        assert!(seen[1].contains("[255,0,0]"));
    }

    #[test]
    fn relay_refusal_returns_false_but_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut out = stream;
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            out.write_all(b"{\"success\":true}\n").unwrap();
            line.clear();
            reader.read_line(&mut line).unwrap();
            out.write_all(b"{\"success\":false,\"error\":\"busy\"}\n").unwrap();
        });

        let mut relay = RelayClient::with_ports(&[port]);
        assert!(!relay.send_frame("10.0.0.2", &[Rgb::RED]));
        assert!(relay.is_connected());
    }
}
