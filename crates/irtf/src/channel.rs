//! Loopback TCP rendezvous between the driver and one child VM at a time.
//!
//! The driver opens the channel once per scenario, passes [`Channel::property_flag`] on each
//! child's command line and calls [`Channel::begin_session`] before each launch. While the child
//! runs, the process wait loop calls [`Channel::pump`], which accepts the single connection and
//! drains whatever has been written so far without blocking. After the child exits,
//! [`Channel::receive`] waits for EOF up to the configured timeout.

use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use irtf_contracts::{SERVER_PORT_PROPERTY, STDOUT_PREFIX};
use thiserror::Error;
use tracing::debug;

const RECEIVE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to open channel: {0}")]
    Bind(#[source] std::io::Error),

    #[error("no data received on port {port}: child did not connect within {timeout_ms} ms")]
    NoConnection { port: u16, timeout_ms: u64 },

    #[error(
        "incomplete data on port {port}: connection not closed within {timeout_ms} ms \
         ({received_bytes} bytes received)"
    )]
    Incomplete {
        port: u16,
        timeout_ms: u64,
        received_bytes: usize,
    },

    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
enum Session {
    Waiting,
    Connected(TcpStream),
    Closed,
}

#[derive(Debug)]
pub struct Channel {
    listener: TcpListener,
    port: u16,
    timeout: Duration,
    session: Session,
    buf: Vec<u8>,
}

impl Channel {
    pub fn open(timeout: Duration) -> Result<Self, ChannelError> {
        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(ChannelError::Bind)?;
        listener.set_nonblocking(true).map_err(ChannelError::Bind)?;
        let port = listener.local_addr().map_err(ChannelError::Bind)?.port();
        debug!(port, "channel opened");
        Ok(Self {
            listener,
            port,
            timeout,
            session: Session::Waiting,
            buf: Vec::new(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn property_flag(&self) -> String {
        format!("-D{SERVER_PORT_PROPERTY}={}", self.port)
    }

    /// Arms the channel for the next child: the previous payload is dropped and exactly one new
    /// connection will be accepted.
    pub fn begin_session(&mut self) {
        self.session = Session::Waiting;
        self.buf.clear();
    }

    /// Accepts the child's connection if it is pending and drains available bytes. Never blocks.
    pub fn pump(&mut self) -> Result<(), ChannelError> {
        if matches!(self.session, Session::Waiting) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(true)?;
                    debug!(port = self.port, %peer, "channel accepted connection");
                    self.session = Session::Connected(stream);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }

        let Session::Connected(stream) = &mut self.session else {
            return Ok(());
        };
        let mut tmp = [0u8; 8192];
        loop {
            match stream.read(&mut tmp) {
                Ok(0) => {
                    debug!(port = self.port, bytes = self.buf.len(), "channel peer closed");
                    self.session = Session::Closed;
                    return Ok(());
                }
                Ok(n) => self.buf.extend_from_slice(&tmp[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
    }

    /// Waits until the child has written its payload and closed the connection.
    pub fn receive(&mut self) -> Result<String, ChannelError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            self.pump()?;
            if matches!(self.session, Session::Closed) {
                return Ok(String::from_utf8_lossy(&self.buf).into_owned());
            }
            if Instant::now() >= deadline {
                let timeout_ms = self.timeout.as_millis() as u64;
                return Err(match self.session {
                    Session::Waiting => ChannelError::NoConnection {
                        port: self.port,
                        timeout_ms,
                    },
                    _ => ChannelError::Incomplete {
                        port: self.port,
                        timeout_ms,
                        received_bytes: self.buf.len(),
                    },
                });
            }
            std::thread::sleep(RECEIVE_POLL);
        }
    }

    /// Like [`Channel::receive`], but lines tagged with the stdout prefix are printed on the
    /// driver's stdout instead of being returned.
    pub fn receive_split_stdout(&mut self) -> Result<String, ChannelError> {
        let payload = self.receive()?;
        let (printed, rest) = split_stdout_lines(&payload);
        for line in printed {
            println!("{line}");
        }
        Ok(rest)
    }

    pub fn close(self) {
        debug!(port = self.port, "channel closed");
    }
}

/// Separates `[STDOUT]`-tagged lines (prefix stripped) from the remaining payload.
pub fn split_stdout_lines(payload: &str) -> (Vec<&str>, String) {
    let mut printed = Vec::new();
    let mut rest = String::with_capacity(payload.len());
    for line in payload.lines() {
        if let Some(msg) = line.strip_prefix(STDOUT_PREFIX) {
            printed.push(msg.strip_prefix(' ').unwrap_or(msg));
        } else {
            rest.push_str(line);
            rest.push('\n');
        }
    }
    (printed, rest)
}

/// Child side of the channel: connects to `port`, writes `payload` and closes.
pub fn send(port: u16, payload: &str) -> std::io::Result<()> {
    use std::io::Write as _;

    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    stream.write_all(payload.as_bytes())?;
    stream.flush()?;
    stream.shutdown(std::net::Shutdown::Write)?;
    Ok(())
}
