//! Local forwarding channel.
//!
//! The relay writes newline-terminated JSON documents to exactly one local
//! reader. On Unix the endpoint is a domain socket path; elsewhere it is a
//! loopback TCP address. `LocalChannel::open` blocks until the reader
//! attaches, retrying endpoint creation forever with a fixed delay. Writes
//! are fire-and-forget and bounded by a write timeout. A reader that is slow
//! to drain costs only the message that did not fit; a reader that hung up
//! takes the channel down until the process restarts.
//!
//! Lines are never torn. If a timeout hits after part of a line went out, the
//! rest is kept and finished before the next message is attempted.
use std::io::{self, ErrorKind, Write};
use std::time::Duration;

use feed_common::net::WRITE_TIMEOUT_MS;
use feed_common::{RelayError, Result};
use log::{debug, info, warn};

use crate::shutdown::ShutdownHandle;

/// How often a pending accept re-checks for a reader.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Destination for forwarded documents.
pub trait ForwardSink {
    /// Delivers one document. Returns `false` if it was dropped.
    fn send(&mut self, payload: &[u8]) -> bool;

    /// Releases the underlying handle. Must be idempotent.
    fn close(&mut self) {}
}

#[cfg(unix)]
mod endpoint {
    use std::fs;
    use std::io::{self, ErrorKind};
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;

    pub type Listener = UnixListener;
    pub type Stream = UnixStream;

    /// Binds the socket path, replacing a stale socket from an earlier run.
    pub fn bind(name: &str) -> io::Result<Listener> {
        let path = Path::new(name);
        if let Ok(meta) = fs::symlink_metadata(path) {
            if !meta.file_type().is_socket() {
                return Err(io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{name} exists and is not a socket"),
                ));
            }
            fs::remove_file(path)?;
        }
        UnixListener::bind(path)
    }

    pub fn accept(listener: &Listener) -> io::Result<Stream> {
        listener.accept().map(|(stream, _)| stream)
    }

    pub fn release(name: &str) {
        let _ = fs::remove_file(name);
    }
}

#[cfg(not(unix))]
mod endpoint {
    use std::io;
    use std::net::{TcpListener, TcpStream};

    pub type Listener = TcpListener;
    pub type Stream = TcpStream;

    pub fn bind(name: &str) -> io::Result<Listener> {
        TcpListener::bind(name)
    }

    pub fn accept(listener: &Listener) -> io::Result<Stream> {
        listener.accept().map(|(stream, _)| stream)
    }

    pub fn release(_name: &str) {}
}

/// Whether a reader is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Writes go to the reader.
    Connected,
    /// Writes are dropped.
    Disconnected,
}

/// Outbound byte stream to one local reader.
#[derive(Debug)]
pub struct LocalChannel {
    endpoint: String,
    stream: Option<endpoint::Stream>,
    /// Unwritten tail of a line the reader has already started receiving.
    unfinished: Vec<u8>,
    released: bool,
}

/// Errors that mean the reader is still there but not draining.
fn is_stall(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Writes as much of `buf` as the reader accepts before the write timeout.
/// Returns the number of bytes written; only a non-stall error is an `Err`.
fn write_until_stalled<W: Write>(stream: &mut W, buf: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_stall(&e) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

impl LocalChannel {
    /// Creates the endpoint and blocks until a reader attaches.
    ///
    /// Creation and accept failures are retried every `retry_delay`. The wait
    /// is abandoned with `RelayError::Interrupted` once `shutdown` triggers.
    pub fn open(endpoint: &str, retry_delay: Duration, shutdown: &ShutdownHandle) -> Result<Self> {
        loop {
            if shutdown.is_requested() {
                return Err(RelayError::Interrupted);
            }

            let listener = match endpoint::bind(endpoint).and_then(|l| {
                l.set_nonblocking(true)?;
                Ok(l)
            }) {
                Ok(listener) => listener,
                Err(e) => {
                    warn!("Failed to create local channel {}: {}", endpoint, e);
                    if shutdown.wait(retry_delay) {
                        return Err(RelayError::Interrupted);
                    }
                    continue;
                }
            };

            info!("Waiting for reader on {}", endpoint);
            match Self::wait_for_reader(&listener, shutdown) {
                Ok(stream) => {
                    info!("Local channel reader attached");
                    return Ok(Self {
                        endpoint: endpoint.to_string(),
                        stream: Some(stream),
                        unfinished: Vec::new(),
                        released: false,
                    });
                }
                Err(RelayError::Interrupted) => {
                    endpoint::release(endpoint);
                    return Err(RelayError::Interrupted);
                }
                Err(e) => {
                    warn!("Local channel accept failed: {}, retrying", e);
                    drop(listener);
                    endpoint::release(endpoint);
                    if shutdown.wait(retry_delay) {
                        return Err(RelayError::Interrupted);
                    }
                }
            }
        }
    }

    fn wait_for_reader(
        listener: &endpoint::Listener,
        shutdown: &ShutdownHandle,
    ) -> Result<endpoint::Stream> {
        loop {
            match endpoint::accept(listener) {
                Ok(stream) => {
                    stream.set_nonblocking(false)?;
                    stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)))?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if shutdown.wait(ACCEPT_POLL) {
                        return Err(RelayError::Interrupted);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Endpoint name this channel was opened on.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current reader state.
    pub fn state(&self) -> ChannelState {
        if self.stream.is_some() {
            ChannelState::Connected
        } else {
            ChannelState::Disconnected
        }
    }

    fn disconnect(&mut self, e: &io::Error) {
        warn!("Local channel write failed: {}, reader disconnected", e);
        self.stream = None;
        self.unfinished.clear();
    }
}

impl ForwardSink for LocalChannel {
    fn send(&mut self, payload: &[u8]) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            warn!("Local channel not connected, dropping {} bytes", payload.len());
            return false;
        };

        if !self.unfinished.is_empty() {
            match write_until_stalled(stream, &self.unfinished) {
                Ok(n) => {
                    self.unfinished.drain(..n);
                }
                Err(e) => {
                    self.disconnect(&e);
                    return false;
                }
            }
            if !self.unfinished.is_empty() {
                warn!("Local channel reader stalled, dropping {} bytes", payload.len());
                return false;
            }
        }

        let mut line = Vec::with_capacity(payload.len() + 1);
        line.extend_from_slice(payload);
        line.push(b'\n');

        match write_until_stalled(stream, &line) {
            Ok(n) if n == line.len() => {
                debug!("Wrote {} bytes to local channel", n);
                true
            }
            Ok(0) => {
                warn!("Local channel reader stalled, dropping {} bytes", payload.len());
                false
            }
            Ok(n) => {
                debug!("Local channel reader stalled mid-line, {} bytes held back", line.len() - n);
                self.unfinished = line.split_off(n);
                true
            }
            Err(e) => {
                self.disconnect(&e);
                false
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("Local channel stream released");
        }
        if !self.released {
            endpoint::release(&self.endpoint);
            self.released = true;
        }
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.close();
    }
}
