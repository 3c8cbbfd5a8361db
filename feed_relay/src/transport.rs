//! WebSocket transport for the feed.
//!
//! `Connector` builds a connection, `FeedTransport` turns it into
//! `SessionEvent`s. The production pair is `WsConnector`/`WsTransport` on top
//! of blocking `tungstenite` with a short read timeout, so one call to
//! `poll_event` never waits longer than the poll interval.
//!
//! Connecting is the one long operation. The TCP connect runs on a helper
//! thread and the handshake is stepped one poll interval at a time, so a
//! shutdown request is noticed within a poll interval either way.
use std::io::{self, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};
use feed_common::{RelayError, Result};
use log::{debug, info};
use tungstenite::client::IntoClientRequest;
use tungstenite::handshake::client::Request;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::{HandshakeError, Message, WebSocket};

use crate::session::SessionEvent;
use crate::shutdown::ShutdownHandle;

/// An established connection seen as a source of session events.
pub trait FeedTransport {
    /// Waits at most one poll interval for the next event.
    fn poll_event(&mut self) -> Option<SessionEvent>;

    /// Writes one text frame.
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Best-effort close; errors are swallowed.
    fn close(&mut self);
}

/// Opens connections to the feed.
pub trait Connector {
    /// Transport produced by a successful connect.
    type Transport: FeedTransport;

    /// Connects and completes the handshake. Every error is recoverable.
    /// Returns `RelayError::Interrupted` if `shutdown` triggers first.
    fn connect(&mut self, shutdown: &ShutdownHandle) -> Result<Self::Transport>;
}

/// Connects to `ws://host:port/path` announcing a sub-protocol.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    authority: String,
    protocol: HeaderValue,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl WsConnector {
    /// Validates the request parameters up front. An error here means the
    /// configuration itself is unusable.
    pub fn new(
        url: &str,
        protocol: &str,
        connect_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self> {
        let protocol = HeaderValue::from_str(protocol)
            .map_err(|e| RelayError::InvalidRequest(format!("sub-protocol {protocol:?}: {e}")))?;

        let request = url
            .into_client_request()
            .map_err(|e| RelayError::InvalidRequest(format!("{url}: {e}")))?;
        let uri = request.uri();
        let host = uri
            .host()
            .ok_or_else(|| RelayError::InvalidRequest(format!("{url}: missing host")))?;
        let port = uri.port_u16().unwrap_or(80);
        let authority = format!("{}:{}", host, port);

        Ok(Self {
            url: url.to_string(),
            authority,
            protocol,
            connect_timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build_request(&self) -> Result<Request> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, self.protocol.clone());
        Ok(request)
    }

    fn open_stream(&self, shutdown: &ShutdownHandle) -> Result<TcpStream> {
        let (tx, rx) = bounded(1);
        let authority = self.authority.clone();
        let timeout = self.connect_timeout;
        thread::Builder::new()
            .name(String::from("feed-connect"))
            .spawn(move || {
                let _ = tx.send(connect_any(&authority, timeout));
            })?;

        loop {
            match rx.recv_timeout(self.poll_interval) {
                Ok(result) => return Ok(result?),
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.is_requested() {
                        return Err(RelayError::Interrupted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RelayError::Format(String::from("connect thread exited")));
                }
            }
        }
    }

    fn handshake(&self, stream: TcpStream, shutdown: &ShutdownHandle) -> Result<WebSocket<TcpStream>> {
        stream.set_read_timeout(Some(self.poll_interval))?;
        stream.set_write_timeout(Some(self.poll_interval))?;
        let deadline = Instant::now() + self.connect_timeout;

        let mut attempt = tungstenite::client(self.build_request()?, stream);
        loop {
            match attempt {
                Ok((socket, _response)) => return Ok(socket),
                Err(HandshakeError::Failure(e)) => return Err(e.into()),
                Err(HandshakeError::Interrupted(mid)) => {
                    if shutdown.is_requested() {
                        return Err(RelayError::Interrupted);
                    }
                    if Instant::now() >= deadline {
                        return Err(RelayError::Format(String::from("handshake timed out")));
                    }
                    attempt = mid.handshake();
                }
            }
        }
    }
}

/// Tries every resolved address in turn. Runs off the event loop thread.
fn connect_any(authority: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in authority.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(ErrorKind::NotFound, format!("{} did not resolve", authority))
    }))
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn connect(&mut self, shutdown: &ShutdownHandle) -> Result<WsTransport> {
        info!("Connecting to {}", self.url);
        let stream = self.open_stream(shutdown)?;
        stream.set_nodelay(true)?;

        let socket = self.handshake(stream, shutdown)?;
        socket.get_ref().set_read_timeout(Some(self.poll_interval))?;
        socket.get_ref().set_write_timeout(Some(self.connect_timeout))?;
        Ok(WsTransport { socket })
    }
}

/// A live feed connection.
pub struct WsTransport {
    socket: WebSocket<TcpStream>,
}

impl FeedTransport for WsTransport {
    fn poll_event(&mut self) -> Option<SessionEvent> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Some(SessionEvent::Readable(text.into_bytes())),
            Ok(Message::Binary(data)) => Some(SessionEvent::Readable(data)),
            Ok(Message::Close(frame)) => {
                debug!("close frame from feed: {:?}", frame);
                Some(SessionEvent::Closed)
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                None
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Some(SessionEvent::Closed)
            }
            Err(e) => Some(SessionEvent::Error(e.to_string())),
        }
    }

    fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_owned()))?;
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None) {
            debug!("close handshake not sent: {}", e);
            return;
        }
        let _ = self.socket.flush();
    }
}
