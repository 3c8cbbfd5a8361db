//! Feed session state machine.
//!
//! A `FeedSession` models one physical connection to the feed. The transport
//! layer turns socket readiness into `SessionEvent`s; `FeedSession::dispatch`
//! consumes one event at a time and answers with the `SessionAction`s the
//! supervisor must carry out (write a frame, forward a document, ...).
//! Dispatch never touches a socket, which keeps every protocol rule testable
//! without a network.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected -> Connecting -> Established -> Closed | Errored
//! ```
//!
//! `Closed` and `Errored` are terminal. The supervisor replaces the whole
//! session on reconnect; a terminal session ignores every further event, so
//! each session reports its end exactly once.
use feed_common::protocol::{InboundMessage, OutboundFrame};
use log::{debug, info, warn};

/// Lifecycle state of one feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh session, no connect attempted yet.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done, frames flow.
    Established,
    /// Closed by the peer or the transport.
    Closed,
    /// Failed to connect or broke mid-session.
    Errored,
}

impl SessionState {
    /// `Closed` and `Errored` end a session.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

/// Readiness notifications produced by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed.
    Connected,
    /// One complete inbound frame.
    Readable(Vec<u8>),
    /// The connection can take an outbound frame.
    WritableReady,
    /// The peer or the transport closed the connection.
    Closed,
    /// Connect failure or mid-session transport error.
    Error(String),
}

/// Work the supervisor performs on behalf of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Write a frame to the feed.
    Send(OutboundFrame),
    /// Hand an encoded document to the local channel.
    Forward(Vec<u8>),
    /// Deliver a `WritableReady` event back to this session.
    RequestWritable,
    /// The session reached a terminal state.
    Terminated(SessionState),
}

/// Client identifier assigned by the feed.
///
/// Survives reconnects: the supervisor owns it and lends it to whichever
/// session is current. Only `welcome` writes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    client_id: String,
}

impl ClientIdentity {
    /// The assigned identifier, or `None` while unassigned.
    pub fn get(&self) -> Option<&str> {
        if self.client_id.is_empty() {
            None
        } else {
            Some(&self.client_id)
        }
    }

    /// Overwrites the identifier.
    pub fn assign(&mut self, client_id: &str) {
        self.client_id.clear();
        self.client_id.push_str(client_id);
    }
}

/// Per-session frame counters, logged when the session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames received while established.
    pub frames: u64,
    /// Documents handed to the local channel.
    pub forwarded: u64,
    /// Frames dropped for exceeding the size limit.
    pub oversized: u64,
    /// Frames that were not valid JSON.
    pub malformed: u64,
    /// Valid documents with no handler.
    pub ignored: u64,
}

/// One connection's protocol state.
#[derive(Debug)]
pub struct FeedSession {
    state: SessionState,
    registered: bool,
    max_frame_size: usize,
    stats: SessionStats,
}

impl FeedSession {
    /// Creates a session in `Disconnected`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: SessionState::Disconnected,
            registered: false,
            max_frame_size,
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Counters collected so far.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Marks the start of the handshake. Returns `false` if the session was
    /// not fresh.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != SessionState::Disconnected {
            warn!("connect requested in state {:?}", self.state);
            return false;
        }
        self.state = SessionState::Connecting;
        true
    }

    /// Applies one transport event and returns the resulting actions.
    pub fn dispatch(
        &mut self,
        event: SessionEvent,
        identity: &mut ClientIdentity,
    ) -> Vec<SessionAction> {
        if self.state.is_terminal() {
            debug!("event {:?} after session end ignored", event);
            return Vec::new();
        }

        match event {
            SessionEvent::Connected => {
                if self.state != SessionState::Connecting {
                    warn!("unexpected connect notification in state {:?}", self.state);
                    return Vec::new();
                }
                info!("Feed connection established");
                self.state = SessionState::Established;
                self.registered = false;
                vec![SessionAction::RequestWritable]
            }
            SessionEvent::WritableReady => {
                if self.state != SessionState::Established || self.registered {
                    return Vec::new();
                }
                self.registered = true;
                vec![SessionAction::Send(OutboundFrame::register())]
            }
            SessionEvent::Readable(frame) => {
                if self.state != SessionState::Established {
                    debug!("frame received before establishment dropped");
                    return Vec::new();
                }
                self.handle_frame(&frame, identity).into_iter().collect()
            }
            SessionEvent::Closed => {
                info!("Feed connection closed");
                self.state = SessionState::Closed;
                vec![SessionAction::Terminated(SessionState::Closed)]
            }
            SessionEvent::Error(reason) => {
                warn!("Feed connection error: {}", reason);
                self.state = SessionState::Errored;
                vec![SessionAction::Terminated(SessionState::Errored)]
            }
        }
    }

    fn handle_frame(
        &mut self,
        frame: &[u8],
        identity: &mut ClientIdentity,
    ) -> Option<SessionAction> {
        self.stats.frames += 1;

        if frame.len() >= self.max_frame_size {
            self.stats.oversized += 1;
            warn!(
                "Oversized frame dropped: {} bytes (limit {})",
                frame.len(),
                self.max_frame_size
            );
            return None;
        }

        let message = match InboundMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed += 1;
                debug!("Malformed frame dropped: {}", e);
                return None;
            }
        };

        match message {
            InboundMessage::Welcome { client_id: Some(id) } => {
                identity.assign(&id);
                info!("Assigned client_id: {}", id);
                None
            }
            InboundMessage::Welcome { client_id: None } => {
                warn!("welcome without a client_id ignored");
                None
            }
            InboundMessage::Ping => match identity.get() {
                Some(id) => {
                    debug!("Answering ping as {}", id);
                    Some(SessionAction::Send(OutboundFrame::pong(id)))
                }
                None => {
                    warn!("Can't respond to ping: client_id not assigned yet");
                    None
                }
            },
            InboundMessage::Forwardable { kind, document } => {
                match serde_json::to_vec(&document) {
                    Ok(bytes) => {
                        self.stats.forwarded += 1;
                        debug!("Forwarding {} ({} bytes)", kind, bytes.len());
                        Some(SessionAction::Forward(bytes))
                    }
                    Err(e) => {
                        warn!("Failed to re-encode {}: {}", kind, e);
                        None
                    }
                }
            }
            InboundMessage::Unrecognized { type_name } => {
                self.stats.ignored += 1;
                debug!("Ignoring message of type {:?}", type_name);
                None
            }
        }
    }
}
