//! Session supervisor: the relay's only event loop.
//!
//! One thread drives everything. Each turn of the loop services at most one
//! event: a queued follow-up (`WritableReady`, a send failure), otherwise one
//! poll of the live transport, otherwise an idle wait until the reconnect
//! deadline or a shutdown wake. Frame handling, reconnect scheduling and local
//! channel writes all run inline, so the session and the client identity are
//! never shared between threads.
//!
//! Reconnects are deferred: when a session ends the supervisor records a
//! deadline `reconnect_delay` in the future. Only one deadline is pending at a
//! time, and reaching it replaces the session with a fresh one.
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use feed_common::net::{MAX_FRAME_SIZE, POLL_INTERVAL_MS, RECONNECT_DELAY_SECS};
use feed_common::protocol::OutboundFrame;
use log::{debug, error, info, warn};

use crate::channel::ForwardSink;
use crate::session::{ClientIdentity, FeedSession, SessionAction, SessionEvent, SessionState};
use crate::shutdown::ShutdownHandle;
use crate::transport::{Connector, FeedTransport};

/// Tunables for the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay between a session ending and the next connect.
    pub reconnect_delay: Duration,
    /// Inbound frame size limit handed to every session.
    pub max_frame_size: usize,
    /// Longest idle wait while no connection is live.
    pub idle_poll: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY_SECS),
            max_frame_size: MAX_FRAME_SIZE,
            idle_poll: Duration::from_millis(POLL_INTERVAL_MS),
        }
    }
}

/// One-shot reconnect deadline.
#[derive(Debug, Clone)]
pub struct ReconnectTimer {
    delay: Duration,
    deadline: Option<Instant>,
    scheduled: u64,
}

impl ReconnectTimer {
    /// Creates an idle timer.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
            scheduled: 0,
        }
    }

    /// Arms the timer relative to `now`. Returns `false` if one is already pending.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        self.scheduled += 1;
        true
    }

    /// Whether a reconnect is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the pending deadline has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Time left until the deadline, if one is pending.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Disarms the timer.
    pub fn clear(&mut self) {
        self.deadline = None;
    }

    /// Total number of reconnects ever scheduled.
    pub fn scheduled_count(&self) -> u64 {
        self.scheduled
    }
}

/// Owns the feed connection lifecycle and routes documents to the sink.
pub struct Supervisor<C: Connector, S: ForwardSink> {
    connector: C,
    sink: S,
    config: SupervisorConfig,
    shutdown: ShutdownHandle,
    identity: ClientIdentity,
    session: FeedSession,
    transport: Option<C::Transport>,
    reconnect: ReconnectTimer,
    pending: VecDeque<SessionEvent>,
    now: Instant,
}

impl<C: Connector, S: ForwardSink> Supervisor<C, S> {
    /// Creates a supervisor with a fresh, unconnected session.
    pub fn new(connector: C, sink: S, config: SupervisorConfig, shutdown: ShutdownHandle) -> Self {
        Self {
            connector,
            sink,
            config,
            shutdown,
            identity: ClientIdentity::default(),
            session: FeedSession::new(config.max_frame_size),
            transport: None,
            reconnect: ReconnectTimer::new(config.reconnect_delay),
            pending: VecDeque::new(),
            now: Instant::now(),
        }
    }

    /// Connects, services events until shutdown, then releases everything.
    pub fn run(&mut self) {
        if !self.shutdown.is_requested() {
            self.start();
        }
        while !self.shutdown.is_requested() {
            self.turn();
        }
        info!("Shutdown requested, stopping supervisor");
        self.close();
    }

    /// Makes the first connect attempt.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    pub(crate) fn start_at(&mut self, now: Instant) {
        self.now = now;
        self.connect();
    }

    /// One bounded service call.
    pub fn turn(&mut self) {
        self.turn_at(Instant::now());
    }

    pub(crate) fn turn_at(&mut self, now: Instant) {
        self.now = now;

        if let Some(event) = self.pending.pop_front() {
            self.handle(event);
            return;
        }

        if let Some(transport) = self.transport.as_mut() {
            if let Some(event) = transport.poll_event() {
                self.handle(event);
            }
            return;
        }

        if self.reconnect.is_due(now) {
            self.reconnect();
            return;
        }

        let wait = self
            .reconnect
            .remaining(now)
            .map_or(self.config.idle_poll, |left| left.min(self.config.idle_poll));
        self.shutdown.wait(wait);
    }

    /// Stops `run` at its next turn. Callable from any thread.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// A handle that stops this supervisor, e.g. for a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Releases the transport and the sink. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.pending.clear();
        self.reconnect.clear();
        self.sink.close();
    }

    /// State of the current session.
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Identity assigned by the feed so far.
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Reconnect bookkeeping.
    pub fn reconnect_timer(&self) -> &ReconnectTimer {
        &self.reconnect
    }

    /// Whether a transport is live.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// The forwarding sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn connect(&mut self) {
        if !self.session.begin_connect() {
            return;
        }
        match self.connector.connect(&self.shutdown) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.handle(SessionEvent::Connected);
            }
            Err(e) => self.handle(SessionEvent::Error(format!("connect failed: {e}"))),
        }
    }

    fn reconnect(&mut self) {
        info!("Reconnecting to feed");
        self.reconnect.clear();
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.pending.clear();
        self.session = FeedSession::new(self.config.max_frame_size);
        self.connect();
    }

    fn handle(&mut self, event: SessionEvent) {
        for action in self.session.dispatch(event, &mut self.identity) {
            match action {
                SessionAction::Send(frame) => self.send_frame(&frame),
                SessionAction::Forward(document) => self.on_forwardable(&document),
                SessionAction::RequestWritable => {
                    self.pending.push_back(SessionEvent::WritableReady)
                }
                SessionAction::Terminated(state) => self.on_session_closed(state),
            }
        }
    }

    fn send_frame(&mut self, frame: &OutboundFrame) {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode outbound frame: {}", e);
                return;
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            warn!("No live connection, dropping {}", text);
            return;
        };
        match transport.send_text(&text) {
            Ok(()) => debug!("Sent {}", text),
            Err(e) => self
                .pending
                .push_back(SessionEvent::Error(format!("send failed: {e}"))),
        }
    }

    fn on_forwardable(&mut self, document: &[u8]) {
        if !self.sink.send(document) {
            debug!("Forwarded document dropped");
        }
    }

    fn on_session_closed(&mut self, state: SessionState) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.pending.clear();

        let stats = self.session.stats();
        info!(
            "Session ended ({:?}): {} frames, {} forwarded, {} oversized, {} malformed",
            state, stats.frames, stats.forwarded, stats.oversized, stats.malformed
        );

        if self.shutdown.is_requested() {
            return;
        }
        if self.reconnect.schedule(self.now) {
            warn!(
                "Feed disconnected, reconnecting in {:.1}s",
                self.config.reconnect_delay.as_secs_f64()
            );
        }
    }
}
