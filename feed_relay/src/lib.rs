//! Feed relay agent.
//!
//! Keeps one WebSocket connection to the market feed alive, answers its
//! heartbeat protocol and relays `alert` and `symbol_update` documents to a
//! single local reader:
//!
//! - `channel` — the local forwarding endpoint (`LocalChannel`).
//! - `session` — per-connection protocol state machine (`FeedSession`).
//! - `transport` — tungstenite-backed connector and event source.
//! - `supervisor` — the event loop and reconnect scheduling.
//! - `shutdown` — signal-safe shutdown flag with wake-up.
//! - `args` — command-line overrides for the fixed parameters.
#![warn(missing_docs)]
pub mod args;
pub mod channel;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod transport;
