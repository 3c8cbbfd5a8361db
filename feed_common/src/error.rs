//! Error types shared between the relay and the tap.
//!
//! `RelayError` covers local I/O, JSON encoding, the WebSocket layer and the
//! few logical failures the binaries report, so every crate can propagate a
//! single error type with `?`.
use std::io;

use thiserror::Error;

/// Unified error type shared by the relay and the tap.
#[derive(Error, Debug)]
pub enum RelayError {
    /// I/O error from sockets, the local channel or the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Handshake or framing failure reported by the WebSocket layer.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    /// The connect request for the remote feed could not be built.
    #[error("Invalid feed request: {0}")]
    InvalidRequest(String),

    /// Generic formatting/validation error with a human-readable message.
    #[error("Format error: {0}")]
    Format(String),

    /// A blocking wait was abandoned because shutdown was requested.
    #[error("Interrupted by shutdown")]
    Interrupted,
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> Self {
        RelayError::WebSocket(Box::new(err))
    }
}
