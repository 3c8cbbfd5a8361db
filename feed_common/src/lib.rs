//!
//! Common types and utilities shared by the feed relay agent and the tap.
//!
//! This crate aggregates:
//! - `error` — unified error type `RelayError` used across the workspace.
//! - `result` — handy `Result<T, RelayError>` alias.
//! - `protocol` — inbound feed messages and outbound frames.
//! - `net` — fixed connection parameters and small address helpers.
#![warn(missing_docs)]
pub mod error;
pub mod result;
pub mod protocol;
pub mod net;

pub use error::RelayError;
pub use result::Result;
pub use protocol::{InboundMessage, MessageKind, OutboundFrame};
