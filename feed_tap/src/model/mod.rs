//! Data model for documents read from the local channel.
//!
//! - `alert` — human-readable summary of an `alert` document.
//! - `symbol_filter` — duplicate suppression for `symbol_update` documents.
pub mod alert;
pub mod symbol_filter;
