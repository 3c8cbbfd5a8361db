//! Result type alias shared across the workspace.
//!
//! Functions can simply return `Result<T>`; the error defaults to `RelayError`.
use crate::error::RelayError;

/// Workspace-wide `Result` alias with `RelayError` as the default error.
pub type Result<T, E = RelayError> = std::result::Result<T, E>;
