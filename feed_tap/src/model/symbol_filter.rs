//! Suppresses repeated `symbol_update` documents.
//!
//! The feed re-sends the full symbol list whenever anything changes upstream,
//! often several times in a row with identical content. An update is a
//! duplicate when its symbol list equals the previous one and arrived within
//! the expiry window.
use std::time::{Duration, Instant};

/// Remembers the last symbol list and when it was seen.
#[derive(Debug)]
pub struct SymbolUpdateFilter {
    expiry: Duration,
    last: Option<(String, Instant)>,
}

impl SymbolUpdateFilter {
    /// Creates a filter with the given duplicate window.
    pub fn new(expiry: Duration) -> Self {
        Self { expiry, last: None }
    }

    /// Records `symbols` and returns `true` if it should be acted on.
    pub fn accept(&mut self, symbols: &str, now: Instant) -> bool {
        if let Some((last, seen_at)) = &self.last {
            if last == symbols && now.duration_since(*seen_at) < self.expiry {
                return false;
            }
        }
        self.last = Some((symbols.to_string(), now));
        true
    }
}
