//! Fixed connection parameters shared by the relay and the tap.
//!
//! These are the defaults behind every command-line flag; nothing is loaded
//! from files at runtime.

/// Remote feed host.
pub const FEED_HOST: &str = "172.232.155.62";
/// Remote feed port.
pub const FEED_PORT: u16 = 8000;
/// WebSocket path on the remote feed.
pub const FEED_PATH: &str = "/ws";
/// Sub-protocol token announced in the handshake.
pub const FEED_PROTOCOL: &str = "mtp-protocol";
/// Role announced in the `register` frame.
pub const CLIENT_ROLE: &str = "client";

/// Well-known name of the local forwarding channel.
#[cfg(unix)]
pub const LOCAL_ENDPOINT: &str = "/tmp/mtp_pipe.sock";
/// Well-known name of the local forwarding channel.
#[cfg(not(unix))]
pub const LOCAL_ENDPOINT: &str = "127.0.0.1:8765";

/// Delay before a dropped feed connection is re-established.
pub const RECONNECT_DELAY_SECS: u64 = 3;
/// Delay between attempts to create the local channel.
pub const CHANNEL_RETRY_DELAY_SECS: u64 = 3;
/// Inbound frames of this size or larger are dropped unparsed.
pub const MAX_FRAME_SIZE: usize = 4096;
/// Upper bound on one event-servicing call.
pub const POLL_INTERVAL_MS: u64 = 50;
/// Upper bound on TCP connect plus WebSocket handshake.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Upper bound on one write to the local channel.
pub const WRITE_TIMEOUT_MS: u64 = 250;

/// Helper to format a `ws://host:port/path` URL.
pub fn feed_url(host: &str, port: u16, path: &str) -> String {
    if path.starts_with('/') {
        format!("ws://{}:{}{}", host, port, path)
    } else {
        format!("ws://{}:{}/{}", host, port, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_adds_missing_slash() {
        assert_eq!(feed_url("127.0.0.1", 8000, "/ws"), "ws://127.0.0.1:8000/ws");
        assert_eq!(feed_url("localhost", 9, "feed"), "ws://localhost:9/feed");
    }
}
