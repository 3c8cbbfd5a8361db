//! Command-line arguments for the feed relay.
//!
//! Every flag defaults to the fixed constant in `feed_common::net`, so running
//! the binary without arguments uses the production parameters.
use std::time::Duration;

use clap::Parser;
use feed_common::net::{
    CHANNEL_RETRY_DELAY_SECS, CONNECT_TIMEOUT_SECS, FEED_HOST, FEED_PATH, FEED_PORT,
    FEED_PROTOCOL, LOCAL_ENDPOINT, MAX_FRAME_SIZE, POLL_INTERVAL_MS, RECONNECT_DELAY_SECS,
    feed_url,
};

use crate::supervisor::SupervisorConfig;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Feed host name or IP address.
    #[clap(long, default_value = FEED_HOST)]
    pub host: String,

    /// Feed TCP port.
    #[clap(long, default_value_t = FEED_PORT)]
    pub port: u16,

    /// WebSocket path on the feed.
    #[clap(long, default_value = FEED_PATH)]
    pub path: String,

    /// Sub-protocol announced during the handshake.
    #[clap(long, default_value = FEED_PROTOCOL)]
    pub protocol: String,

    /// Local channel endpoint (socket path on Unix, `ip:port` elsewhere).
    #[clap(long, default_value = LOCAL_ENDPOINT)]
    pub endpoint: String,

    /// Seconds to wait before reconnecting a dropped feed.
    #[clap(long, default_value_t = RECONNECT_DELAY_SECS)]
    pub reconnect_secs: u64,

    /// Upper bound in milliseconds on one event-servicing call.
    #[clap(long, default_value_t = POLL_INTERVAL_MS)]
    pub poll_ms: u64,

    /// Inbound frames of this many bytes or more are dropped.
    #[clap(long, default_value_t = MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

impl Args {
    /// `ws://` URL of the feed.
    pub fn feed_url(&self) -> String {
        feed_url(&self.host, self.port, &self.path)
    }

    /// Bound on TCP connect plus handshake.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(CONNECT_TIMEOUT_SECS)
    }

    /// Read timeout of the live connection.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    /// Delay between local channel creation attempts.
    pub fn channel_retry_delay(&self) -> Duration {
        Duration::from_secs(CHANNEL_RETRY_DELAY_SECS)
    }

    /// Supervisor tunables derived from the flags.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_delay: Duration::from_secs(self.reconnect_secs),
            max_frame_size: self.max_frame_size,
            idle_poll: self.poll_interval(),
        }
    }
}
