//! Command-line arguments for the feed tap.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;
use feed_common::net::LOCAL_ENDPOINT;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Local channel endpoint the relay writes to.
    #[clap(long, default_value = LOCAL_ENDPOINT)]
    pub endpoint: String,

    /// Connect attempts before giving up while the endpoint does not exist yet.
    #[clap(long, default_value_t = 10)]
    pub retries: u32,

    /// Delay between connect attempts, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Window in seconds during which an identical symbol list is skipped.
    #[clap(long, default_value_t = 60)]
    pub dedup_secs: u64,
}
