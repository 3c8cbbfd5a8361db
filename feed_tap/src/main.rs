//! Feed Tap — attaches to the feed relay's local channel and logs every
//! forwarded document. It waits for the relay to create the endpoint,
//! summarises alerts, skips repeated symbol lists and stops on Ctrl+C or
//! when the relay closes the channel.
//!
//! Usage example (CLI):
//! ```bash
//! feed_tap --endpoint /tmp/mtp_pipe.sock --dedup-secs 60
//! ```
#![warn(missing_docs)]
mod args;
mod model;
mod receiver;

use crate::args::Args;
use crate::receiver::{TapReceiver, connect_with_retries};
use clap::Parser;
use feed_common::RelayError;
use feed_common::Result;
use log::info;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

/// Read timeout so the shutdown flag is re-checked while the relay is quiet.
const READ_TIMEOUT_MS: u64 = 500;

fn main() -> Result<(), RelayError> {
    init_logger();
    let args = Args::parse();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| RelayError::Format(format!("Failed to install signal handler: {e}")))?;
    }

    info!("Trying to connect to {}", args.endpoint);
    let stream = match connect_with_retries(
        &args.endpoint,
        args.retries,
        Duration::from_millis(args.retry_delay_ms),
        &shutdown,
    ) {
        Ok(stream) => stream,
        Err(RelayError::Interrupted) => return Ok(()),
        Err(e) => return Err(e),
    };
    stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
    info!("Connected to feed relay. Press Ctrl+C to exit.");

    let mut tap = TapReceiver::new(Duration::from_secs(args.dedup_secs));
    tap.run(stream, &shutdown)
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
