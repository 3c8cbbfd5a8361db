//! Feed relay agent.
//!
//! Keeps a WebSocket connection to the market feed and relays `alert` and
//! `symbol_update` documents, one JSON document per line, to a single local
//! reader. The wiring is:
//!
//! - `ShutdownHandle` — set by SIGINT/SIGTERM; stops every blocking wait.
//! - `LocalChannel` — created first; the relay does nothing until a reader
//!   attaches.
//! - `WsConnector` — validated before anything else; an unusable feed URL or
//!   sub-protocol is the only fatal startup error.
//! - `Supervisor` — the event loop. Network failures never end the process;
//!   the feed is reconnected after a fixed delay.
//!
//! Usage example (CLI):
//! ```bash
//! feed_relay --host 127.0.0.1 --port 8000 --endpoint /tmp/mtp_pipe.sock
//! ```
use clap::Parser;
use feed_common::{RelayError, Result};
use feed_relay::args::Args;
use feed_relay::channel::LocalChannel;
use feed_relay::shutdown::ShutdownHandle;
use feed_relay::supervisor::Supervisor;
use feed_relay::transport::WsConnector;
use log::{error, info};

fn run(args: Args) -> Result<()> {
    let shutdown = ShutdownHandle::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.trigger())
            .map_err(|e| RelayError::Format(format!("Failed to install signal handler: {e}")))?;
    }

    let connector = WsConnector::new(
        &args.feed_url(),
        &args.protocol,
        args.connect_timeout(),
        args.poll_interval(),
    )?;

    let channel = match LocalChannel::open(&args.endpoint, args.channel_retry_delay(), &shutdown) {
        Ok(channel) => channel,
        Err(RelayError::Interrupted) => {
            info!("Shutdown requested before a reader attached");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    info!("Relaying {} to {}", connector.url(), channel.endpoint());
    let mut supervisor = Supervisor::new(connector, channel, args.supervisor_config(), shutdown);
    supervisor.run();
    Ok(())
}

fn main() {
    init_logger();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("Feed relay failed: {}", e);
        std::process::exit(1);
    }
    info!("Feed relay stopped");
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
