//! Reading forwarded documents from the local channel.
//!
//! The relay writes one JSON document per line. `TapReceiver` classifies each
//! line, logs a short summary and keeps counters; `connect_with_retries`
//! waits for the relay to create its endpoint.
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use feed_common::protocol::{InboundMessage, MessageKind};
use feed_common::{RelayError, Result};
use log::{debug, info, warn};

use crate::model::alert::AlertSummary;
use crate::model::symbol_filter::SymbolUpdateFilter;

#[cfg(unix)]
type ChannelStream = std::os::unix::net::UnixStream;
#[cfg(not(unix))]
type ChannelStream = std::net::TcpStream;

/// Connects to the relay's endpoint, retrying while it is not there yet.
pub fn connect_with_retries(
    endpoint: &str,
    retries: u32,
    delay: Duration,
    shutdown: &AtomicBool,
) -> Result<ChannelStream> {
    let mut attempt = 0;
    loop {
        match ChannelStream::connect(endpoint) {
            Ok(stream) => return Ok(stream),
            Err(e)
                if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused)
                    && attempt < retries =>
            {
                attempt += 1;
                warn!("Channel not ready, retrying in {}ms ({}/{})", delay.as_millis(), attempt, retries);
                thread::sleep(delay);
                if shutdown.load(Ordering::SeqCst) {
                    return Err(RelayError::Interrupted);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// What a single line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum TapOutcome {
    /// An alert with its summary.
    Alert(AlertSummary),
    /// A fresh symbol list with this many entries.
    SymbolUpdate(usize),
    /// A symbol list identical to the previous one.
    DuplicateSymbolUpdate,
    /// Valid JSON the relay should not have forwarded.
    Unexpected(Option<String>),
    /// Not JSON.
    Malformed,
}

/// Counters for one tap run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TapStats {
    /// Alerts read.
    pub alerts: u64,
    /// Symbol updates acted on.
    pub symbol_updates: u64,
    /// Symbol updates skipped as duplicates.
    pub duplicates: u64,
    /// Lines that were not JSON or not expected.
    pub rejected: u64,
}

/// Line-oriented reader of the local channel.
pub struct TapReceiver {
    filter: SymbolUpdateFilter,
    stats: TapStats,
}

impl TapReceiver {
    /// Creates a receiver with the given duplicate window.
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            filter: SymbolUpdateFilter::new(dedup_window),
            stats: TapStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> TapStats {
        self.stats
    }

    /// Classifies one line and updates the counters.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> TapOutcome {
        let clean: String = line.chars().filter(|c| !c.is_ascii_control()).collect();

        let outcome = match InboundMessage::parse(clean.as_bytes()) {
            Ok(InboundMessage::Forwardable {
                kind: MessageKind::Alert,
                document,
            }) => TapOutcome::Alert(AlertSummary::from_document(&document)),
            Ok(InboundMessage::Forwardable {
                kind: MessageKind::SymbolUpdate,
                document,
            }) => {
                let symbols = document.get("data").and_then(|d| d.get("symbols"));
                let count = symbols.and_then(|s| s.as_array()).map_or(0, Vec::len);
                let key = symbols.map(|s| s.to_string()).unwrap_or_default();
                if self.filter.accept(&key, now) {
                    TapOutcome::SymbolUpdate(count)
                } else {
                    TapOutcome::DuplicateSymbolUpdate
                }
            }
            Ok(other) => TapOutcome::Unexpected(other.kind().map(|k| k.to_string())),
            Err(_) => TapOutcome::Malformed,
        };

        match &outcome {
            TapOutcome::Alert(_) => self.stats.alerts += 1,
            TapOutcome::SymbolUpdate(_) => self.stats.symbol_updates += 1,
            TapOutcome::DuplicateSymbolUpdate => self.stats.duplicates += 1,
            TapOutcome::Unexpected(_) | TapOutcome::Malformed => self.stats.rejected += 1,
        }
        outcome
    }

    /// Reads lines until EOF or shutdown. The reader should have a read
    /// timeout so the shutdown flag is re-checked.
    pub fn run<R: Read>(&mut self, reader: R, shutdown: &AtomicBool) -> Result<()> {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        while !shutdown.load(Ordering::SeqCst) {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    if !buf.is_empty() {
                        self.log_line(&buf);
                    }
                    info!("Relay closed the channel");
                    break;
                }
                Ok(_) if buf.ends_with(b"\n") => {
                    self.log_line(&buf);
                    buf.clear();
                }
                Ok(_) => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let stats = self.stats;
        info!(
            "Tap stopping: {} alerts, {} symbol updates, {} duplicates, {} rejected",
            stats.alerts, stats.symbol_updates, stats.duplicates, stats.rejected
        );
        Ok(())
    }

    fn log_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let stamp = Local::now().format("%H:%M:%S%.3f");
        match self.handle_line(&line, Instant::now()) {
            TapOutcome::Alert(summary) => info!("[{}] ALERT {}", stamp, summary),
            TapOutcome::SymbolUpdate(count) => info!("[{}] SYMBOLS {} entries", stamp, count),
            TapOutcome::DuplicateSymbolUpdate => debug!("[{}] duplicate symbol update skipped", stamp),
            TapOutcome::Unexpected(kind) => warn!("[{}] unexpected document type {:?}", stamp, kind),
            TapOutcome::Malformed => warn!("[{}] failed to parse: {}", stamp, line.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn classifies_forwarded_lines() {
        let mut tap = TapReceiver::new(Duration::from_secs(60));
        let now = Instant::now();

        let alert = tap.handle_line("{\"type\":\"alert\",\"symbol\":\"XYZ\",\"price\":1.23}\r\n", now);
        assert!(matches!(alert, TapOutcome::Alert(ref s) if s.symbol.as_deref() == Some("XYZ")));

        let update = r#"{"type":"symbol_update","data":{"symbols":["A","B"]}}"#;
        assert_eq!(tap.handle_line(update, now), TapOutcome::SymbolUpdate(2));
        assert_eq!(tap.handle_line(update, now), TapOutcome::DuplicateSymbolUpdate);

        assert_eq!(
            tap.handle_line(r#"{"type":"ping"}"#, now),
            TapOutcome::Unexpected(Some("ping".into()))
        );
        assert_eq!(tap.handle_line("garbage", now), TapOutcome::Malformed);

        assert_eq!(
            tap.stats(),
            TapStats {
                alerts: 1,
                symbol_updates: 1,
                duplicates: 1,
                rejected: 2,
            }
        );
    }

    #[test]
    fn run_reads_until_eof() {
        let input = concat!(
            "{\"type\":\"alert\",\"symbol\":\"A\"}\n",
            "{\"type\":\"alert\",\"symbol\":\"B\"}\n",
            "{\"type\":\"alert\",\"symbol\":\"C\"}"
        );
        let mut tap = TapReceiver::new(Duration::from_secs(60));
        tap.run(Cursor::new(input), &AtomicBool::new(false)).unwrap();
        assert_eq!(tap.stats().alerts, 3);
    }

    #[test]
    fn run_stops_on_shutdown() {
        let mut tap = TapReceiver::new(Duration::from_secs(60));
        tap.run(Cursor::new("{\"type\":\"alert\"}\n"), &AtomicBool::new(true))
            .unwrap();
        assert_eq!(tap.stats(), TapStats::default());
    }

    #[cfg(unix)]
    #[test]
    fn gives_up_after_retries() {
        let dir = std::env::temp_dir().join(format!("feed_tap_missing_{}.sock", std::process::id()));
        let result = connect_with_retries(
            &dir.to_string_lossy(),
            2,
            Duration::from_millis(5),
            &AtomicBool::new(false),
        );
        assert!(matches!(result, Err(RelayError::Io(_))));
    }
}
