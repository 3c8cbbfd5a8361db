//! End-to-end relay tests against a real tungstenite server and a real local
//! socket reader.
#![cfg(unix)]

use std::io::{BufRead, BufReader};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, unbounded};
use feed_common::RelayError;
use feed_relay::channel::LocalChannel;
use feed_relay::shutdown::ShutdownHandle;
use feed_relay::supervisor::{Supervisor, SupervisorConfig};
use feed_relay::transport::WsConnector;
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::{Message, WebSocket};

const PROTOCOL: &str = "mtp-protocol";

fn accept_feed_client(listener: &TcpListener) -> WebSocket<TcpStream> {
    let (stream, _) = listener.accept().unwrap();
    tungstenite::accept_hdr(stream, |_req: &Request, mut response: Response| {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(PROTOCOL));
        Ok::<Response, ErrorResponse>(response)
    })
    .unwrap()
}

fn read_text(ws: &mut WebSocket<TcpStream>) -> String {
    loop {
        match ws.read().unwrap() {
            Message::Text(text) => return text,
            Message::Close(_) => panic!("client closed before sending text"),
            _ => continue,
        }
    }
}

fn drain_until_closed(mut ws: WebSocket<TcpStream>) {
    while ws.read().is_ok() {}
}

/// Attaches a reader to the local channel and streams its lines to the test.
fn spawn_reader(path: String) -> Receiver<String> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let stream = loop {
            match UnixStream::connect(&path) {
                Ok(stream) => break stream,
                Err(_) => thread::sleep(Duration::from_millis(10)),
            }
        };
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
        }
    });
    rx
}

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect_delay: Duration::from_millis(200),
        max_frame_size: 4096,
        idle_poll: Duration::from_millis(20),
    }
}

fn connector(addr: std::net::SocketAddr) -> WsConnector {
    WsConnector::new(
        &format!("ws://{addr}/ws"),
        PROTOCOL,
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .unwrap()
}

#[test]
fn relays_alert_after_welcome_and_ping() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("relay.sock").to_string_lossy().into_owned();

    let (upstream_tx, upstream_rx) = unbounded::<String>();
    let server = thread::spawn(move || {
        let mut ws = accept_feed_client(&listener);
        upstream_tx.send(read_text(&mut ws)).unwrap();

        ws.send(Message::Text(r#"{"type":"welcome","client_id":"abc"}"#.into())).unwrap();
        ws.send(Message::Text(r#"{"type":"news","headline":"skip me"}"#.into())).unwrap();
        ws.send(Message::Text("{not json".into())).unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).unwrap();
        upstream_tx.send(read_text(&mut ws)).unwrap();

        ws.send(Message::Text(r#"{"type":"alert","symbol":"XYZ","price":1.23}"#.into()))
            .unwrap();
        drain_until_closed(ws);
    });

    let lines = spawn_reader(socket_path.clone());
    let shutdown = ShutdownHandle::new();
    let channel = LocalChannel::open(&socket_path, Duration::from_millis(50), &shutdown).unwrap();

    let relay_shutdown = shutdown.clone();
    let relay = thread::spawn(move || {
        let mut supervisor = Supervisor::new(connector(addr), channel, test_config(), relay_shutdown);
        supervisor.run();
    });

    let timeout = Duration::from_secs(10);
    assert_eq!(
        upstream_rx.recv_timeout(timeout).unwrap(),
        r#"{"type":"register","role":"client"}"#
    );
    assert_eq!(
        upstream_rx.recv_timeout(timeout).unwrap(),
        r#"{"type":"pong","client_id":"abc"}"#
    );
    assert_eq!(
        lines.recv_timeout(timeout).unwrap(),
        "{\"type\":\"alert\",\"symbol\":\"XYZ\",\"price\":1.23}\n"
    );

    let stop_requested = Instant::now();
    shutdown.trigger();
    relay.join().unwrap();
    assert!(stop_requested.elapsed() < Duration::from_secs(2));
    assert!(!Path::new(&socket_path).exists());

    server.join().unwrap();
    // Only the alert reached the reader.
    assert!(lines.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn reconnects_after_the_feed_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("relay.sock").to_string_lossy().into_owned();

    let (upstream_tx, upstream_rx) = unbounded::<(usize, String)>();
    let server = thread::spawn(move || {
        let mut first = accept_feed_client(&listener);
        upstream_tx.send((1, read_text(&mut first))).unwrap();
        first
            .send(Message::Text(r#"{"type":"welcome","client_id":"kept"}"#.into()))
            .unwrap();
        drop(first);

        let mut second = accept_feed_client(&listener);
        upstream_tx.send((2, read_text(&mut second))).unwrap();
        second.send(Message::Text(r#"{"type":"ping"}"#.into())).unwrap();
        upstream_tx.send((2, read_text(&mut second))).unwrap();
        second
            .send(Message::Text(r#"{"type":"symbol_update","data":{"symbols":["AAA"]}}"#.into()))
            .unwrap();
        drain_until_closed(second);
    });

    let lines = spawn_reader(socket_path.clone());
    let shutdown = ShutdownHandle::new();
    let channel = LocalChannel::open(&socket_path, Duration::from_millis(50), &shutdown).unwrap();

    let relay_shutdown = shutdown.clone();
    let relay = thread::spawn(move || {
        let mut supervisor = Supervisor::new(connector(addr), channel, test_config(), relay_shutdown);
        supervisor.run();
    });

    let timeout = Duration::from_secs(10);
    let register = r#"{"type":"register","role":"client"}"#.to_string();
    assert_eq!(upstream_rx.recv_timeout(timeout).unwrap(), (1, register.clone()));
    assert_eq!(upstream_rx.recv_timeout(timeout).unwrap(), (2, register));
    assert_eq!(
        upstream_rx.recv_timeout(timeout).unwrap(),
        (2, r#"{"type":"pong","client_id":"kept"}"#.to_string())
    );
    assert_eq!(
        lines.recv_timeout(timeout).unwrap(),
        "{\"type\":\"symbol_update\",\"data\":{\"symbols\":[\"AAA\"]}}\n"
    );

    shutdown.trigger();
    relay.join().unwrap();
    server.join().unwrap();
}

#[test]
fn open_blocks_until_a_reader_attaches() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("relay.sock").to_string_lossy().into_owned();
    let shutdown = ShutdownHandle::new();

    let (opened_tx, opened_rx) = unbounded();
    let path = socket_path.clone();
    let opener_shutdown = shutdown.clone();
    let opener = thread::spawn(move || {
        let result = LocalChannel::open(&path, Duration::from_millis(50), &opener_shutdown);
        opened_tx.send(result.is_ok()).unwrap();
        result
    });

    assert!(opened_rx.recv_timeout(Duration::from_millis(300)).is_err());

    let _reader = loop {
        match UnixStream::connect(&socket_path) {
            Ok(stream) => break stream,
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    };
    assert!(opened_rx.recv_timeout(Duration::from_secs(5)).unwrap());
    assert!(opener.join().unwrap().is_ok());
}

#[test]
fn shutdown_while_waiting_for_the_feed_stops_promptly() {
    // Nothing listens on this port: the supervisor sits in its reconnect wait.
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("relay.sock").to_string_lossy().into_owned();

    let _lines = spawn_reader(socket_path.clone());
    let shutdown = ShutdownHandle::new();
    let channel = LocalChannel::open(&socket_path, Duration::from_millis(50), &shutdown).unwrap();

    let config = SupervisorConfig {
        reconnect_delay: Duration::from_secs(30),
        ..test_config()
    };
    let relay_shutdown = shutdown.clone();
    let relay = thread::spawn(move || {
        let mut supervisor = Supervisor::new(connector(addr), channel, config, relay_shutdown);
        supervisor.run();
        supervisor.reconnect_timer().scheduled_count()
    });

    thread::sleep(Duration::from_millis(200));
    let stop_requested = Instant::now();
    shutdown.trigger();
    let scheduled = relay.join().unwrap();

    assert!(stop_requested.elapsed() < Duration::from_secs(1));
    assert_eq!(scheduled, 1);
    assert!(!Path::new(&socket_path).exists());
}

#[test]
fn shutdown_during_a_stuck_handshake_stops_promptly() {
    // The feed accepts TCP but never answers the upgrade request.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (release_tx, release_rx) = unbounded::<()>();
    let server = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        let _ = release_rx.recv_timeout(Duration::from_secs(30));
    });

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("relay.sock").to_string_lossy().into_owned();
    let _lines = spawn_reader(socket_path.clone());
    let shutdown = ShutdownHandle::new();
    let channel = LocalChannel::open(&socket_path, Duration::from_millis(50), &shutdown).unwrap();

    let relay_shutdown = shutdown.clone();
    let relay = thread::spawn(move || {
        let connector = WsConnector::new(
            &format!("ws://{addr}/ws"),
            PROTOCOL,
            Duration::from_secs(10),
            Duration::from_millis(50),
        )
        .unwrap();
        let mut supervisor =
            Supervisor::new(connector, channel, SupervisorConfig::default(), relay_shutdown);
        supervisor.run();
    });

    thread::sleep(Duration::from_millis(200));
    let stop_requested = Instant::now();
    shutdown.trigger();
    relay.join().unwrap();

    assert!(stop_requested.elapsed() < Duration::from_secs(1));
    assert!(!Path::new(&socket_path).exists());
    release_tx.send(()).unwrap();
    server.join().unwrap();
}

#[test]
fn invalid_feed_configuration_is_fatal() {
    let result = WsConnector::new(
        "ws://127.0.0.1:1/ws",
        "bad protocol\r\n",
        Duration::from_secs(1),
        Duration::from_millis(10),
    );
    assert!(matches!(result, Err(RelayError::InvalidRequest(_))));
}
