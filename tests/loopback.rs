//! End-to-end tests driving a listener and a client over real loopback sockets.

use async_trait::async_trait;
use relgram::client::Client;
use relgram::config::RelgramConfig;
use relgram::connection::{Connection, ConnectionState};
use relgram::error::{ConnectError, DisconnectReason};
use relgram::events::{ConnectionEvents, NewConnectionHandler};
use relgram::listener::Listener;
use relgram::packet_header::SendOption;
use relgram::stats::NoopStatistics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const EVENT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum RecordedEvent {
    Data(SocketAddr, Vec<u8>, SendOption),
    Disconnected(SocketAddr, DisconnectReason),
}

struct RecordingEvents {
    tx: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecordingEvents {
    fn new() -> (Arc<RecordingEvents>, mpsc::UnboundedReceiver<RecordedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(RecordingEvents { tx }), rx)
    }
}

#[async_trait]
impl ConnectionEvents for RecordingEvents {
    async fn on_data_received(&self, remote: SocketAddr, payload: Vec<u8>, send_option: SendOption) {
        let _ = self.tx.send(RecordedEvent::Data(remote, payload, send_option));
    }

    async fn on_disconnected(&self, remote: SocketAddr, reason: DisconnectReason) {
        let _ = self.tx.send(RecordedEvent::Disconnected(remote, reason));
    }
}

struct AcceptAll {
    handshakes: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl NewConnectionHandler for AcceptAll {
    async fn on_new_connection(&self, handshake_payload: &[u8], _connection: &Connection) -> bool {
        let _ = self.handshakes.send(handshake_payload.to_vec());
        true
    }
}

struct RejectAll;

#[async_trait]
impl NewConnectionHandler for RejectAll {
    async fn on_new_connection(&self, _handshake_payload: &[u8], _connection: &Connection) -> bool {
        false
    }
}

async fn recv_event(
    rx: &mut mpsc::UnboundedReceiver<RecordedEvent>,
) -> RecordedEvent {
    timeout(EVENT_WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_send_receive_disconnect() {
    let config = Arc::new(RelgramConfig::default());

    let (server_events, mut server_rx) = RecordingEvents::new();
    let (handshake_tx, mut handshake_rx) = mpsc::unbounded_channel();
    let listener = Listener::bind(
        "127.0.0.1:0",
        config.clone(),
        Arc::new(AcceptAll {
            handshakes: handshake_tx,
        }),
        server_events,
        Arc::new(NoopStatistics),
    )
    .await
    .unwrap();
    listener.clone().start();
    let server_addr = listener.local_addr().unwrap();

    let (client_events, mut client_rx) = RecordingEvents::new();
    let client = Client::new(server_addr, config, client_events, Arc::new(NoopStatistics))
        .await
        .unwrap();

    timeout(EVENT_WAIT, client.connect(&[0xff, 0xff, 0xff, 0xff]))
        .await
        .expect("handshake timed out")
        .unwrap();
    assert_eq!(client.connection().state().await, ConnectionState::Connected);

    let handshake = timeout(EVENT_WAIT, handshake_rx.recv())
        .await
        .expect("timed out waiting for handshake")
        .unwrap();
    assert_eq!(handshake, [0xff, 0xff, 0xff, 0xff]);

    // client -> server, reliable
    client.send_bytes(b"hello", SendOption::Reliable).await.unwrap();
    let client_seen_by_server = match recv_event(&mut server_rx).await {
        RecordedEvent::Data(remote, payload, send_option) => {
            // the client socket is bound to the wildcard address, so only the port matches
            assert_eq!(remote.port(), client.local_addr().port());
            assert_eq!(payload, b"hello");
            assert_eq!(send_option, SendOption::Reliable);
            remote
        }
        other => panic!("expected data event, got {:?}", other),
    };

    // server -> client over a framed writer
    let server_side = listener.connection(client_seen_by_server).await.unwrap();
    let mut writer = listener.writer(SendOption::Reliable);
    writer.start_message(7).unwrap();
    writer.write_string("world").unwrap();
    writer.end_message().unwrap();
    server_side.send(&mut writer).await.unwrap();

    match recv_event(&mut client_rx).await {
        RecordedEvent::Data(_, payload, send_option) => {
            assert_eq!(send_option, SendOption::Reliable);

            let mut reader = relgram::message_reader::MessageReader::new(&payload);
            let mut sub = reader.read_message().unwrap();
            assert_eq!(sub.tag(), Some(7));
            assert_eq!(sub.read_string().unwrap(), "world");
        }
        other => panic!("expected data event, got {:?}", other),
    }

    // local disconnect tears both sides down with exactly one event each
    client.disconnect(b"done").await;
    match recv_event(&mut client_rx).await {
        RecordedEvent::Disconnected(_, reason) => assert_eq!(reason, DisconnectReason::Local),
        other => panic!("expected disconnect event, got {:?}", other),
    }
    match recv_event(&mut server_rx).await {
        RecordedEvent::Disconnected(remote, reason) => {
            assert_eq!(remote, client_seen_by_server);
            assert_eq!(reason, DisconnectReason::Remote(b"done".to_vec()));
        }
        other => panic!("expected disconnect event, got {:?}", other),
    }

    listener.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_handshake_disconnects_client() {
    let config = Arc::new(RelgramConfig::default());

    let (server_events, _server_rx) = RecordingEvents::new();
    let listener = Listener::bind(
        "127.0.0.1:0",
        config.clone(),
        Arc::new(RejectAll),
        server_events,
        Arc::new(NoopStatistics),
    )
    .await
    .unwrap();
    listener.clone().start();
    let server_addr = listener.local_addr().unwrap();

    let (client_events, mut client_rx) = RecordingEvents::new();
    let client = Client::new(server_addr, config, client_events, Arc::new(NoopStatistics))
        .await
        .unwrap();

    // the Hello is acked before the handler rejects, so the client usually connects
    //  briefly and is then torn down by the server's Disconnect; if the Disconnect
    //  outraces the ack, connect itself fails and no event is emitted
    let connect_result = timeout(EVENT_WAIT, client.connect(b"nope")).await.unwrap();

    if connect_result.is_ok() {
        match recv_event(&mut client_rx).await {
            RecordedEvent::Disconnected(_, DisconnectReason::Remote(_)) => {}
            other => panic!("expected remote disconnect, got {:?}", other),
        }
    }
    assert_eq!(
        client.connection().state().await,
        ConnectionState::NotConnected
    );

    listener.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_without_server_fails() {
    // a fast retry schedule keeps this test short
    let config = Arc::new(RelgramConfig {
        resend_timeout_initial: Duration::from_millis(20),
        resend_timeout_max: Duration::from_millis(50),
        resend_retry_limit: 4,
        tick_interval: Duration::from_millis(5),
        ..RelgramConfig::default()
    });

    // bind a socket to reserve an address nobody answers on, then drop it
    let unused = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let (client_events, _client_rx) = RecordingEvents::new();
    let client = Client::new(dead_addr, config, client_events, Arc::new(NoopStatistics))
        .await
        .unwrap();

    let result = timeout(EVENT_WAIT, client.connect(b"anyone there?"))
        .await
        .expect("connect attempt did not resolve");
    assert_eq!(result, Err(ConnectError::ConnectFailed));
    assert_eq!(
        client.connection().state().await,
        ConnectionState::NotConnected
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listener_stop_notifies_connected_clients() {
    let config = Arc::new(RelgramConfig::default());

    let (server_events, mut server_rx) = RecordingEvents::new();
    let (handshake_tx, _handshake_rx) = mpsc::unbounded_channel();
    let listener = Listener::bind(
        "127.0.0.1:0",
        config.clone(),
        Arc::new(AcceptAll {
            handshakes: handshake_tx,
        }),
        server_events,
        Arc::new(NoopStatistics),
    )
    .await
    .unwrap();
    listener.clone().start();
    let server_addr = listener.local_addr().unwrap();

    let (client_events, mut client_rx) = RecordingEvents::new();
    let client = Client::new(server_addr, config, client_events, Arc::new(NoopStatistics))
        .await
        .unwrap();
    timeout(EVENT_WAIT, client.connect(b"hi"))
        .await
        .expect("handshake timed out")
        .unwrap();
    assert_eq!(listener.connection_count().await, 1);

    listener.stop().await;

    // the server side emits its own Disconnected and notifies the client best-effort
    match recv_event(&mut server_rx).await {
        RecordedEvent::Disconnected(_, DisconnectReason::Local) => {}
        other => panic!("expected local disconnect on the server, got {:?}", other),
    }
    match recv_event(&mut client_rx).await {
        RecordedEvent::Disconnected(_, DisconnectReason::Remote(_)) => {}
        other => panic!("expected remote disconnect on the client, got {:?}", other),
    }
    assert_eq!(listener.connection_count().await, 0);
}
