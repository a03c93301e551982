//! Integration tests for the duplex channel: handshake, delivery, protocol
//! error tolerance, single-peer enforcement, and heartbeat teardown.

use futures_util::{SinkExt, StreamExt};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use clipbridge::transport::{ConnectionManager, ConnectionRole, ConnectionState, SyncMessage};
use clipbridge::Config;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn config(role: ConnectionRole, channel_port: u16) -> Config {
    let mut config = Config {
        role,
        channel_port,
        discovery_port: free_port(),
        ..Config::default()
    };
    // Keep the tests fast
    config.retry.base_delay_secs = 1;
    config.handshake_timeout_secs = 5;
    config
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut state_rx = manager.state_watch();
    timeout(Duration::from_secs(10), state_rx.wait_for(|state| *state == wanted))
        .await
        .expect("state not reached in time")
        .expect("state watch closed");
}

type RawClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Dial until the acceptor's listener is up
async fn connect_raw(port: u16) -> RawClient {
    let url = format!("ws://127.0.0.1:{port}");
    for _ in 0..50 {
        if let Ok((ws, _)) = connect_async(url.as_str()).await {
            return ws;
        }
        sleep(Duration::from_millis(100)).await;
    }
    panic!("could not connect to test acceptor on {port}");
}

/// Complete the mutual confirmation from a hand-rolled initiator
async fn handshake_raw(ws: &mut RawClient) {
    let confirm = SyncMessage::ConnectionConfirm("initiator".to_string())
        .encode()
        .unwrap();
    ws.send(WsMessage::text(confirm)).await.unwrap();

    let frame = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("no frame from acceptor")
        .expect("stream ended")
        .expect("websocket error");
    match frame {
        WsMessage::Text(text) => {
            let message = SyncMessage::decode(text.as_str()).unwrap();
            assert_eq!(
                message,
                SyncMessage::ConnectionConfirm("acceptor".to_string())
            );
        }
        other => panic!("expected confirm frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_handshake_reaches_open_on_both_ends() {
    let port = free_port();

    let (acceptor, _a_status, mut a_inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Acceptor, port)));
    tokio::spawn(Arc::clone(&acceptor).run_acceptor());

    let (initiator, _i_status, mut i_inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Initiator, port)));
    let (addr_tx, addr_rx) = watch::channel(None);
    tokio::spawn(Arc::clone(&initiator).run_initiator(addr_rx));
    addr_tx.send(Some(Ipv4Addr::LOCALHOST)).unwrap();

    wait_for_state(&initiator, ConnectionState::Open).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;

    // Messages flow in both directions over the one channel
    initiator
        .send(SyncMessage::Text("from initiator".to_string()))
        .await
        .unwrap();
    let received = timeout(Duration::from_secs(5), a_inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, SyncMessage::Text("from initiator".to_string()));

    acceptor
        .send(SyncMessage::Files(vec![]))
        .await
        .unwrap();
    let received = timeout(Duration::from_secs(5), i_inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, SyncMessage::Files(vec![]));
}

#[tokio::test]
async fn test_initiator_dials_only_the_latest_discovered_address() {
    let port = free_port();

    let (acceptor, _a_status, _a_inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Acceptor, port)));
    tokio::spawn(Arc::clone(&acceptor).run_acceptor());

    let (initiator, _i_status, _i_inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Initiator, port)));
    let (addr_tx, addr_rx) = watch::channel(None);

    // Two replies land before the dialer gets scheduled: a stale unroutable
    // one and the real peer. The stale one must be overwritten, not queued,
    // or the dialer would burn a full retry cycle on it first.
    addr_tx.send(Some(Ipv4Addr::new(192, 0, 2, 1))).unwrap();
    addr_tx.send(Some(Ipv4Addr::LOCALHOST)).unwrap();
    tokio::spawn(Arc::clone(&initiator).run_initiator(addr_rx));

    wait_for_state(&initiator, ConnectionState::Open).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;
}

#[tokio::test]
async fn test_malformed_frame_dropped_channel_survives() {
    let port = free_port();
    let (acceptor, _status, mut inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Acceptor, port)));
    tokio::spawn(Arc::clone(&acceptor).run_acceptor());

    let mut ws = connect_raw(port).await;
    handshake_raw(&mut ws).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;

    // A bogus tag must be dropped without terminating the channel
    ws.send(WsMessage::text(r#"{"type":"bogus"}"#.to_string()))
        .await
        .unwrap();
    ws.send(WsMessage::text(
        SyncMessage::Text("still alive".to_string()).encode().unwrap(),
    ))
    .await
    .unwrap();

    let received = timeout(Duration::from_secs(5), inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, SyncMessage::Text("still alive".to_string()));
    assert_eq!(acceptor.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_second_connection_rejected_while_peer_active() {
    let port = free_port();
    let (acceptor, _status, _inbound) =
        ConnectionManager::new(Arc::new(config(ConnectionRole::Acceptor, port)));
    tokio::spawn(Arc::clone(&acceptor).run_acceptor());

    let mut first = connect_raw(port).await;
    handshake_raw(&mut first).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;

    // The listener drops the extra connection before upgrading it
    let url = format!("ws://127.0.0.1:{port}");
    let second = connect_async(url.as_str()).await;
    assert!(second.is_err());
    assert_eq!(acceptor.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_missed_heartbeats_force_teardown_and_reaccept() {
    let port = free_port();
    let mut acceptor_config = config(ConnectionRole::Acceptor, port);
    acceptor_config.heartbeat_interval_secs = 1;

    let (acceptor, _status, _inbound) =
        ConnectionManager::new(Arc::new(acceptor_config));
    tokio::spawn(Arc::clone(&acceptor).run_acceptor());

    // This peer confirms the handshake, then goes silent: it never reads,
    // so the acceptor's pings are never answered.
    let mut silent = connect_raw(port).await;
    handshake_raw(&mut silent).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;

    // Three unanswered probes at 1s intervals force the channel closed.
    wait_for_state(&acceptor, ConnectionState::Closed).await;

    // The acceptor goes back to accepting a fresh peer.
    let mut replacement = connect_raw(port).await;
    handshake_raw(&mut replacement).await;
    wait_for_state(&acceptor, ConnectionState::Open).await;
}
