//! End-to-end tests exercising the full Server: bind, discover, relay,
//! and stop, across real loopback UDP sockets.

use std::time::Duration;

use tokio::net::UdpSocket;

use mptun_core::config::{DiscoveryConfig, HealthcheckConfig, ServerConfig};
use mptun_core::server::Server;

fn cfg(bind: &str, static_list: Vec<String>, healthcheck: HealthcheckConfig) -> ServerConfig {
    ServerConfig {
        bind: bind.to_string(),
        balance: "roundrobin".to_string(),
        discovery: DiscoveryConfig { kind: "static".to_string(), static_list },
        healthcheck,
    }
}

fn no_healthcheck() -> HealthcheckConfig {
    HealthcheckConfig {
        kind: "none".to_string(),
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(1),
        count: 1,
        loss: 1.0,
        rtt: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn single_backend_relays_datagram_and_reply_verbatim() {
    let backend = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let backend_addr = backend.local_addr().unwrap();
    let backend_task = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (n, from) = backend.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x45, 0x00, 0x14]);
        backend.send_to(&buf[..n], from).await.unwrap();
    });

    let server_cfg = cfg("127.0.0.1:19801", vec![backend_addr.to_string()], no_healthcheck());
    let mut server = Server::start(&server_cfg).await.unwrap();
    // Let discovery's first list reach the scheduler and its immediate
    // live-backends publish reach the session manager before sending traffic.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&[0x45, 0x00, 0x14], "127.0.0.1:19801").await.unwrap();

    let mut buf = [0u8; 64];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("timed out waiting for relayed reply")
        .unwrap();
    assert_eq!(&buf[..n], &[0x45, 0x00, 0x14]);

    backend_task.await.expect("backend task panicked");
    server.stop().await;
}

#[tokio::test]
async fn healthcheck_demotes_unreachable_backend() {
    // Nothing listens on this port: every probe times out.
    let unreachable = "127.0.0.1:19802".to_string();

    let healthcheck = HealthcheckConfig {
        kind: "ping".to_string(),
        interval: Duration::from_millis(10),
        timeout: Duration::from_millis(5),
        count: 3,
        loss: 0.5,
        rtt: Duration::from_secs(1),
    };
    let server_cfg = cfg("127.0.0.1:19803", vec![unreachable], healthcheck);
    let mut server = Server::start(&server_cfg).await.unwrap();

    // A client send should not panic or hang even though every backend is
    // down; it just finds no live backend for this destination.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(&[1, 2, 3], "127.0.0.1:19803").await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    server.stop().await;
}

#[tokio::test]
async fn graceful_stop_releases_the_listener() {
    let server_cfg = cfg("127.0.0.1:19804", vec!["10.0.0.1:9001".to_string()], no_healthcheck());
    let mut server = Server::start(&server_cfg).await.unwrap();
    server.stop().await;

    // The bind address should be free again.
    UdpSocket::bind("127.0.0.1:19804").await.expect("listener socket was not released on stop");
}
