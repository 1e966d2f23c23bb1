//! End-to-end tunnel tests over loopback sockets

use std::net::SocketAddr;
use std::time::Duration;

use lanlink_client::{ConnectionManager, MonitorRegistry};
use lanlink_proto::{ConnectionSpec, OfferedService, ServerConfig, ServiceType};
use lanlink_server::{DispatcherConfig, ServiceDispatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Echo server on an ephemeral port.
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn connect_with_retry(port: u16) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("local port {port} never came up");
}

async fn assert_round_trip(stream: &mut TcpStream, payload: &[u8]) {
    stream.write_all(payload).await.unwrap();
    let mut reply = vec![0u8; payload.len()];
    timeout(Duration::from_secs(3), stream.read_exact(&mut reply))
        .await
        .expect("payload should be echoed back")
        .unwrap();
    assert_eq!(reply, payload);
}

#[tokio::test]
async fn test_direct_tunnel_end_to_end() {
    let echo_addr = start_echo_server().await;

    let manager = ConnectionManager::new(MonitorRegistry::new());
    let local_port = free_port();
    let connection = manager
        .add(ConnectionSpec {
            local_port,
            service_name: "echo".to_string(),
            destination: Some(format!(":{}", echo_addr.port()).parse().unwrap()),
            direct: true,
        })
        .unwrap();
    connection.start_listening().await.unwrap();

    let mut stream = connect_with_retry(local_port).await;
    assert_round_trip(&mut stream, b"through the direct tunnel").await;

    manager.stop_all().await;
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_multiplexed_tunnel_through_dispatcher() {
    let echo_addr = start_echo_server().await;

    // Server side: dispatcher offering the echo service.
    let dispatcher_addr: SocketAddr = ([127, 0, 0, 1], free_port()).into();
    let server = ServerConfig {
        offered_services: vec![OfferedService {
            service_name: "echo".to_string(),
            destination: format!(":{}", echo_addr.port()),
            service_type: ServiceType::Direct,
        }],
    };
    let dispatcher = ServiceDispatcher::new(
        DispatcherConfig {
            bind_addr: dispatcher_addr,
        },
        &server,
    )
    .unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(dispatcher.run(shutdown_rx));
    connect_with_retry(dispatcher_addr.port()).await;

    // Client side: multiplexing handle aimed at the dispatcher.
    let manager = ConnectionManager::new(MonitorRegistry::new());
    let local_port = free_port();
    let connection = manager
        .add(ConnectionSpec {
            local_port,
            service_name: "echo".to_string(),
            destination: Some(format!(":{}", dispatcher_addr.port()).parse().unwrap()),
            direct: false,
        })
        .unwrap();
    connection.start_listening().await.unwrap();

    let mut stream = connect_with_retry(local_port).await;
    assert_round_trip(&mut stream, b"tagged and multiplexed").await;

    manager.stop_all().await;
}

#[tokio::test]
async fn test_stopped_tunnel_releases_the_port() {
    let echo_addr = start_echo_server().await;

    let manager = ConnectionManager::new(MonitorRegistry::new());
    let local_port = free_port();
    let spec = ConnectionSpec {
        local_port,
        service_name: "echo".to_string(),
        destination: Some(format!(":{}", echo_addr.port()).parse().unwrap()),
        direct: true,
    };

    let connection = manager.add(spec.clone()).unwrap();
    connection.start_listening().await.unwrap();
    connect_with_retry(local_port).await;

    manager.remove(local_port).await;

    // The port can be bound again right away.
    let connection = manager.add(spec).unwrap();
    connection.start_listening().await.unwrap();
    let mut stream = connect_with_retry(local_port).await;
    assert_round_trip(&mut stream, b"after restart").await;

    manager.stop_all().await;
}
