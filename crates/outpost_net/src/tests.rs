//! End-to-end admission scenarios over real loopback sockets.

use crate::connection::ClientId;
use crate::endpoint::TransportHandle;
use crate::messaging::rendezvous::parse_response;
use crate::*;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(5);
const MAX_TICKS: usize = 400;

fn loopback_config(transport: TransportKind) -> ServerConfig {
    ServerConfig {
        bind_ip: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        transport,
        ..Default::default()
    }
}

fn started(transport: TransportKind) -> (NetworkServer, SocketAddr) {
    let mut server = create_server_with_config(loopback_config(transport));
    let port = server.init_network().expect("loopback endpoint");
    (server, SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
}

/// Ticks the server until one client is admitted.
fn tick_until_admitted(server: &NetworkServer) -> ClientId {
    for _ in 0..MAX_TICKS {
        if let Some(client_id) = server.update().expect("tick failed") {
            return client_id;
        }
        thread::sleep(TICK);
    }
    panic!("no client admitted after {MAX_TICKS} ticks");
}

fn rendezvous_client(server_addr: SocketAddr) -> UdpSocket {
    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client
        .send_to(b"addr: 127.0.0.1 port: 0", server_addr)
        .unwrap();
    client
}

fn receive_assigned_port(client: &UdpSocket) -> u16 {
    let mut buf = [0u8; 128];
    let (len, _) = client.recv_from(&mut buf).expect("no rendezvous response");
    parse_response(&buf[..len]).expect("unexpected rendezvous response")
}

#[test]
fn test_update_before_init_fails() {
    let server = create_server_with_config(loopback_config(TransportKind::Tcp));
    assert_eq!(server.state(), ServerState::Uninitialized);
    assert!(matches!(server.update(), Err(ServerError::NotInitialized)));
}

#[test]
fn test_double_init_is_rejected() {
    let (mut server, addr) = started(TransportKind::Tcp);
    assert_eq!(server.state(), ServerState::Listening);
    assert_eq!(server.server_port(), Some(addr.port()));
    assert!(matches!(
        server.init_network(),
        Err(ServerError::AlreadyInitialized(port)) if port == addr.port()
    ));
}

#[test]
fn test_idle_tick_admits_nobody() {
    for transport in [TransportKind::Tcp, TransportKind::Udp] {
        let (server, _) = started(transport);
        assert_eq!(server.update().unwrap(), None);
        assert!(server.registry().is_empty());
    }
}

#[test]
fn test_tcp_admission_schedules_ack_then_level_sync() {
    let (server, addr) = started(TransportKind::Tcp);
    let _client = TcpStream::connect(addr).unwrap();

    let client_id = tick_until_admitted(&server);
    assert_eq!(client_id, 0);
    assert_eq!(server.registry().len(), 1);

    let pipeline = server.registry().event_pipeline(0).unwrap();
    let events: Vec<NetEvent> = pipeline.drain_pending().into_iter().map(|s| s.event).collect();
    let level = &server.config().initial_level;
    assert_eq!(
        events,
        vec![
            NetEvent::ConnectionAck { client_id: 0 },
            NetEvent::SyncLevel {
                level_name: level.name.clone(),
                level_file: level.file.clone(),
            },
        ]
    );
}

#[test]
fn test_udp_rendezvous_assigns_dedicated_port() {
    let (server, addr) = started(TransportKind::Udp);
    let client = rendezvous_client(addr);

    let client_id = tick_until_admitted(&server);
    assert_eq!(client_id, 0);

    let assigned = receive_assigned_port(&client);
    assert_ne!(assigned, 0);
    assert_ne!(assigned, addr.port());

    let local_port = server.registry().with_slots(|slots| {
        match slots[0].connection_manager().transport() {
            Some(TransportHandle::Datagram(socket)) => socket.local_addr().unwrap().port(),
            other => panic!("expected a datagram transport, got {other:?}"),
        }
    });
    assert_eq!(local_port, assigned);

    // The punch-through socket is connected back to the client.
    let client_addr = client.local_addr().unwrap();
    assert_eq!(server.registry().get(0).unwrap().peer_addr, client_addr);
}

#[test]
fn test_malformed_rendezvous_is_dropped() {
    let (server, addr) = started(TransportKind::Udp);
    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    client.send_to(b"hello there", addr).unwrap();
    client.send_to(b"addr: 127.0.0.1 port: 99999", addr).unwrap();

    // Both datagrams are consumed without registering anything.
    for _ in 0..20 {
        assert_eq!(server.update().unwrap(), None);
        thread::sleep(TICK);
    }
    assert!(server.registry().is_empty());

    let _client = rendezvous_client(addr);
    assert_eq!(tick_until_admitted(&server), 0);
    assert_eq!(server.registry().len(), 1);
}

#[test]
fn test_failed_handshake_steps_leave_no_slot() {
    let (server, addr) = started(TransportKind::Udp);

    // Held open so the punch-through bind to its port conflicts.
    let occupied = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let occupied_port = occupied.local_addr().unwrap().port();

    let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    // 192.0.2.0/24 is reserved for documentation, never a local address.
    client.send_to(b"addr: 192.0.2.1 port: 9100", addr).unwrap();
    client
        .send_to(format!("addr: 127.0.0.1 port: {occupied_port}").as_bytes(), addr)
        .unwrap();
    client.send_to(b"", addr).unwrap();
    client.send_to(b"addr: 127.0.0.1", addr).unwrap();

    for _ in 0..20 {
        assert_eq!(server.update().unwrap(), None);
        thread::sleep(TICK);
    }
    assert!(server.registry().is_empty());

    // No step got as far as sending a response.
    client.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let mut buf = [0u8; 128];
    assert!(client.recv_from(&mut buf).is_err());

    let next = rendezvous_client(addr);
    assert_eq!(tick_until_admitted(&server), 0);
    assert_ne!(receive_assigned_port(&next), 0);
    assert_eq!(server.registry().len(), 1);

    let events: Vec<NetEvent> = server
        .registry()
        .event_pipeline(0)
        .unwrap()
        .drain_pending()
        .into_iter()
        .map(|s| s.event)
        .collect();
    let level = &server.config().initial_level;
    assert_eq!(
        events,
        vec![
            NetEvent::ConnectionAck { client_id: 0 },
            NetEvent::SyncLevel {
                level_name: level.name.clone(),
                level_file: level.file.clone(),
            },
        ]
    );
}

#[test]
fn test_disconnect_closes_client_stream() {
    let (server, addr) = started(TransportKind::Tcp);
    let mut client = TcpStream::connect(addr).unwrap();
    assert_eq!(tick_until_admitted(&server), 0);

    assert!(server.disconnect(0));
    assert_eq!(server.registry().len(), 1);

    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_identifiers_follow_admission_order() {
    let (server, addr) = started(TransportKind::Tcp);
    let _first = TcpStream::connect(addr).unwrap();
    assert_eq!(tick_until_admitted(&server), 0);
    let _second = TcpStream::connect(addr).unwrap();
    assert_eq!(tick_until_admitted(&server), 1);

    let report = server.render_diagnostics();
    assert_eq!(report.server_port, addr.port());
    let lines = report.lines();
    assert_eq!(lines[0], format!("Server: Port {} 2 Connections", addr.port()));
    let connection_lines = lines.iter().filter(|l| l.starts_with("Connection[")).count();
    assert_eq!(connection_lines, 2);
    assert!(lines.iter().any(|l| l == "Connection[0]:"));
    assert!(lines.iter().any(|l| l == "Connection[1]:"));
}

#[test]
fn test_registry_capacity_limits_admission() {
    let mut config = loopback_config(TransportKind::Tcp);
    config.max_connections = 1;
    let mut server = create_server_with_config(config);
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, server.init_network().unwrap()));

    let _first = TcpStream::connect(addr).unwrap();
    assert_eq!(tick_until_admitted(&server), 0);

    let _second = TcpStream::connect(addr).unwrap();
    for _ in 0..20 {
        assert_eq!(server.update().unwrap(), None);
        thread::sleep(TICK);
    }
    assert_eq!(server.registry().len(), 1);
}

#[test]
fn test_broadcast_except_skips_excluded_and_disconnected() {
    let (server, addr) = started(TransportKind::Tcp);
    let _clients: Vec<TcpStream> = (0..3)
        .map(|expected| {
            let stream = TcpStream::connect(addr).unwrap();
            assert_eq!(tick_until_admitted(&server), expected);
            stream
        })
        .collect();

    for client_id in 0..3 {
        server.registry().event_pipeline(client_id).unwrap().drain_pending();
    }

    assert!(server.disconnect(2));
    assert!(!server.disconnect(2));

    let event = NetEvent::Custom {
        name: "round_start".to_string(),
        data: serde_json::json!({ "round": 3 }),
    };
    let delivered = server.broadcast_except(&event, EventTarget::GameObjectManager, Some(0));
    assert_eq!(delivered, 1);

    let pending = |client_id| {
        server
            .registry()
            .event_pipeline(client_id)
            .unwrap()
            .drain_pending()
    };
    assert!(pending(0).is_empty());
    let received = pending(1);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].event, event);
    assert!(received[0].immediate);
    assert!(pending(2).is_empty());

    assert_eq!(server.broadcast(&event, EventTarget::Object(7)), 2);

    let lines = server.render_diagnostics().lines();
    assert!(lines.iter().any(|l| l == "Connection[2]: disconnected"));
}

#[test]
fn test_send_to_targets_one_client() {
    let (server, addr) = started(TransportKind::Tcp);
    let _client = TcpStream::connect(addr).unwrap();
    assert_eq!(tick_until_admitted(&server), 0);
    server.registry().event_pipeline(0).unwrap().drain_pending();

    let event = NetEvent::Custom {
        name: "ping".to_string(),
        data: serde_json::Value::Null,
    };
    assert!(server.send_to(0, event.clone(), EventTarget::Object(1)));
    assert!(!server.send_to(5, event.clone(), EventTarget::Object(1)));

    let scheduled = server.registry().event_pipeline(0).unwrap().drain_pending();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].target, EventTarget::Object(1));

    server.disconnect(0);
    assert!(!server.send_to(0, event, EventTarget::Object(1)));
}

#[test]
fn test_concurrent_broadcasts_during_admission() {
    use std::sync::Arc;

    let (server, addr) = started(TransportKind::Tcp);
    let server = Arc::new(server);

    let broadcaster = {
        let server = server.clone();
        thread::spawn(move || {
            let event = NetEvent::Custom {
                name: "tick".to_string(),
                data: serde_json::Value::Null,
            };
            for _ in 0..200 {
                server.broadcast(&event, EventTarget::GameObjectManager);
                let _ = server.render_diagnostics();
            }
        })
    };

    let _clients: Vec<TcpStream> = (0..4)
        .map(|expected| {
            let stream = TcpStream::connect(addr).unwrap();
            assert_eq!(tick_until_admitted(&server), expected);
            stream
        })
        .collect();

    broadcaster.join().unwrap();
    assert_eq!(server.registry().len(), 4);
}
