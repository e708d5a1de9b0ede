//! End-to-end tunnel flow over an in-memory transport
//!
//! Drives the manager through the full lifecycle with a simulated
//! device on the far end of the connection: token issue, handshake,
//! proxied HTTP round trips, socket relay, replacement, disconnect.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use editor_tunnel_auth::TokenStore;
use editor_tunnel_core::{
    memory, Connection, ProxyRequest, StreamEvent, TunnelError, TunnelManager,
    TunnelManagerConfig, TunnelState,
};
use editor_tunnel_proto::{
    decode_frame, encode_frame, Frame, HttpResponseFrame,
};
use tokio::task::JoinHandle;

fn manager_with(config: TunnelManagerConfig) -> Arc<TunnelManager> {
    TunnelManager::new(Arc::new(TokenStore::new()), config)
}

fn manager() -> Arc<TunnelManager> {
    manager_with(TunnelManagerConfig::default())
}

fn get(path: &str) -> ProxyRequest {
    ProxyRequest {
        method: "GET".to_string(),
        path: path.to_string(),
        headers: vec![],
        body: vec![],
    }
}

/// A well-behaved device: answers every HTTP request with 200 and the
/// request path as the body, and echoes socket data back uppercased.
/// Runs until the service side closes the connection.
fn spawn_device(conn: Connection) -> JoinHandle<()> {
    let Connection {
        mut sink,
        mut source,
    } = conn;
    tokio::spawn(async move {
        while let Ok(Some(payload)) = source.recv().await {
            let frame = match decode_frame(&payload) {
                Ok(frame) => frame,
                Err(_) => break,
            };
            let reply = match frame {
                Frame::Request(req) => Some(Frame::Response(HttpResponseFrame {
                    correlation_id: req.correlation_id,
                    status: 200,
                    headers: vec![("content-type".to_string(), "text/plain".to_string())],
                    body: req.path.into_bytes(),
                })),
                Frame::StreamData {
                    stream_id,
                    data,
                    binary,
                } => Some(Frame::StreamData {
                    stream_id,
                    data: data.to_ascii_uppercase(),
                    binary,
                }),
                Frame::StreamClose { stream_id } => Some(Frame::StreamClose { stream_id }),
                _ => None,
            };
            if let Some(reply) = reply {
                let payload = encode_frame(&reply).unwrap();
                if sink.send(payload).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn wait_for_state(manager: &TunnelManager, device_id: &str, state: TunnelState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.status(device_id).state != state {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("device never reached {:?}", state));
}

#[tokio::test]
async fn test_full_lifecycle() {
    let manager = manager();

    // no tunnel yet
    assert_eq!(manager.status("dev1").state, TunnelState::None);
    assert_eq!(
        manager.proxy_http("dev1", get("/flows")).await.unwrap_err(),
        TunnelError::NoTunnel
    );

    let token = manager.create_tunnel("dev1");
    assert_eq!(manager.status("dev1").state, TunnelState::Pending);

    // wrong token never attaches and leaves the tunnel pending
    let (service, _device) = memory::pair();
    assert_eq!(
        manager.attach("dev1", "ffde_dev1_forged", service).unwrap_err(),
        TunnelError::InvalidToken
    );
    assert_eq!(manager.status("dev1").state, TunnelState::Pending);

    let (service, device) = memory::pair();
    let device_task = spawn_device(device);
    manager.attach("dev1", token.as_str(), service).unwrap();
    assert_eq!(manager.status("dev1").state, TunnelState::Connected);

    let res = manager.proxy_http("dev1", get("/flows")).await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body, b"/flows");

    manager.close_tunnel("dev1");
    assert_eq!(manager.status("dev1").state, TunnelState::None);
    assert_eq!(
        manager.proxy_http("dev1", get("/flows")).await.unwrap_err(),
        TunnelError::NoTunnel
    );
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_out_of_order_responses_route_by_correlation_id() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");
    let (service, device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();

    // device that answers the second request first
    let Connection {
        mut sink,
        mut source,
    } = device;
    let device_task = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..2 {
            let payload = source.recv().await.unwrap().unwrap();
            let Frame::Request(req) = decode_frame(&payload).unwrap() else {
                panic!("expected request frame");
            };
            requests.push(req);
        }
        requests.reverse();
        for req in requests {
            let reply = Frame::Response(HttpResponseFrame {
                correlation_id: req.correlation_id,
                status: 200,
                headers: vec![],
                body: req.path.into_bytes(),
            });
            sink.send(encode_frame(&reply).unwrap()).await.unwrap();
        }
    });

    let first = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.proxy_http("dev1", get("/first")).await })
    };
    let second = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.proxy_http("dev1", get("/second")).await })
    };

    // each waiter gets its own response despite the reversed order
    assert_eq!(first.await.unwrap().unwrap().body, b"/first");
    assert_eq!(second.await.unwrap().unwrap().body, b"/second");
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_socket_relay_preserves_order() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");
    let (service, device) = memory::pair();
    let device_task = spawn_device(device);
    manager.attach("dev1", token.as_str(), service).unwrap();

    let mut stream = manager.proxy_socket("dev1", "/comms").await.unwrap();
    for msg in ["alpha", "beta", "gamma"] {
        stream.send(Bytes::from_static(msg.as_bytes()), false).await.unwrap();
    }
    for expected in ["ALPHA", "BETA", "GAMMA"] {
        match stream.recv().await {
            StreamEvent::Data { data, binary } => {
                assert_eq!(data, Bytes::from_static(expected.as_bytes()));
                assert!(!binary);
            }
            StreamEvent::Closed => panic!("stream closed early"),
        }
    }

    // closing our half makes the device echo a close back
    stream.close().await;
    assert_eq!(manager.status("dev1").state, TunnelState::Connected);

    manager.close_tunnel("dev1");
    device_task.await.unwrap();
}

#[tokio::test]
async fn test_reattach_replaces_connection_and_fails_in_flight() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");

    // first connection: a device that never answers
    let (service, silent_device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();

    let stalled = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.proxy_http("dev1", get("/stalled")).await })
    };
    // wait until the request is actually in flight; keep the first
    // connection alive so the service cannot mistake it for a hangup
    let _silent = tokio::time::timeout(
        Duration::from_secs(5),
        silent_device_first_frame(silent_device),
    )
    .await
    .unwrap();

    // same token, second connection: replaces the first
    let (service, device) = memory::pair();
    let device_task = spawn_device(device);
    manager.attach("dev1", token.as_str(), service).unwrap();

    assert_eq!(
        stalled.await.unwrap().unwrap_err(),
        TunnelError::TunnelReplaced
    );

    // the replacement serves traffic
    let res = manager.proxy_http("dev1", get("/after")).await.unwrap();
    assert_eq!(res.body, b"/after");

    manager.close_tunnel("dev1");
    device_task.await.unwrap();
}

async fn silent_device_first_frame(conn: Connection) -> Connection {
    let Connection { sink, mut source } = conn;
    let _ = source.recv().await;
    Connection { sink, source }
}

#[tokio::test]
async fn test_device_disconnect_closes_tunnel_and_revokes_token() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");
    let (service, device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();

    // device hangs up
    drop(device);
    wait_for_state(&manager, "dev1", TunnelState::None).await;

    let status = manager.status("dev1");
    assert!(status.error.unwrap().contains("closed the connection"));
    assert!(!manager.verify_token("dev1", token.as_str()));
}

#[tokio::test]
async fn test_undecodable_frame_tears_down_connection() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");
    let (service, device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();

    let Connection { mut sink, .. } = device;
    sink.send(Bytes::from_static(b"\xff\xff not a frame")).await.unwrap();

    wait_for_state(&manager, "dev1", TunnelState::None).await;
    assert!(manager
        .status("dev1")
        .error
        .unwrap()
        .contains("undecodable"));
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_maps_to_timeout_error() {
    let manager = manager_with(TunnelManagerConfig {
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    });
    let token = manager.create_tunnel("dev1");

    // a device that swallows everything
    let (service, device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();
    let _hold = tokio::spawn(async move {
        let Connection {
            sink: _sink,
            mut source,
        } = device;
        while let Ok(Some(_)) = source.recv().await {}
    });

    let err = manager.proxy_http("dev1", get("/slow")).await.unwrap_err();
    assert_eq!(err, TunnelError::Timeout);
    assert!(err.is_retryable());

    // the tunnel survives a timed-out request
    assert_eq!(manager.status("dev1").state, TunnelState::Connected);
}

#[tokio::test]
async fn test_close_during_in_flight_requests() {
    let manager = manager();
    let token = manager.create_tunnel("dev1");
    let (service, device) = memory::pair();
    manager.attach("dev1", token.as_str(), service).unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.proxy_http("dev1", get(&format!("/{i}"))).await })
        })
        .collect();
    let mut stream = manager.proxy_socket("dev1", "/comms").await.unwrap();

    // the silent device received the frames; requests are in flight
    let Connection {
        sink: _sink,
        mut source,
    } = device;
    for _ in 0..4 {
        source.recv().await.unwrap().unwrap();
    }

    manager.close_tunnel("dev1");
    for waiter in waiters {
        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            TunnelError::TunnelClosed
        );
    }
    assert_eq!(stream.recv().await, StreamEvent::Closed);
}
