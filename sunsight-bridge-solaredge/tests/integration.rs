//! End-to-end tests against an in-process fake inverter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use sunsight_bridge_solaredge::http::{HEALTH_PATH, STATUS_PATH, create_router};
use sunsight_bridge_solaredge::poller::{PhotovoltaicService, PollError, PollTiming};
use sunsight_bridge_solaredge::protocol::FrameError;
use sunsight_bridge_solaredge::status::{BatteryState, STATUS_REGISTERS};
use sunsight_bridge_solaredge::subscribers::StatusEvent;
use sunsight_bridge_solaredge::transport::{TcpRegisterReader, TransportError};

const WAIT: Duration = Duration::from_secs(5);

/// Register contents served by the fake inverter.
fn register_block(address: u16, count: u16) -> Vec<u16> {
    match (address, count) {
        (40083, 1) => vec![1500],
        (40084, 1) => vec![(-1i16) as u16],
        (62852, 2) => vec![5000, 0x4248],
        (62854, 2) => vec![4, 0],
        _ => vec![0; usize::from(count)],
    }
}

/// Answer every batch on its own connection, writing the response in small
/// pieces. The first `drop_first` connections are closed without an answer.
async fn fake_inverter(drop_first: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            if counter.fetch_add(1, Ordering::SeqCst) < drop_first {
                drop(socket);
                continue;
            }

            let mut request = vec![0u8; 12 * STATUS_REGISTERS.len()];
            if socket.read_exact(&mut request).await.is_err() {
                continue;
            }

            let mut response = Vec::new();
            for frame in request.chunks(12) {
                let address = u16::from_be_bytes([frame[8], frame[9]]);
                let count = u16::from_be_bytes([frame[10], frame[11]]);
                let registers = register_block(address, count);

                response.extend_from_slice(&frame[0..2]);
                response.extend_from_slice(&[0, 0]);
                response.extend_from_slice(&(3 + 2 * registers.len() as u16).to_be_bytes());
                response.push(frame[6]);
                response.push(0x03);
                response.push((registers.len() * 2) as u8);
                for register in registers {
                    response.extend_from_slice(&register.to_be_bytes());
                }
            }

            for piece in response.chunks(7) {
                if socket.write_all(piece).await.is_err() {
                    break;
                }
                let _ = socket.flush().await;
            }
        }
    });

    (addr, connections)
}

fn fast_timing() -> PollTiming {
    PollTiming {
        interval: Duration::from_millis(50),
        pacing_delay: Duration::from_millis(10),
        backoff_delay: Duration::from_millis(20),
    }
}

async fn next_event(events: &mut UnboundedReceiver<StatusEvent>) -> StatusEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event in time")
        .expect("event channel closed")
}

async fn get(router: &axum::Router, path: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_poll_decode_and_serve() {
    let (addr, _connections) = fake_inverter(0).await;
    let service = Arc::new(PhotovoltaicService::new(
        TcpRegisterReader::new(addr).with_timeout(Duration::from_secs(1)),
        fast_timing(),
    ));
    let router = create_router(service.status_handle());
    let (_subscription, mut events) = service.subscribers().subscribe_channel();

    let (status, _) = get(&router, STATUS_PATH).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let cancel = CancellationToken::new();
    let poller = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    match next_event(&mut events).await {
        StatusEvent::Next(reading) => {
            assert_eq!(reading.power, 150.0);
            assert!((reading.battery.percentage - 0.5).abs() < 0.001);
            assert_eq!(reading.battery.state, BatteryState::Discharging);
        }
        other => panic!("expected a reading, got {:?}", other),
    }

    let (status, body) = get(&router, STATUS_PATH).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["power"], 150.0);
    assert_eq!(json["battery"]["state"], "discharging");
    assert!((json["battery"]["percentage"].as_f64().unwrap() - 0.5).abs() < 0.001);

    let (status, body) = get(&router, HEALTH_PATH).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Healthy");

    cancel.cancel();
    tokio::time::timeout(WAIT, poller)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Drain readings published before the cancellation landed
    loop {
        match next_event(&mut events).await {
            StatusEvent::Next(_) => continue,
            StatusEvent::Completed => break,
            StatusEvent::Failed(e) => panic!("unexpected failure: {}", e),
        }
    }
}

#[tokio::test]
async fn test_recovers_after_dropped_connections() {
    let (addr, connections) = fake_inverter(3).await;
    let service = Arc::new(PhotovoltaicService::new(
        TcpRegisterReader::new(addr).with_timeout(Duration::from_secs(1)),
        fast_timing(),
    ));
    let status = service.status_handle();
    let (_subscription, mut events) = service.subscribers().subscribe_channel();

    let cancel = CancellationToken::new();
    let poller = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    match next_event(&mut events).await {
        StatusEvent::Next(reading) => assert_eq!(reading.power, 150.0),
        other => panic!("expected a reading, got {:?}", other),
    }
    assert!(connections.load(Ordering::SeqCst) >= 4);
    assert!(status.is_available());

    cancel.cancel();
    tokio::time::timeout(WAIT, poller)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_inverter_stays_unavailable() {
    // Nothing listens on this port once the listener is gone
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let service = Arc::new(PhotovoltaicService::new(
        TcpRegisterReader::new(addr).with_timeout(Duration::from_millis(200)),
        fast_timing(),
    ));
    let router = create_router(service.status_handle());
    let (_subscription, mut events) = service.subscribers().subscribe_channel();

    let cancel = CancellationToken::new();
    let poller = {
        let service = service.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { service.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;

    let (status, _) = get(&router, STATUS_PATH).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, body) = get(&router, HEALTH_PATH).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"Unhealthy");

    // Connectivity failures are retried, never surfaced as errors
    cancel.cancel();
    tokio::time::timeout(WAIT, poller)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(next_event(&mut events).await, StatusEvent::Completed));
}

#[tokio::test]
async fn test_exception_reply_stops_polling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 12 * STATUS_REGISTERS.len()];
        socket.read_exact(&mut request).await.unwrap();
        // Illegal data address, then keep the connection open
        socket
            .write_all(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x83, 0x02])
            .await
            .unwrap();
        tokio::time::sleep(WAIT).await;
    });

    let service = PhotovoltaicService::new(
        TcpRegisterReader::new(addr).with_timeout(Duration::from_secs(2)),
        fast_timing(),
    );
    let (_subscription, mut events) = service.subscribers().subscribe_channel();

    let err = tokio::time::timeout(WAIT, service.run(CancellationToken::new()))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(
        err,
        PollError::Transport(TransportError::Protocol(FrameError::Exception {
            function_code: 0x03,
            exception_code: 0x02
        }))
    ));
    assert!(matches!(next_event(&mut events).await, StatusEvent::Failed(_)));
    assert!(!service.status_handle().is_available());
}
