use std::collections::HashMap;

use modbus_client::simulator::{DeviceSimulator, Fault};
use modbus_client::{connect, read_request, ClientConfig, ConnectionError, TransportError};

fn config_for(sim: &DeviceSimulator) -> ClientConfig {
    ClientConfig {
        host: "127.0.0.1".to_string(),
        port: sim.port(),
        ..ClientConfig::default()
    }
}

#[test]
fn request_frame_layout() {
    let frame = read_request(0, 1020);
    assert_eq!(
        frame,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x00, 0x03, 0x03, 0xFC, 0x01]
    );
}

#[tokio::test]
async fn reads_register_payload() {
    let sim = DeviceSimulator::start(HashMap::from([(1020, 5000), (1006, -1)]))
        .await
        .expect("simulator");
    let mut conn = connect(&config_for(&sim)).await.expect("connect");

    let payload = conn.read_holding_register(1020).await.expect("read");
    assert_eq!(payload, vec![0x04, 0x00, 0x00, 0x13, 0x88]);

    let payload = conn.read_holding_register(1006).await.expect("read");
    assert_eq!(&payload[1..], &[0xFF, 0xFF, 0xFF, 0xFF]);

    assert_eq!(sim.requested_addresses(), vec![1020, 1006]);
    assert_eq!(sim.requests()[0], read_request(0, 1020));
    conn.disconnect().await;
}

#[tokio::test]
async fn rejects_invalid_targets() {
    let mut config = ClientConfig::default();
    config.host = "  ".to_string();
    assert!(matches!(
        connect(&config).await,
        Err(ConnectionError::EmptyHost)
    ));

    config.host = "127.0.0.1".to_string();
    config.port = 0;
    assert!(matches!(
        connect(&config).await,
        Err(ConnectionError::InvalidPort(0))
    ));
}

#[tokio::test]
async fn refused_connection_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let config = ClientConfig {
        port,
        ..ClientConfig::default()
    };
    assert!(matches!(
        connect(&config).await,
        Err(ConnectionError::Io { .. }) | Err(ConnectionError::Timeout { .. })
    ));
}

#[tokio::test]
async fn silent_device_times_out() {
    let sim = DeviceSimulator::start(HashMap::new()).await.expect("simulator");
    sim.set_fault(1020, Fault::Silent);

    let mut config = config_for(&sim);
    config.timeout_ms = 50;
    let mut conn = connect(&config).await.expect("connect");

    let err = conn.read_holding_register(1020).await.expect_err("timeout");
    assert!(matches!(err, TransportError::Timeout { timeout_ms: 50 }));
}

#[tokio::test]
async fn hangup_mid_frame_is_short_frame() {
    let sim = DeviceSimulator::start(HashMap::new()).await.expect("simulator");
    sim.set_fault(1502, Fault::Truncate);
    let mut conn = connect(&config_for(&sim)).await.expect("connect");

    let err = conn.read_holding_register(1502).await.expect_err("short");
    assert!(matches!(
        err,
        TransportError::ShortFrame {
            expected: 13,
            actual: 9
        }
    ));
}

#[tokio::test]
async fn exception_response_is_surfaced() {
    let sim = DeviceSimulator::start(HashMap::new()).await.expect("simulator");
    let mut conn = connect(&config_for(&sim)).await.expect("connect");

    let err = conn.read_holding_register(4242).await.expect_err("exception");
    assert!(matches!(
        err,
        TransportError::Exception {
            function: 0x03,
            code: 0x02
        }
    ));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let sim = DeviceSimulator::start(HashMap::from([(1000, 3)]))
        .await
        .expect("simulator");
    let mut conn = connect(&config_for(&sim)).await.expect("connect");
    assert!(conn.is_open());

    conn.disconnect().await;
    conn.disconnect().await;
    assert!(!conn.is_open());

    let err = conn.read_holding_register(1000).await.expect_err("closed");
    assert!(matches!(err, TransportError::Io(_)));
}
