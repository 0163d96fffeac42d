use domain::{Command, DeviceStatus, ScalarValue};
use gw_directory::DeviceDirectory;
use gw_platform::InMemoryPlatform;
use gw_protocol::{GatewayProtocolHandler, HandlerVariant, TcpServer, TcpServerConfig};
use gw_telemetry::{DeviceAuditLog, DeviceLogConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    server: TcpServer,
    platform: Arc<InMemoryPlatform>,
    audit: Arc<DeviceAuditLog>,
}

async fn harness(heartbeat_timeout: Duration) -> Harness {
    let platform = Arc::new(InMemoryPlatform::new());
    platform.register_device("00000010", "gw-10");
    platform.register_device("00000011", "gw-11");
    let directory = Arc::new(DeviceDirectory::new(platform.clone()));
    let audit = Arc::new(DeviceAuditLog::new(DeviceLogConfig::default()));
    let handler = GatewayProtocolHandler::new(0).with_heartbeat_timeout(heartbeat_timeout);
    let server = TcpServer::new(
        HandlerVariant::session(handler),
        directory,
        platform.clone(),
        audit.clone(),
        TcpServerConfig {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 0,
            idle_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_millis(500),
            ..TcpServerConfig::default()
        },
    );
    server.start().await.expect("start");
    Harness {
        server,
        platform,
        audit,
    }
}

fn open(h: &Harness, peer: &str) -> DuplexStream {
    let (client, server_side) = tokio::io::duplex(256);
    h.server.serve_connection(server_side, peer).expect("permit");
    client
}

async fn read_n(client: &mut DuplexStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    tokio::time::timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("no reply")
        .expect("read");
    buf
}

async fn expect_closed(client: &mut DuplexStream) {
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(WAIT, client.read(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected data: {:?}", read);
}

async fn handshake(client: &mut DuplexStream, id: u8) -> Vec<u8> {
    client
        .write_all(&[0, 0, 0, id, 0xA0, 0, 0, 0])
        .await
        .expect("write");
    read_n(client, 8).await
}

#[tokio::test]
async fn handshake_then_frames_are_forwarded() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-a");

    assert_eq!(handshake(&mut client, 10).await, vec![0, 0, 0, 10, 0x01, 0, 0, 0]);
    assert_eq!(h.platform.status_count("gw-10", DeviceStatus::Online), 1);
    assert_eq!(h.server.list_connected_devices(), vec!["00000010".to_string()]);

    client.write_all(&[0, 0, 0, 10, 0x01]).await.expect("write");
    assert_eq!(read_n(&mut client, 6).await, vec![0, 0, 0, 10, 0x81, 0x00]);
    assert!(h.platform.wait_until(WAIT, |p| p.telemetry().len() == 1).await);

    client
        .write_all(&[0, 0, 0, 10, 0x02, 0x00, 0xFA, 0x02, 0x58])
        .await
        .expect("write");
    assert!(h.platform.wait_until(WAIT, |p| p.telemetry().len() == 2).await);

    client.write_all(&[0, 0, 0, 10, 0x03, 0x02]).await.expect("write");
    assert!(h.platform.wait_until(WAIT, |p| p.telemetry().len() == 3).await);

    let telemetry = h.platform.telemetry();
    assert!(telemetry.iter().all(|(device_id, _)| device_id == "gw-10"));
    assert_eq!(telemetry[0].1.get("heartbeat"), Some(&ScalarValue::I64(1)));
    assert_eq!(telemetry[1].1.get("temperature"), Some(&ScalarValue::F64(25.0)));
    assert_eq!(telemetry[1].1.get("humidity"), Some(&ScalarValue::F64(60.0)));
    assert_eq!(telemetry[2].1.get("status_code"), Some(&ScalarValue::I64(2)));

    drop(client);
    assert!(
        h.platform
            .wait_until(WAIT, |p| p.status_count("gw-10", DeviceStatus::Offline) == 1)
            .await
    );
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn coalesced_and_split_frames_are_separated() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-g");
    assert_eq!(handshake(&mut client, 11).await, vec![0, 0, 0, 11, 0x01, 0, 0, 0]);

    let mut burst = vec![0, 0, 0, 11, 0x03, 0x05];
    burst.extend_from_slice(&[0, 0, 0, 11, 0x02, 0x00, 0x64, 0x01, 0x2C]);
    burst.extend_from_slice(&[0, 0, 0, 11]);
    client.write_all(&burst).await.expect("write");
    assert!(h.platform.wait_until(WAIT, |p| p.telemetry().len() == 2).await);

    client.write_all(&[0x01]).await.expect("write");
    assert_eq!(read_n(&mut client, 6).await, vec![0, 0, 0, 11, 0x81, 0x00]);
    assert!(h.platform.wait_until(WAIT, |p| p.telemetry().len() == 3).await);

    let telemetry = h.platform.telemetry();
    assert_eq!(telemetry[0].1.get("status_code"), Some(&ScalarValue::I64(5)));
    assert_eq!(telemetry[1].1.get("temperature"), Some(&ScalarValue::F64(10.0)));
    assert_eq!(telemetry[1].1.get("humidity"), Some(&ScalarValue::F64(30.0)));
    assert_eq!(telemetry[2].1.get("heartbeat"), Some(&ScalarValue::I64(1)));
    assert_eq!(h.audit.count("00000011", "parse_failed"), 0);
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_frame_type_is_not_fatal() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-b");
    handshake(&mut client, 11).await;

    client.write_all(&[0, 0, 0, 11, 0x7F]).await.expect("write");
    let audit = h.audit.clone();
    assert!(
        h.platform
            .wait_until(WAIT, move |_| audit.count("00000011", "parse_failed") == 1)
            .await
    );
    client.write_all(&[0, 0, 0, 12, 0x01]).await.expect("write");
    let audit = h.audit.clone();
    assert!(
        h.platform
            .wait_until(WAIT, move |_| audit.count("00000011", "parse_failed") == 2)
            .await
    );

    client.write_all(&[0, 0, 0, 11, 0x01]).await.expect("write");
    assert_eq!(read_n(&mut client, 6).await, vec![0, 0, 0, 11, 0x81, 0x00]);
    assert_eq!(h.platform.status_count("gw-11", DeviceStatus::Offline), 0);
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn unknown_device_is_rejected_and_closed() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-c");

    assert_eq!(handshake(&mut client, 42).await, vec![0, 0, 0, 42, 0x00, 0, 0, 0]);
    expect_closed(&mut client).await;
    assert_eq!(h.platform.fetch_count("00000042"), 1);
    assert!(h.platform.statuses().is_empty());
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn malformed_handshake_is_rejected_and_closed() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-d");

    client
        .write_all(&[0, 0, 0, 10, 0x02, 0, 0, 0])
        .await
        .expect("write");
    assert_eq!(read_n(&mut client, 8).await, vec![0, 0, 0, 10, 0x00, 0, 0, 0]);
    expect_closed(&mut client).await;
    assert_eq!(h.platform.fetch_count("00000010"), 0);
    assert!(h.platform.statuses().is_empty());
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn missing_heartbeat_closes_session_with_offline() {
    let h = harness(Duration::from_millis(150)).await;
    let mut client = open(&h, "gw-e");
    handshake(&mut client, 10).await;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        client.write_all(&[0, 0, 0, 10, 0x01]).await.expect("write");
        read_n(&mut client, 6).await;
    }
    assert_eq!(h.platform.status_count("gw-10", DeviceStatus::Offline), 0);

    expect_closed(&mut client).await;
    assert!(
        h.platform
            .wait_until(WAIT, |p| p.status_count("gw-10", DeviceStatus::Offline) == 1)
            .await
    );
    h.server.stop().await.expect("stop");
}

#[tokio::test]
async fn commands_are_written_to_the_gateway() {
    let h = harness(Duration::from_secs(5)).await;
    let mut client = open(&h, "gw-f");
    handshake(&mut client, 10).await;

    h.server
        .send_command(
            "00000010",
            Command::new("00000010", "config").with_param("report_interval", 120),
        )
        .await
        .expect("send");
    assert_eq!(read_n(&mut client, 7).await, vec![0, 0, 0, 10, 0x10, 0x00, 0x78]);

    h.server
        .send_command("10", Command::new("10", "query"))
        .await
        .expect_err("routing uses the exact wire id");
    h.server.stop().await.expect("stop");
}
