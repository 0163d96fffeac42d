//! 平台指令桥：平台设备 ID → 设备编号 → 引擎下发。

use async_trait::async_trait;
use domain::Command;
use gw_directory::DeviceDirectory;
use gw_platform::{CommandSink, PlatformCommand};
use gw_protocol::TcpServer;
use std::sync::Arc;
use tracing::{info, warn};

pub struct CommandBridge {
    engine: TcpServer,
    directory: Arc<DeviceDirectory>,
}

impl CommandBridge {
    pub fn new(engine: TcpServer, directory: Arc<DeviceDirectory>) -> Self {
        Self { engine, directory }
    }
}

#[async_trait]
impl CommandSink for CommandBridge {
    async fn on_command(&self, command: PlatformCommand) {
        // 仅已解析过身份的设备可以接收指令
        let identity = match self.directory.resolve_by_identity(&command.device_id) {
            Ok(identity) => identity,
            Err(err) => {
                warn!(
                    target: "gw.server",
                    device_id = %command.device_id,
                    message_id = %command.message_id,
                    method = %command.method,
                    error = %err,
                    "platform_command_device_unknown"
                );
                return;
            }
        };

        let mut outgoing = Command::new(identity.wire_id.clone(), command.method.clone());
        outgoing.device_id = identity.device_id;
        outgoing.command_id = command.message_id.clone();
        outgoing.params = command.params;

        match self.engine.send_command(&identity.wire_id, outgoing).await {
            Ok(()) => info!(
                target: "gw.server",
                wire_id = %identity.wire_id,
                message_id = %command.message_id,
                method = %command.method,
                "platform_command_forwarded"
            ),
            Err(err) => warn!(
                target: "gw.server",
                wire_id = %identity.wire_id,
                message_id = %command.message_id,
                method = %command.method,
                error = %err,
                "platform_command_failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_platform::{InMemoryPlatform, Platform};
    use gw_protocol::{HandlerVariant, SensorFrame, SensorProtocolHandler, TcpServerConfig};
    use gw_telemetry::DeviceAuditLog;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn platform_command(device_id: &str, method: &str) -> PlatformCommand {
        let mut params = serde_json::Map::new();
        params.insert("sleep_minutes".to_string(), serde_json::json!(5));
        PlatformCommand {
            device_id: device_id.to_string(),
            message_id: "msg-1".to_string(),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn platform_command_reaches_device_connection() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.register_device("00000003", "dev-3");
        let directory = Arc::new(DeviceDirectory::new(platform.clone()));
        let audit = Arc::new(DeviceAuditLog::disabled());
        let engine = TcpServer::new(
            HandlerVariant::framed(SensorProtocolHandler::new(15001)),
            directory.clone(),
            platform.clone(),
            audit,
            TcpServerConfig {
                listen_host: "127.0.0.1".to_string(),
                listen_port: 0,
                ..TcpServerConfig::default()
            },
        );
        engine.start().await.expect("start");
        platform
            .register_command_sink(Arc::new(CommandBridge::new(engine.clone(), directory)))
            .expect("register");

        // 未连接过的设备：身份未缓存，指令被丢弃
        assert!(platform.deliver_command(platform_command("dev-3", "sleep")).await);

        let (mut client, server_side) = tokio::io::duplex(256);
        engine.serve_connection(server_side, "duplex-3").expect("permit");
        let frame = SensorFrame {
            wire_id: 3,
            temperature: 100,
            humidity: 100,
            voltage: 100,
            battery: 10,
        };
        client.write_all(&frame.encode()).await.expect("write");
        assert!(platform.wait_until(Duration::from_secs(2), |p| p.telemetry().len() == 1).await);

        assert!(platform.deliver_command(platform_command("dev-3", "sleep")).await);
        let mut command = [0u8; 8];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut command))
            .await
            .expect("command not delivered")
            .expect("read");
        assert_eq!(&command[..7], &[0, 0, 0, 3, 0x01, 0x00, 0x05]);

        assert!(platform.deliver_command(platform_command("dev-9", "sleep")).await);
        engine.stop().await.expect("stop");
    }
}
