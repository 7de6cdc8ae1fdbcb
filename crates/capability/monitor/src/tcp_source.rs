//! TCP 上游 agent 轮询源
//!
//! 每次连接先发送 `PROBE <device_name>` 取设备结构，随后按设备轮询间隔发送
//! `SAMPLE <device_name>`。每个响应为一行 JSON 编码的 [`AgentDocument`]。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let source = Arc::new(TcpAgentSource::new(TcpAgentSourceConfig::default()));
//! let monitor = DeviceMonitor::new(identity, source, events_tx);
//! monitor.start()?;
//! ```

use crate::document::AgentDocument;
use crate::{AgentDocumentHandler, AgentSource, DeviceIdentity, MonitorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// TCP 轮询源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpAgentSourceConfig {
    /// 连接与读取超时（毫秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// 重连间隔（毫秒）
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_reconnect_interval() -> u64 {
    5000
}

impl Default for TcpAgentSourceConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            reconnect_interval_ms: default_reconnect_interval(),
        }
    }
}

/// TCP 上游轮询源
pub struct TcpAgentSource {
    config: TcpAgentSourceConfig,
}

impl TcpAgentSource {
    pub fn new(config: TcpAgentSourceConfig) -> Self {
        Self { config }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms.max(1))
    }

    async fn poll_loop(
        &self,
        identity: &DeviceIdentity,
        stream: TcpStream,
        handler: &Arc<dyn AgentDocumentHandler>,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<(), MonitorError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let name = identity.device_name();

        self.request(&mut reader, &mut writer, &format!("PROBE {name}"), handler)
            .await?;

        let period = Duration::from_millis(identity.interval_ms());
        loop {
            tokio::select! {
                _ = stop.changed() => return Ok(()),
                _ = tokio::time::sleep(period) => {}
            }
            self.request(&mut reader, &mut writer, &format!("SAMPLE {name}"), handler)
                .await?;
        }
    }

    async fn request(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        command: &str,
        handler: &Arc<dyn AgentDocumentHandler>,
    ) -> Result<(), MonitorError> {
        writer.write_all(format!("{command}\n").as_bytes()).await?;
        writer.flush().await?;
        debug!(target: "relay.monitor", command = %command, "agent_request_sent");

        let mut line = String::new();
        let read = timeout(self.request_timeout(), reader.read_line(&mut line))
            .await
            .map_err(|_| MonitorError::Connection("read timeout".to_string()))??;
        if read == 0 {
            return Err(MonitorError::Connection("connection closed".to_string()));
        }

        match serde_json::from_str::<AgentDocument>(line.trim()) {
            Ok(AgentDocument::Devices(document)) => handler.on_devices(document),
            Ok(AgentDocument::Streams(document)) => handler.on_streams(document),
            Err(err) => {
                debug!(target: "relay.monitor", error = %err, "agent_document_malformed");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl AgentSource for TcpAgentSource {
    async fn run(
        &self,
        identity: DeviceIdentity,
        handler: Arc<dyn AgentDocumentHandler>,
        mut stop: watch::Receiver<bool>,
    ) {
        let address = format!("{}:{}", identity.address(), identity.port());
        handler.on_started();

        while !*stop.borrow() {
            info!(target: "relay.monitor", address = %address, "agent_connecting");
            let result = match timeout(self.request_timeout(), TcpStream::connect(&address)).await {
                Ok(Ok(stream)) => {
                    info!(target: "relay.monitor", address = %address, "agent_connected");
                    self.poll_loop(&identity, stream, &handler, &mut stop).await
                }
                Ok(Err(err)) => Err(MonitorError::Io(err)),
                Err(_) => Err(MonitorError::Connection("connect timeout".to_string())),
            };

            match result {
                Ok(()) => break,
                Err(err) => {
                    handler.on_connection_error(&err);
                    warn!(
                        target: "relay.monitor",
                        address = %address,
                        reconnect_ms = self.config.reconnect_interval_ms,
                        "agent_reconnecting"
                    );
                }
            }

            tokio::select! {
                _ = stop.changed() => break,
                _ = tokio::time::sleep(Duration::from_millis(self.config.reconnect_interval_ms)) => {}
            }
        }

        handler.on_stopped();
    }
}
