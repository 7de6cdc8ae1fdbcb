//! TCP 长连接传输实现
//!
//! 每个批次编码为一行 JSON：`{"batch_id": "...", "items": [...]}`。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let transport = TcpStreamTransport::new(TcpStreamConfig {
//!     hostname: "relay.example.com".to_string(),
//!     port: 8472,
//!     ..TcpStreamConfig::default()
//! });
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! transport.start(tx).await?;
//! transport.write(items).await?;
//! ```

use crate::{OutboundTransport, TransportError, TransportEvent, TransportEventSender};
use domain::StreamItem;
use relay_telemetry::new_batch_id;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// TCP 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpStreamConfig {
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    /// 发送节拍（毫秒）
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 重连间隔（毫秒）
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    /// 单批写入超时（毫秒）
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

fn default_port() -> u16 {
    8472
}

fn default_send_interval() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_write_timeout() -> u64 {
    5000
}

impl Default for TcpStreamConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: default_port(),
            use_tls: false,
            send_interval_ms: default_send_interval(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_interval_ms: default_reconnect_interval(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl TcpStreamConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[derive(Serialize)]
struct BatchFrame<'a> {
    batch_id: String,
    items: &'a [StreamItem],
}

struct Running {
    queue: mpsc::UnboundedSender<Vec<StreamItem>>,
    stop: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// TCP 长连接传输
pub struct TcpStreamTransport {
    config: TcpStreamConfig,
    running: Mutex<Option<Running>>,
}

impl TcpStreamTransport {
    pub fn new(config: TcpStreamConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TcpStreamConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl OutboundTransport for TcpStreamTransport {
    async fn start(&self, events: TransportEventSender) -> Result<(), TransportError> {
        if self.config.use_tls {
            return Err(TransportError::Unsupported("tls".to_string()));
        }
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(self.config.clone(), queue_rx, events, stop_rx));
        *running = Some(Running {
            queue: queue_tx,
            stop: stop_tx,
            worker,
        });
        info!(target: "relay.transport", address = %self.config.address(), "transport_started");
        Ok(())
    }

    async fn write(&self, items: Vec<StreamItem>) -> Result<(), TransportError> {
        let running = self.running.lock().await;
        let Some(running) = running.as_ref() else {
            return Err(TransportError::NotStarted);
        };
        running
            .queue
            .send(items)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            let _ = running.stop.send(true);
            drop(running.queue);
            // 等待工作任务回报完剩余批次
            if let Err(err) = running.worker.await {
                warn!(target: "relay.transport", address = %self.config.address(), error = %err, "transport_worker_join_failed");
            }
            info!(target: "relay.transport", address = %self.config.address(), "transport_closed");
        }
    }
}

async fn run_worker(
    config: TcpStreamConfig,
    mut queue: mpsc::UnboundedReceiver<Vec<StreamItem>>,
    events: TransportEventSender,
    mut stop: watch::Receiver<bool>,
) {
    let address = config.address();
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms.max(1));
    let reconnect_interval = Duration::from_millis(config.reconnect_interval_ms);
    let write_timeout = Duration::from_millis(config.write_timeout_ms.max(1));
    let mut ticker = interval(Duration::from_millis(config.send_interval_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream: Option<TcpStream> = None;
    let mut reconnect_at = Instant::now();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }

        if stream.is_none() && Instant::now() >= reconnect_at {
            match timeout(connect_timeout, TcpStream::connect(&address)).await {
                Ok(Ok(connected)) => {
                    info!(target: "relay.transport", address = %address, "transport_connected");
                    stream = Some(connected);
                    let _ = events.send(TransportEvent::Connected);
                }
                Ok(Err(err)) => {
                    debug!(target: "relay.transport", address = %address, error = %err, "transport_connect_failed");
                    reconnect_at = Instant::now() + reconnect_interval;
                }
                Err(_) => {
                    debug!(target: "relay.transport", address = %address, "transport_connect_timeout");
                    reconnect_at = Instant::now() + reconnect_interval;
                }
            }
        }

        while let Ok(batch) = queue.try_recv() {
            if batch.is_empty() {
                continue;
            }
            let Some(connection) = stream.as_mut().filter(|_| !*stop.borrow()) else {
                let _ = events.send(TransportEvent::SendFailed { items: batch });
                continue;
            };
            let written = match timeout(write_timeout, write_batch(connection, &batch)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Io(std::io::ErrorKind::TimedOut.into())),
            };
            match written {
                Ok(()) => {
                    let _ = events.send(TransportEvent::SendSucceeded { count: batch.len() });
                }
                Err(err) => {
                    warn!(target: "relay.transport", address = %address, error = %err, count = batch.len(), "transport_write_failed");
                    stream = None;
                    reconnect_at = Instant::now() + reconnect_interval;
                    let _ = events.send(TransportEvent::Disconnected);
                    let _ = events.send(TransportEvent::SendFailed { items: batch });
                }
            }
        }
    }

    // 停止时仍在队列中的批次全部回报失败
    queue.close();
    while let Ok(batch) = queue.try_recv() {
        if !batch.is_empty() {
            let _ = events.send(TransportEvent::SendFailed { items: batch });
        }
    }
    if stream.is_some() {
        let _ = events.send(TransportEvent::Disconnected);
    }
}

async fn write_batch(stream: &mut TcpStream, items: &[StreamItem]) -> Result<(), TransportError> {
    let frame = BatchFrame {
        batch_id: new_batch_id(),
        items,
    };
    let mut line =
        serde_json::to_vec(&frame).map_err(|err| TransportError::Encode(err.to_string()))?;
    line.push(b'\n');
    stream.write_all(&line).await?;
    stream.flush().await?;
    debug!(target: "relay.transport", batch_id = %frame.batch_id, count = items.len(), "batch_written");
    Ok(())
}
