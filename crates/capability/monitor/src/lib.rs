//! # 设备监控
//!
//! 每台设备一个 [`DeviceMonitor`]，把上游 agent 的文档回调转换为 [`DomainEvent`]，
//! 经单一通道交给转发流水线。
//!
//! ```text
//! AgentSource (probe / sample 轮询)
//!     │ on_devices / on_streams / on_connection_error
//!     ▼
//! DeviceMonitor ── 心跳 60s ──┐
//!     │ 去抖状态更新 ◄─────────┘
//!     ▼
//! mpsc::UnboundedSender<DomainEvent>
//! ```
//!
//! [`DomainEvent`]: domain::DomainEvent

mod document;
mod identity;
mod monitor;
mod tcp_source;

pub use document::{
    AgentDocument, ComponentModel, DataItemModel, DeviceDescription, DeviceModel, DeviceStream,
    DevicesDocument, DocumentHeader, Observation, StreamsDocument,
};
pub use identity::{DEFAULT_INTERVAL_MS, DeviceIdentity, DeviceIdentityBuilder};
pub use monitor::{DeviceMonitor, HEARTBEAT_INTERVAL, MonitorOptions, MonitorState};
pub use tcp_source::{TcpAgentSource, TcpAgentSourceConfig};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// 设备监控错误
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("already started")]
    AlreadyStarted,
    #[error("monitor closed")]
    Closed,
    #[error("connection error: {0}")]
    Connection(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 上游文档回调。
pub trait AgentDocumentHandler: Send + Sync {
    fn on_devices(&self, document: DevicesDocument);

    fn on_streams(&self, document: StreamsDocument);

    fn on_connection_error(&self, error: &MonitorError);

    fn on_started(&self) {}

    fn on_stopped(&self) {}
}

/// 上游会话：持续拉取文档直到 `stop` 置位。
#[async_trait]
pub trait AgentSource: Send + Sync {
    async fn run(
        &self,
        identity: DeviceIdentity,
        handler: Arc<dyn AgentDocumentHandler>,
        stop: watch::Receiver<bool>,
    );
}
