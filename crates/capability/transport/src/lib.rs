//! # 下游传输
//!
//! 维护到远端接收服务的长连接，异步上报批次结果与连接状态变化。
//!
//! ```text
//! RelayPipeline ──write(batch)──► OutboundTransport ──► 远端服务
//!       ▲                               │
//!       └──────── TransportEvent ◄──────┘
//!   Connected / Disconnected / SendSucceeded / SendFailed
//! ```
//!
//! `write` 只负责入队，批次结果统一通过事件通道回报。

mod tcp;

pub use tcp::{TcpStreamConfig, TcpStreamTransport};

use async_trait::async_trait;
use domain::StreamItem;
use tokio::sync::mpsc;

/// 传输层错误。
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport not started")]
    NotStarted,
    #[error("transport closed")]
    Closed,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
}

/// 传输层回报事件。
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    SendSucceeded { count: usize },
    /// 发送失败的整批条目。
    SendFailed { items: Vec<StreamItem> },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// 下游传输接口。
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// 启动连接维护，事件写入 `events`。
    async fn start(&self, events: TransportEventSender) -> Result<(), TransportError>;

    /// 入队一个有序批次。
    async fn write(&self, items: Vec<StreamItem>) -> Result<(), TransportError>;

    /// 关闭连接，可重复调用。
    async fn close(&self);
}
