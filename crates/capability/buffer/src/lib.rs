//! # 持久化缓冲队列
//!
//! 保存暂时无法发送的流数据项，连接恢复后由转发流水线定时回放。
//!
//! ## 契约
//!
//! - `add`：持久化写入，由缓冲区分配条目 ID；CURRENT_SAMPLE 条目不入库
//! - `read`：按类型读取最早的至多 `max_count` 条，不删除
//! - `remove`：按条目 ID 删除（回放写入成功后调用）
//! - `start(label)` / `stop()`：按目的地标签分区存储
//!
//! ## 实现
//!
//! - [`InMemoryBuffer`]：`RwLock<BTreeMap>`，用于测试和无需落盘的场景
//! - [`SqliteBuffer`]：每个目的地一个 SQLite 文件（sqlx）

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryBuffer;
pub use sqlite::SqliteBuffer;

use async_trait::async_trait;
use domain::{EntryId, StreamItem, StreamKind};

/// 缓冲区错误。
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer not started")]
    NotStarted,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<sqlx::Error> for BufferError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for BufferError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// 持久化缓冲接口。
#[async_trait]
pub trait DurableBuffer: Send + Sync {
    /// 打开目的地标签对应的存储分区。
    async fn start(&self, label: &str) -> Result<(), BufferError>;

    /// 关闭存储分区，可重复调用。
    async fn stop(&self) -> Result<(), BufferError>;

    /// 写入条目，返回实际入库数量。
    async fn add(&self, items: &[StreamItem]) -> Result<usize, BufferError>;

    /// 读取指定类型最早的至多 `max_count` 条，`entry_id` 已填充。
    async fn read(&self, kind: StreamKind, max_count: usize) -> Result<Vec<StreamItem>, BufferError>;

    /// 删除指定条目，返回实际删除数量。
    async fn remove(&self, entry_ids: &[EntryId]) -> Result<usize, BufferError>;
}

/// 过滤掉不允许入库的条目。
pub(crate) fn bufferable(items: &[StreamItem]) -> impl Iterator<Item = &StreamItem> {
    items.iter().filter(|item| {
        if item.is_current_sample() {
            tracing::trace!(target: "relay.buffer", device_id = %item.device_id(), "current_sample_skipped");
            return false;
        }
        true
    })
}
