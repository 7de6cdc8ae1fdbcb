//! 内存缓冲实现
//!
//! 进程退出即丢失，仅用于测试和占位。

use crate::{BufferError, DurableBuffer, bufferable};
use domain::{EntryId, StreamItem, StreamKind};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    label: Option<String>,
    next_id: EntryId,
    entries: BTreeMap<EntryId, StreamItem>,
}

/// 内存缓冲区
#[derive(Default)]
pub struct InMemoryBuffer {
    state: RwLock<MemoryState>,
}

impl InMemoryBuffer {
    /// 创建新的内存缓冲区
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前条目数量（用于测试）
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前分区标签（用于测试）
    pub fn label(&self) -> Option<String> {
        self.state.read().ok().and_then(|s| s.label.clone())
    }

    /// 全部条目快照（用于测试）
    pub fn snapshot(&self) -> Vec<StreamItem> {
        self.state
            .read()
            .map(|s| s.entries.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl DurableBuffer for InMemoryBuffer {
    async fn start(&self, label: &str) -> Result<(), BufferError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BufferError::Storage("lock failed".to_string()))?;
        state.label = Some(label.to_string());
        Ok(())
    }

    async fn stop(&self) -> Result<(), BufferError> {
        Ok(())
    }

    async fn add(&self, items: &[StreamItem]) -> Result<usize, BufferError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BufferError::Storage("lock failed".to_string()))?;
        let mut added = 0;
        for item in bufferable(items) {
            state.next_id += 1;
            let entry_id = state.next_id;
            let mut item = item.clone();
            item.entry_id = Some(entry_id);
            state.entries.insert(entry_id, item);
            added += 1;
        }
        Ok(added)
    }

    async fn read(&self, kind: StreamKind, max_count: usize) -> Result<Vec<StreamItem>, BufferError> {
        let state = self
            .state
            .read()
            .map_err(|_| BufferError::Storage("lock failed".to_string()))?;
        Ok(state
            .entries
            .values()
            .filter(|item| item.kind == kind)
            .take(max_count)
            .cloned()
            .collect())
    }

    async fn remove(&self, entry_ids: &[EntryId]) -> Result<usize, BufferError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BufferError::Storage("lock failed".to_string()))?;
        Ok(entry_ids
            .iter()
            .filter(|entry_id| state.entries.remove(*entry_id).is_some())
            .count())
    }
}
