//! SQLite 缓冲实现
//!
//! 每个目的地标签对应目录下的一个数据库文件：
//! - `stream_buffer(entry_id, kind, payload, created_at_ms)`
//! - payload 为 StreamItem 的 JSON（不含条目 ID 与凭据）

use crate::{BufferError, DurableBuffer, bufferable};
use domain::{EntryId, StreamItem, StreamKind, now_epoch_ms};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;

pub struct SqliteBuffer {
    directory: PathBuf,
    pool: RwLock<Option<SqlitePool>>,
}

impl SqliteBuffer {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            pool: RwLock::new(None),
        }
    }

    /// 标签对应的数据库文件路径。
    pub fn database_path(&self, label: &str) -> PathBuf {
        self.directory.join(format!("{}.sqlite3", sanitize_label(label)))
    }

    async fn pool(&self) -> Result<SqlitePool, BufferError> {
        self.pool.read().await.clone().ok_or(BufferError::NotStarted)
    }
}

fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}

#[async_trait::async_trait]
impl DurableBuffer for SqliteBuffer {
    async fn start(&self, label: &str) -> Result<(), BufferError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| BufferError::Storage(err.to_string()))?;
        let path = self.database_path(label);
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stream_buffer (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS stream_buffer_kind ON stream_buffer (kind, entry_id);",
        )
        .execute(&pool)
        .await?;

        let previous = self.pool.write().await.replace(pool);
        if let Some(previous) = previous {
            previous.close().await;
        }
        info!(target: "relay.buffer", label = %label, path = %path.display(), "buffer_started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), BufferError> {
        let pool = self.pool.write().await.take();
        if let Some(pool) = pool {
            pool.close().await;
            info!(target: "relay.buffer", path = %self.directory.display(), "buffer_stopped");
        }
        Ok(())
    }

    async fn add(&self, items: &[StreamItem]) -> Result<usize, BufferError> {
        let pool = self.pool().await?;
        let created_at_ms = now_epoch_ms();
        let mut tx = pool.begin().await?;
        let mut added = 0;
        for item in bufferable(items) {
            // 凭据不落盘，回放时重新附加
            let mut stored = item.clone();
            stored.entry_id = None;
            stored.api_key = None;
            let payload = serde_json::to_string(&stored)?;
            sqlx::query(
                "INSERT INTO stream_buffer (kind, payload, created_at_ms) VALUES (?1, ?2, ?3)",
            )
            .bind(item.kind.as_str())
            .bind(payload)
            .bind(created_at_ms)
            .execute(&mut *tx)
            .await?;
            added += 1;
        }
        tx.commit().await?;
        Ok(added)
    }

    async fn read(&self, kind: StreamKind, max_count: usize) -> Result<Vec<StreamItem>, BufferError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;
        let rows = sqlx::query(
            "SELECT entry_id, payload FROM stream_buffer WHERE kind = ?1 ORDER BY entry_id LIMIT ?2",
        )
        .bind(kind.as_str())
        .bind(i64::try_from(max_count).unwrap_or(i64::MAX))
        .fetch_all(&pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let entry_id: i64 = row.try_get("entry_id")?;
            let payload: String = row.try_get("payload")?;
            let mut item: StreamItem = serde_json::from_str(&payload)?;
            item.entry_id = Some(entry_id);
            items.push(item);
        }
        Ok(items)
    }

    async fn remove(&self, entry_ids: &[EntryId]) -> Result<usize, BufferError> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut removed = 0;
        for entry_id in entry_ids {
            let result = sqlx::query("DELETE FROM stream_buffer WHERE entry_id = ?1")
                .bind(*entry_id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }
}
