//! 日志初始化、计数指标与批次 ID 生成。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing_subscriber::{EnvFilter, fmt};

/// 转发链路计数快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub items_received: u64,
    pub samples_selected: u64,
    pub items_sent: u64,
    pub items_buffered: u64,
    pub items_dropped: u64,
    pub send_success: u64,
    pub send_failure: u64,
    pub buffer_read: u64,
    pub buffer_removed: u64,
    pub buffer_errors: u64,
    pub status_events: u64,
    pub topology_batches: u64,
    pub sample_batches: u64,
}

/// 转发链路计数器。
///
/// 每个流水线 / 设备监控在构造时注入一个实例，测试可独立观测。
#[derive(Debug, Default)]
pub struct RelayMetrics {
    items_received: AtomicU64,
    samples_selected: AtomicU64,
    items_sent: AtomicU64,
    items_buffered: AtomicU64,
    items_dropped: AtomicU64,
    send_success: AtomicU64,
    send_failure: AtomicU64,
    buffer_read: AtomicU64,
    buffer_removed: AtomicU64,
    buffer_errors: AtomicU64,
    status_events: AtomicU64,
    topology_batches: AtomicU64,
    sample_batches: AtomicU64,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_received: self.items_received.load(Ordering::Relaxed),
            samples_selected: self.samples_selected.load(Ordering::Relaxed),
            items_sent: self.items_sent.load(Ordering::Relaxed),
            items_buffered: self.items_buffered.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            send_success: self.send_success.load(Ordering::Relaxed),
            send_failure: self.send_failure.load(Ordering::Relaxed),
            buffer_read: self.buffer_read.load(Ordering::Relaxed),
            buffer_removed: self.buffer_removed.load(Ordering::Relaxed),
            buffer_errors: self.buffer_errors.load(Ordering::Relaxed),
            status_events: self.status_events.load(Ordering::Relaxed),
            topology_batches: self.topology_batches.load(Ordering::Relaxed),
            sample_batches: self.sample_batches.load(Ordering::Relaxed),
        }
    }

    /// 记录 add 收到的条目数。
    pub fn record_items_received(&self, count: usize) {
        self.items_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录经采集组选中的样本数。
    pub fn record_samples_selected(&self, count: usize) {
        self.samples_selected.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录交给传输层的条目数。
    pub fn record_items_sent(&self, count: usize) {
        self.items_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录写入缓冲区的条目数。
    pub fn record_items_buffered(&self, count: usize) {
        self.items_buffered.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录不可恢复丢弃的条目数。
    pub fn record_items_dropped(&self, count: usize) {
        self.items_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录下游确认发送成功的条目数。
    pub fn record_send_success(&self, count: usize) {
        self.send_success.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// 记录发送失败的批次数。
    pub fn record_send_failure(&self) {
        self.send_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_buffer_read(&self, count: usize) {
        self.buffer_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_buffer_removed(&self, count: usize) {
        self.buffer_removed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_buffer_error(&self) {
        self.buffer_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_event(&self) {
        self.status_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_topology_batch(&self) {
        self.topology_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_batch(&self) {
        self.sample_batches.fetch_add(1, Ordering::Relaxed);
    }
}

static METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

/// 进程级默认指标实例（进程装配时共享给各组件）。
pub fn metrics() -> Arc<RelayMetrics> {
    METRICS.get_or_init(RelayMetrics::shared).clone()
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成下游批次 ID。
pub fn new_batch_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
