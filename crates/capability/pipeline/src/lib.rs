//! # 转发流水线
//!
//! 每个下游目的地一个 [`RelayPipeline`]：按采集组筛选样本，直发不超过
//! [`MAX_SEND_COUNT`] 条，其余与发送失败的条目进入持久化缓冲，连接恢复后定时回放。
//!
//! ```text
//! add(items) ─► 拓扑 / 状态原样保留
//!            └► 样本 ─► resolve(ARCHIVE) ─► resolve(CURRENT) ─► Selection
//!                                                                   │
//!              前 MAX_SEND_COUNT 条 ─► transport.write ◄───────────┤
//!              其余（去掉 CURRENT）  ─► buffer.add ◄────────────────┘
//!
//! drain 循环：connected ? buffer.read(按优先级) ─► write ─► remove
//! SendFailed ─► buffer.add（去掉 CURRENT）
//! ```

use domain::{DomainEvent, EntryId, Sample, StreamItem, StreamKind, StreamPayload};
use relay_buffer::{BufferError, DurableBuffer};
use relay_capture::{
    CaptureContext, CaptureGroup, CaptureMode, SampleCache, Selection, TopologyCatalog, resolve,
};
use relay_telemetry::RelayMetrics;
use relay_transport::{OutboundTransport, TransportError, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// 单次 add 直发的最大条目数。
pub const MAX_SEND_COUNT: usize = 2000;

/// 缓冲回放周期。
pub const BUFFER_READ_INTERVAL: Duration = Duration::from_millis(5000);

/// 单次回放读取的最大条目数。
pub const MAX_BUFFER_READ_COUNT: usize = 5000;

/// 回放时各类型的读取顺序。
pub const DRAIN_ORDER: [StreamKind; 7] = [
    StreamKind::ConnectionDefinition,
    StreamKind::AgentDefinition,
    StreamKind::ComponentDefinition,
    StreamKind::DataItemDefinition,
    StreamKind::DeviceDefinition,
    StreamKind::Status,
    StreamKind::ArchivedSample,
];

/// 流水线错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pipeline already started")]
    AlreadyStarted,
    #[error("pipeline stopped")]
    Stopped,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),
}

/// 流水线参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 目的地标签，同时作为缓冲分区名。
    pub label: String,
    pub api_key: Option<String>,
    pub capture_groups: Vec<CaptureGroup>,
    pub max_send_count: usize,
    pub max_buffer_read_count: usize,
    pub buffer_read_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            api_key: None,
            capture_groups: Vec::new(),
            max_send_count: MAX_SEND_COUNT,
            max_buffer_read_count: MAX_BUFFER_READ_COUNT,
            buffer_read_interval: BUFFER_READ_INTERVAL,
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.max_send_count == 0 {
            self.max_send_count = MAX_SEND_COUNT;
        }
        if self.max_buffer_read_count == 0 {
            self.max_buffer_read_count = MAX_BUFFER_READ_COUNT;
        }
        if self.buffer_read_interval.is_zero() {
            self.buffer_read_interval = BUFFER_READ_INTERVAL;
        }
        if self.api_key.as_deref().is_some_and(|key| key.trim().is_empty()) {
            self.api_key = None;
        }
        self
    }
}

/// 一次 add 的处理结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    pub sent: usize,
    pub buffered: usize,
    pub dropped: usize,
}

/// 一次回放的处理结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub read: usize,
    pub removed: usize,
}

#[derive(Default)]
struct TopologyState {
    catalog: TopologyCatalog,
    latest: SampleCache,
}

struct Running {
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct PipelineInner {
    config: PipelineConfig,
    transport: Arc<dyn OutboundTransport>,
    buffer: Option<Arc<dyn DurableBuffer>>,
    topology: RwLock<TopologyState>,
    connected: AtomicBool,
    stopped: AtomicBool,
    running: Mutex<Option<Running>>,
    metrics: Arc<RelayMetrics>,
}

/// 单个下游目的地的转发流水线。
#[derive(Clone)]
pub struct RelayPipeline {
    inner: Arc<PipelineInner>,
}

impl RelayPipeline {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn OutboundTransport>,
        buffer: Option<Arc<dyn DurableBuffer>>,
    ) -> Self {
        Self::with_metrics(config, transport, buffer, RelayMetrics::shared())
    }

    pub fn with_metrics(
        config: PipelineConfig,
        transport: Arc<dyn OutboundTransport>,
        buffer: Option<Arc<dyn DurableBuffer>>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let inner = PipelineInner {
            config: config.sanitized(),
            transport,
            buffer,
            topology: RwLock::new(TopologyState::default()),
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            running: Mutex::new(None),
            metrics,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn label(&self) -> &str {
        &self.inner.config.label
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.inner.metrics.clone()
    }

    /// 启动传输、事件消费任务，以及（配置了缓冲时）缓冲分区与回放任务。
    pub async fn start(&self) -> Result<(), PipelineError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(PipelineError::Stopped);
        }
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(PipelineError::AlreadyStarted);
        }

        if let Some(buffer) = &self.inner.buffer {
            buffer.start(&self.inner.config.label).await?;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.inner.transport.start(events_tx).await?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = vec![spawn_event_consumer(self.clone(), events_rx, stop_rx.clone())];
        if self.inner.buffer.is_some() {
            tasks.push(spawn_drain_loop(self.clone(), stop_rx));
        }
        *running = Some(Running {
            stop: stop_tx,
            tasks,
        });

        info!(
            target: "relay.pipeline",
            label = %self.inner.config.label,
            buffered = self.inner.buffer.is_some(),
            groups = self.inner.config.capture_groups.len(),
            "pipeline_started"
        );
        Ok(())
    }

    /// 停止流水线。可重复调用。
    ///
    /// 先关闭传输（未发出的批次以 `SendFailed` 回报），再让事件消费任务处理完剩余事件
    /// 后退出，最后关闭缓冲，回放中的条目因此不会丢失。
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let running = self.inner.running.lock().await.take();
        self.inner.transport.close().await;
        if let Some(running) = running {
            let _ = running.stop.send(true);
            for task in running.tasks {
                if let Err(err) = task.await {
                    warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, "pipeline_task_join_failed");
                }
            }
        }
        if let Some(buffer) = &self.inner.buffer
            && let Err(err) = buffer.stop().await
        {
            warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, "buffer_stop_failed");
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        info!(target: "relay.pipeline", label = %self.inner.config.label, "pipeline_stopped");
    }

    /// 设备监控事件入口。
    pub async fn handle_event(&self, event: DomainEvent) -> AddOutcome {
        self.add(event.into_stream_items()).await
    }

    /// 筛选并发送一批条目；超出直发上限的部分进入缓冲（无缓冲则丢弃）。
    pub async fn add(&self, items: Vec<StreamItem>) -> AddOutcome {
        if items.is_empty() {
            return AddOutcome::default();
        }
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!(target: "relay.pipeline", label = %self.inner.config.label, count = items.len(), "add_after_stop_ignored");
            return AddOutcome::default();
        }
        self.inner.metrics.record_items_received(items.len());

        let mut selected = self.select(items);
        if selected.is_empty() {
            return AddOutcome::default();
        }
        if let Some(api_key) = &self.inner.config.api_key {
            for item in &mut selected {
                item.api_key = Some(api_key.clone());
            }
        }

        let max_send_count = self.inner.config.max_send_count;
        let overflow = if selected.len() > max_send_count {
            selected.split_off(max_send_count)
        } else {
            Vec::new()
        };

        let mut outcome = AddOutcome {
            sent: selected.len(),
            ..AddOutcome::default()
        };
        self.write(selected).await;

        if !overflow.is_empty() {
            let total = overflow.len();
            match &self.inner.buffer {
                Some(buffer) => {
                    let buffered = self.buffer_items(buffer.as_ref(), &overflow).await;
                    outcome.buffered = buffered;
                    outcome.dropped = total - buffered;
                    if outcome.dropped > 0 {
                        self.inner.metrics.record_items_dropped(outcome.dropped);
                    }
                    info!(
                        target: "relay.pipeline",
                        label = %self.inner.config.label,
                        count = total,
                        buffered,
                        "overflow_buffered"
                    );
                }
                None => {
                    outcome.dropped = total;
                    self.inner.metrics.record_items_dropped(total);
                    warn!(
                        target: "relay.pipeline",
                        label = %self.inner.config.label,
                        count = total,
                        max_send_count,
                        "overflow_dropped_without_buffer"
                    );
                }
            }
        }
        outcome
    }

    /// 缓冲回放一次：连接正常时按优先级读取，整批写入后删除对应条目。
    pub async fn drain_once(&self) -> DrainOutcome {
        let Some(buffer) = &self.inner.buffer else {
            return DrainOutcome::default();
        };
        if !self.is_connected() {
            trace!(target: "relay.pipeline", label = %self.inner.config.label, "drain_skipped_disconnected");
            return DrainOutcome::default();
        }

        let max_count = self.inner.config.max_buffer_read_count;
        let mut items: Vec<StreamItem> = Vec::new();
        for kind in DRAIN_ORDER {
            let remaining = max_count.saturating_sub(items.len());
            if remaining == 0 {
                break;
            }
            match buffer.read(kind, remaining).await {
                Ok(read) => items.extend(read),
                Err(err) => {
                    self.inner.metrics.record_buffer_error();
                    warn!(target: "relay.pipeline", label = %self.inner.config.label, kind = %kind, error = %err, "buffer_read_failed");
                }
            }
        }
        if items.is_empty() {
            return DrainOutcome::default();
        }

        let read = items.len();
        self.inner.metrics.record_buffer_read(read);
        let entry_ids: Vec<EntryId> = items.iter().filter_map(|item| item.entry_id).collect();
        if let Some(api_key) = &self.inner.config.api_key {
            for item in &mut items {
                item.api_key = Some(api_key.clone());
            }
        }
        info!(target: "relay.pipeline", label = %self.inner.config.label, count = read, "buffer_read");

        if let Err(err) = self.inner.transport.write(items).await {
            warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, "drain_write_failed");
            return DrainOutcome { read, removed: 0 };
        }
        self.inner.metrics.record_items_sent(read);

        let removed = match buffer.remove(&entry_ids).await {
            Ok(removed) => removed,
            Err(err) => {
                self.inner.metrics.record_buffer_error();
                warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, "buffer_remove_failed");
                0
            }
        };
        self.inner.metrics.record_buffer_removed(removed);
        DrainOutcome { read, removed }
    }

    /// 传输层事件回调。
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        let label = &self.inner.config.label;
        match event {
            TransportEvent::Connected => {
                self.inner.connected.store(true, Ordering::SeqCst);
                info!(target: "relay.pipeline", label = %label, "destination_connected");
            }
            TransportEvent::Disconnected => {
                self.inner.connected.store(false, Ordering::SeqCst);
                info!(target: "relay.pipeline", label = %label, "destination_disconnected");
            }
            TransportEvent::SendSucceeded { count } => {
                self.inner.metrics.record_send_success(count);
                info!(target: "relay.pipeline", label = %label, count, "items_sent");
            }
            TransportEvent::SendFailed { items } => {
                self.inner.metrics.record_send_failure();
                self.rebuffer(items).await;
            }
        }
    }

    /// 拓扑与状态原样保留；样本更新全局视图后经 ARCHIVE、CURRENT 两轮筛选。
    fn select(&self, items: Vec<StreamItem>) -> Vec<StreamItem> {
        let mut kept = Vec::new();
        let mut samples: Vec<Sample> = Vec::new();
        for item in items {
            match item.payload {
                StreamPayload::Sample(sample) => samples.push(sample),
                _ => kept.push(item),
            }
        }

        let mut topology = self
            .inner
            .topology
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        topology.catalog.apply(kept.iter().filter_map(|item| match &item.payload {
            StreamPayload::Definition(definition) => Some(definition),
            _ => None,
        }));
        if samples.is_empty() {
            return kept;
        }
        topology.latest.update(samples.iter());

        let context = CaptureContext {
            catalog: &topology.catalog,
            latest: &topology.latest,
        };
        let groups = &self.inner.config.capture_groups;
        let mut selection = Selection::new();
        resolve(groups, CaptureMode::Archive, &samples, context, &mut selection);
        resolve(groups, CaptureMode::Current, &samples, context, &mut selection);
        drop(topology);

        self.inner.metrics.record_samples_selected(selection.len());
        trace!(
            target: "relay.pipeline",
            label = %self.inner.config.label,
            received = samples.len(),
            selected = selection.len(),
            "samples_filtered"
        );
        kept.extend(selection.into_items());
        kept
    }

    async fn write(&self, items: Vec<StreamItem>) {
        let count = items.len();
        match self.inner.transport.write(items.clone()).await {
            Ok(()) => self.inner.metrics.record_items_sent(count),
            Err(err) => {
                warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, count, "transport_write_failed");
                self.inner.metrics.record_send_failure();
                self.rebuffer(items).await;
            }
        }
    }

    /// 发送失败的整批重新入缓冲（去掉 CURRENT_SAMPLE）。
    async fn rebuffer(&self, items: Vec<StreamItem>) {
        let label = &self.inner.config.label;
        let total = items.len();
        match &self.inner.buffer {
            Some(buffer) => {
                let buffered = self.buffer_items(buffer.as_ref(), &items).await;
                let dropped = total - buffered;
                if dropped > 0 {
                    self.inner.metrics.record_items_dropped(dropped);
                }
                warn!(target: "relay.pipeline", label = %label, count = total, buffered, "send_failed_buffered");
            }
            None => {
                self.inner.metrics.record_items_dropped(total);
                warn!(target: "relay.pipeline", label = %label, count = total, "send_failed_dropped");
            }
        }
    }

    async fn buffer_items(&self, buffer: &dyn DurableBuffer, items: &[StreamItem]) -> usize {
        let retained: Vec<StreamItem> = items
            .iter()
            .filter(|item| item.kind != StreamKind::CurrentSample)
            .cloned()
            .collect();
        if retained.is_empty() {
            return 0;
        }
        match buffer.add(&retained).await {
            Ok(added) => {
                self.inner.metrics.record_items_buffered(added);
                added
            }
            Err(err) => {
                self.inner.metrics.record_buffer_error();
                warn!(target: "relay.pipeline", label = %self.inner.config.label, error = %err, count = retained.len(), "buffer_add_failed");
                0
            }
        }
    }
}

fn spawn_event_consumer(
    pipeline: RelayPipeline,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    while let Ok(event) = events.try_recv() {
                        pipeline.handle_transport_event(event).await;
                    }
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => pipeline.handle_transport_event(event).await,
                    None => break,
                },
            }
        }
    })
}

/// 先回放一次，再以回放周期为超时等待停止信号。
fn spawn_drain_loop(pipeline: RelayPipeline, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    let period = pipeline.inner.config.buffer_read_interval;
    tokio::spawn(async move {
        loop {
            pipeline.drain_once().await;
            if timeout(period, stop.changed()).await.is_ok() {
                break;
            }
        }
    })
}
