use crate::document::{ComponentModel, DataItemModel, DevicesDocument, StreamsDocument};
use crate::{AgentDocumentHandler, AgentSource, DeviceIdentity, MonitorError};
use domain::{
    AgentDefinition, ComponentDefinition, DataItemDefinition, DeviceDefinition, DomainEvent,
    Sample, StatusEvent, TopologyDefinition, now_epoch_ms,
};
use relay_telemetry::RelayMetrics;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info, trace};

/// 状态心跳周期。
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

const AVAILABILITY_TYPE: &str = "AVAILABILITY";
const AVAILABLE_VALUE: &str = "AVAILABLE";
const CONDITION_CATEGORY: &str = "CONDITION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Connected,
    Disconnected,
}

/// 监控可选项。
#[derive(Clone)]
pub struct MonitorOptions {
    pub heartbeat_interval: Duration,
    pub metrics: Arc<RelayMetrics>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            metrics: RelayMetrics::shared(),
        }
    }
}

#[derive(Debug, Default)]
struct StatusState {
    connected: bool,
    available: bool,
    last_emitted: Option<(bool, bool)>,
}

#[derive(Debug, Clone, Copy)]
enum StatusTrigger {
    Initial,
    Heartbeat,
    Connected,
    ConnectionLost,
    Availability(bool),
}

struct Running {
    stop: watch::Sender<bool>,
    heartbeat: JoinHandle<()>,
    source: JoinHandle<()>,
}

struct MonitorInner {
    identity: DeviceIdentity,
    source: Arc<dyn AgentSource>,
    events: Mutex<Option<mpsc::UnboundedSender<DomainEvent>>>,
    status: Mutex<StatusState>,
    state: Mutex<MonitorState>,
    availability_id: Mutex<Option<String>>,
    running: Mutex<Option<Running>>,
    heartbeat_interval: Duration,
    metrics: Arc<RelayMetrics>,
}

/// 单设备监控。
#[derive(Clone)]
pub struct DeviceMonitor {
    inner: Arc<MonitorInner>,
}

impl DeviceMonitor {
    pub fn new(
        identity: DeviceIdentity,
        source: Arc<dyn AgentSource>,
        events: mpsc::UnboundedSender<DomainEvent>,
    ) -> Self {
        Self::with_options(identity, source, events, MonitorOptions::default())
    }

    pub fn with_options(
        identity: DeviceIdentity,
        source: Arc<dyn AgentSource>,
        events: mpsc::UnboundedSender<DomainEvent>,
        options: MonitorOptions,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                identity,
                source,
                events: Mutex::new(Some(events)),
                status: Mutex::new(StatusState::default()),
                state: Mutex::new(MonitorState::Stopped),
                availability_id: Mutex::new(None),
                running: Mutex::new(None),
                heartbeat_interval: options.heartbeat_interval,
                metrics: options.metrics,
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn state(&self) -> MonitorState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 上游会话使用的文档回调。
    pub fn handler(&self) -> Arc<dyn AgentDocumentHandler> {
        self.inner.clone()
    }

    /// 发出初始状态，启动心跳与上游会话。需在 tokio 运行时内调用。
    pub fn start(&self) -> Result<(), MonitorError> {
        let mut running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(MonitorError::AlreadyStarted);
        }
        if !self.inner.is_open() {
            return Err(MonitorError::Closed);
        }

        self.inner.set_state(MonitorState::Starting);
        self.inner.update_status(StatusTrigger::Initial);

        let (stop_tx, stop_rx) = watch::channel(false);
        let heartbeat = tokio::spawn(run_heartbeat(self.inner.clone(), stop_rx.clone()));
        let inner = self.inner.clone();
        let source = tokio::spawn(async move {
            let handler: Arc<dyn AgentDocumentHandler> = inner.clone();
            inner
                .source
                .run(inner.identity.clone(), handler, stop_rx)
                .await;
        });
        *running = Some(Running {
            stop: stop_tx,
            heartbeat,
            source,
        });

        info!(
            target: "relay.monitor",
            device_id = %self.inner.identity.device_id(),
            address = %self.inner.identity.address(),
            port = self.inner.identity.port(),
            "monitor_started"
        );
        Ok(())
    }

    /// 停止心跳与上游会话，之后不再发出任何事件。可重复调用。
    pub fn stop(&self) {
        let closed = self
            .inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            let _ = running.stop.send(true);
            drop(running.heartbeat);
            drop(running.source);
        }
        self.inner.set_state(MonitorState::Stopped);
        if closed.is_some() {
            info!(target: "relay.monitor", device_id = %self.inner.identity.device_id(), "monitor_stopped");
        }
    }
}

async fn run_heartbeat(inner: Arc<MonitorInner>, mut stop: watch::Receiver<bool>) {
    let period = inner.heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => inner.update_status(StatusTrigger::Heartbeat),
        }
    }
}

impl MonitorInner {
    fn is_open(&self) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn set_state(&self, state: MonitorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn emit(&self, event: DomainEvent) -> bool {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        match events.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    fn emit_topology(&self, definitions: Vec<TopologyDefinition>) {
        if definitions.is_empty() {
            return;
        }
        if self.emit(DomainEvent::TopologyBatch {
            device_id: self.identity.device_id().to_string(),
            definitions,
        }) {
            self.metrics.record_topology_batch();
        }
    }

    /// 去抖状态更新。
    ///
    /// 与上次发出的 `(connected, available)` 相同则不发；心跳与初始状态总是发出。
    /// 发送在持锁期间完成，保证状态事件顺序与更新顺序一致。
    fn update_status(&self, trigger: StatusTrigger) {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        match trigger {
            StatusTrigger::Initial => {
                status.connected = false;
                status.available = false;
            }
            StatusTrigger::Heartbeat => {}
            StatusTrigger::Connected => status.connected = true,
            // 保留上次的可用性，重连后直接恢复；断开期间由输出对屏蔽
            StatusTrigger::ConnectionLost => status.connected = false,
            StatusTrigger::Availability(available) => status.available = available,
        }

        let pair = (status.connected, status.connected && status.available);
        let forced = matches!(trigger, StatusTrigger::Initial | StatusTrigger::Heartbeat);
        if !forced && status.last_emitted == Some(pair) {
            return;
        }

        let event = StatusEvent::new(self.identity.device_id(), now_epoch_ms(), pair.0, pair.1);
        if self.emit(DomainEvent::StatusChanged(event)) {
            status.last_emitted = Some(pair);
            self.metrics.record_status_event();
            info!(
                target: "relay.monitor",
                device_id = %self.identity.device_id(),
                connected = pair.0,
                available = pair.1,
                "status_updated"
            );
        }
    }

    fn data_item_definition(
        &self,
        agent_instance_id: u64,
        parent_id: &str,
        model: &DataItemModel,
    ) -> TopologyDefinition {
        TopologyDefinition::DataItem(DataItemDefinition {
            device_id: self.identity.device_id().to_string(),
            agent_instance_id,
            parent_id: parent_id.to_string(),
            id: model.id.clone(),
            name: model.name.clone(),
            category: model.category.clone(),
            data_item_type: model.data_item_type.clone(),
            sub_type: model.sub_type.clone(),
            statistic: model.statistic.clone(),
            units: model.units.clone(),
            native_units: model.native_units.clone(),
            native_scale: model.native_scale,
            coordinate_system: model.coordinate_system.clone(),
            sample_rate: model.sample_rate,
            representation: model.representation.clone(),
            significant_digits: model.significant_digits,
        })
    }

    /// 深度优先展开组件树，`parent_id` 逐层传递。
    fn collect_components(
        &self,
        agent_instance_id: u64,
        parent_id: &str,
        components: &[ComponentModel],
        component_defs: &mut Vec<TopologyDefinition>,
        data_item_defs: &mut Vec<TopologyDefinition>,
    ) {
        for component in components {
            component_defs.push(TopologyDefinition::Component(ComponentDefinition {
                device_id: self.identity.device_id().to_string(),
                agent_instance_id,
                parent_id: parent_id.to_string(),
                id: component.id.clone(),
                uuid: component.uuid.clone(),
                component_type: component.component_type.clone(),
                name: component.name.clone(),
                native_name: component.native_name.clone(),
                sample_interval: component.sample_interval,
                sample_rate: component.sample_rate,
            }));
            for item in &component.data_items {
                data_item_defs.push(self.data_item_definition(agent_instance_id, &component.id, item));
            }
            self.collect_components(
                agent_instance_id,
                &component.id,
                &component.components,
                component_defs,
                data_item_defs,
            );
        }
    }
}

fn find_availability(data_items: &[DataItemModel], components: &[ComponentModel]) -> Option<String> {
    if let Some(item) = data_items
        .iter()
        .find(|item| item.data_item_type == AVAILABILITY_TYPE)
    {
        return Some(item.id.clone());
    }
    components
        .iter()
        .find_map(|component| find_availability(&component.data_items, &component.components))
}

impl AgentDocumentHandler for MonitorInner {
    fn on_devices(&self, document: DevicesDocument) {
        trace!(target: "relay.monitor", device_id = %self.identity.device_id(), "devices_document_received");
        if !self.is_open() {
            return;
        }
        self.set_state(MonitorState::Connected);
        self.update_status(StatusTrigger::Connected);

        let Some(header) = document.header.as_ref() else {
            debug!(target: "relay.monitor", device_id = %self.identity.device_id(), "devices_document_without_header");
            return;
        };
        let [device] = document.devices.as_slice() else {
            debug!(
                target: "relay.monitor",
                device_id = %self.identity.device_id(),
                devices = document.devices.len(),
                "devices_document_skipped"
            );
            return;
        };
        let instance_id = header.instance_id;
        let device_id = self.identity.device_id().to_string();

        self.emit_topology(vec![TopologyDefinition::Connection(
            self.identity.connection_definition(),
        )]);
        self.emit_topology(vec![TopologyDefinition::Agent(AgentDefinition {
            device_id: device_id.clone(),
            instance_id,
            sender: header.sender.clone(),
            version: header.version.clone(),
            buffer_size: header.buffer_size,
            test_indicator: header.test_indicator,
            ts_ms: header.creation_time_ms,
        })]);

        let description = device.description.clone().unwrap_or_default();
        self.emit_topology(vec![TopologyDefinition::Device(DeviceDefinition {
            device_id,
            agent_instance_id: instance_id,
            id: device.id.clone(),
            uuid: device.uuid.clone(),
            name: device.name.clone(),
            native_name: device.native_name.clone(),
            sample_interval: device.sample_interval,
            sample_rate: device.sample_rate,
            iso841_class: device.iso841_class.clone(),
            manufacturer: description.manufacturer,
            model: description.model,
            serial_number: description.serial_number,
            station: description.station,
            description: description.text,
        })]);

        let mut data_item_defs: Vec<TopologyDefinition> = device
            .data_items
            .iter()
            .map(|item| self.data_item_definition(instance_id, &device.id, item))
            .collect();
        let mut component_defs = Vec::new();
        self.collect_components(
            instance_id,
            &device.id,
            &device.components,
            &mut component_defs,
            &mut data_item_defs,
        );

        if let Some(availability_id) = find_availability(&device.data_items, &device.components) {
            *self
                .availability_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(availability_id);
        }

        self.emit_topology(component_defs);
        self.emit_topology(data_item_defs);
    }

    fn on_streams(&self, document: StreamsDocument) {
        trace!(target: "relay.monitor", device_id = %self.identity.device_id(), "streams_document_received");
        if !self.is_open() {
            return;
        }
        self.set_state(MonitorState::Connected);
        self.update_status(StatusTrigger::Connected);

        let Some(header) = document.header.as_ref() else {
            return;
        };
        let Some(stream) = document.device_streams.first() else {
            return;
        };

        let samples: Vec<Sample> = stream
            .observations
            .iter()
            .map(|observation| Sample {
                device_id: self.identity.device_id().to_string(),
                data_item_id: observation.data_item_id.clone(),
                agent_instance_id: header.instance_id,
                sequence: observation.sequence,
                ts_ms: observation.ts_ms,
                value: observation.value.clone(),
                condition: if observation.category == CONDITION_CATEGORY {
                    observation.condition.clone()
                } else {
                    None
                },
            })
            .collect();

        let availability_id = self
            .availability_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(availability_id) = availability_id
            && let Some(observation) = stream
                .observations
                .iter()
                .find(|observation| observation.data_item_id == availability_id)
        {
            self.update_status(StatusTrigger::Availability(
                observation.value == AVAILABLE_VALUE,
            ));
        }

        if !samples.is_empty() {
            for sample in &samples {
                trace!(
                    target: "relay.monitor",
                    device_id = %sample.device_id,
                    data_item_id = %sample.data_item_id,
                    value = %sample.value,
                    "sample_read"
                );
            }
            if self.emit(DomainEvent::SampleBatch {
                device_id: self.identity.device_id().to_string(),
                samples,
            }) {
                self.metrics.record_sample_batch();
            }
        }
    }

    fn on_connection_error(&self, error: &MonitorError) {
        info!(
            target: "relay.monitor",
            device_id = %self.identity.device_id(),
            address = %self.identity.address(),
            error = %error,
            "agent_connection_error"
        );
        if !self.is_open() {
            return;
        }
        self.set_state(MonitorState::Disconnected);
        self.update_status(StatusTrigger::ConnectionLost);
    }

    fn on_started(&self) {
        info!(target: "relay.monitor", device_id = %self.identity.device_id(), "agent_session_started");
    }

    fn on_stopped(&self) {
        info!(target: "relay.monitor", device_id = %self.identity.device_id(), "agent_session_stopped");
    }
}
