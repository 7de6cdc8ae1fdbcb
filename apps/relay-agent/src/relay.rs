//! 转发链路装配模块
//!
//! 每个下游目的地一条 [`RelayPipeline`]（TCP 传输 + 可选 SQLite 缓冲），
//! 每台设备一个 [`DeviceMonitor`]。设备事件经各自的通道由转发任务分发给全部流水线。
//!
//! ```text
//! DeviceMonitor(vmc-1) ─► mpsc ─► forwarder ─┬─► RelayPipeline(cloud)
//! DeviceMonitor(vmc-2) ─► mpsc ─► forwarder ─┴─► RelayPipeline(10.0.0.9)
//! ```

use domain::DomainEvent;
use relay_buffer::{DurableBuffer, SqliteBuffer};
use relay_config::{AppConfig, DestinationSettings, DeviceSettings, RelaySettings};
use relay_monitor::{
    DeviceIdentity, DeviceMonitor, MonitorError, MonitorOptions, TcpAgentSource,
    TcpAgentSourceConfig,
};
use relay_pipeline::{PipelineConfig, PipelineError, RelayPipeline};
use relay_telemetry::metrics;
use relay_transport::{TcpStreamConfig, TcpStreamTransport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("pipeline {label}: {source}")]
    Pipeline {
        label: String,
        #[source]
        source: PipelineError,
    },
    #[error("device {device_id}: {source}")]
    Monitor {
        device_id: String,
        #[source]
        source: MonitorError,
    },
}

/// 运行中的转发链路。
pub struct Relay {
    pipelines: Vec<RelayPipeline>,
    monitors: Vec<DeviceMonitor>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Relay {
    /// 先停设备监控（关闭事件通道），再停流水线。
    pub async fn stop(self) {
        for monitor in &self.monitors {
            monitor.stop();
        }
        for forwarder in self.forwarders {
            if let Err(err) = forwarder.await {
                warn!(target: "relay.agent", error = %err, "forwarder_join_failed");
            }
        }
        for pipeline in &self.pipelines {
            pipeline.stop().await;
        }
    }
}

/// 启动全部目的地与设备。
pub async fn start(config: &AppConfig, settings: &RelaySettings) -> Result<Relay, RelayError> {
    let mut pipelines = Vec::with_capacity(settings.destinations.len());
    for destination in &settings.destinations {
        let pipeline = build_pipeline(config, destination);
        pipeline
            .start()
            .await
            .map_err(|source| RelayError::Pipeline {
                label: destination.label().to_string(),
                source,
            })?;
        pipelines.push(pipeline);
    }

    let agent_source = Arc::new(TcpAgentSource::new(TcpAgentSourceConfig {
        request_timeout_ms: config.agent_request_timeout_ms,
        reconnect_interval_ms: config.agent_reconnect_ms,
    }));
    let mut monitors = Vec::with_capacity(settings.devices.len());
    let mut forwarders = Vec::with_capacity(settings.devices.len());
    for device in &settings.devices {
        let identity = device_identity(device).map_err(|source| RelayError::Monitor {
            device_id: device.device_id.clone(),
            source,
        })?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let monitor = DeviceMonitor::with_options(
            identity,
            agent_source.clone(),
            events_tx,
            MonitorOptions {
                metrics: metrics(),
                ..MonitorOptions::default()
            },
        );
        forwarders.push(spawn_forwarder(events_rx, pipelines.clone()));
        monitor.start().map_err(|source| RelayError::Monitor {
            device_id: device.device_id.clone(),
            source,
        })?;
        monitors.push(monitor);
    }

    info!(
        target: "relay.agent",
        destinations = pipelines.len(),
        devices = monitors.len(),
        "relay_started"
    );
    Ok(Relay {
        pipelines,
        monitors,
        forwarders,
    })
}

fn build_pipeline(config: &AppConfig, destination: &DestinationSettings) -> RelayPipeline {
    let transport = Arc::new(TcpStreamTransport::new(transport_config(config, destination)));
    let buffer: Option<Arc<dyn DurableBuffer>> = destination.buffer_enabled().then(|| {
        let directory = destination
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.path.clone())
            .unwrap_or_else(|| config.buffer_dir.clone());
        Arc::new(SqliteBuffer::new(directory)) as Arc<dyn DurableBuffer>
    });
    RelayPipeline::with_metrics(pipeline_config(destination), transport, buffer, metrics())
}

fn pipeline_config(destination: &DestinationSettings) -> PipelineConfig {
    PipelineConfig {
        label: destination.label().to_string(),
        api_key: destination.api_key.clone(),
        capture_groups: destination.data_groups.clone(),
        ..PipelineConfig::default()
    }
}

fn transport_config(config: &AppConfig, destination: &DestinationSettings) -> TcpStreamConfig {
    TcpStreamConfig {
        hostname: destination.hostname.clone(),
        port: destination.port,
        use_tls: destination.use_tls,
        send_interval_ms: u64::try_from(destination.send_interval_ms).unwrap_or_default(),
        reconnect_interval_ms: config.transport_reconnect_ms,
        ..TcpStreamConfig::default()
    }
}

fn device_identity(device: &DeviceSettings) -> Result<DeviceIdentity, MonitorError> {
    let mut builder = DeviceIdentity::builder(device.device_id.clone())
        .address(device.address.clone())
        .port(device.port)
        .interval_ms(device.interval_ms);
    if let Some(physical_address) = &device.physical_address {
        builder = builder.physical_address(physical_address.clone());
    }
    if let Some(device_name) = &device.device_name {
        builder = builder.device_name(device_name.clone());
    }
    builder.build()
}

/// 设备通道关闭（监控停止）后退出。
fn spawn_forwarder(
    mut events: mpsc::UnboundedReceiver<DomainEvent>,
    pipelines: Vec<RelayPipeline>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            for pipeline in &pipelines {
                pipeline.handle_event(event.clone()).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_config() -> AppConfig {
        AppConfig {
            config_path: "relay.json".to_string(),
            buffer_dir: "buffer".to_string(),
            agent_reconnect_ms: 5000,
            agent_request_timeout_ms: 5000,
            transport_reconnect_ms: 1000,
        }
    }

    fn settings() -> RelaySettings {
        RelaySettings::from_json(
            r#"{
                "devices": [{ "device_id": "vmc-1", "address": "10.0.0.5", "interval_ms": 250 }],
                "destinations": [{ "name": "cloud", "hostname": "relay.example.com", "api_key": "k" }]
            }"#,
        )
        .expect("settings")
    }

    #[test]
    fn destination_maps_to_pipeline_and_transport() {
        let settings = settings();
        let destination = &settings.destinations[0];

        let pipeline = pipeline_config(destination);
        assert_eq!(pipeline.label, "cloud");
        assert_eq!(pipeline.api_key.as_deref(), Some("k"));
        assert_eq!(pipeline.max_send_count, relay_pipeline::MAX_SEND_COUNT);

        let transport = transport_config(&app_config(), destination);
        assert_eq!(transport.address(), "relay.example.com:8472");
        assert_eq!(transport.send_interval_ms, 500);
        assert_eq!(transport.reconnect_interval_ms, 1000);
    }

    #[test]
    fn device_maps_to_identity() {
        let identity = device_identity(&settings().devices[0]).expect("identity");
        assert_eq!(identity.device_id(), "vmc-1");
        assert_eq!(identity.port(), 5000);
        assert_eq!(identity.interval_ms(), 250);
    }

    #[tokio::test]
    async fn forwarder_exits_when_device_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = spawn_forwarder(rx, Vec::new());
        tx.send(DomainEvent::StatusChanged(domain::StatusEvent::new(
            "vmc-1", 1, false, false,
        )))
        .expect("send");
        drop(tx);
        forwarder.await.expect("forwarder");
    }
}
