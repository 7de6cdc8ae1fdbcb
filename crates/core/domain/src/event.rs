use crate::data::{Sample, StatusEvent};
use crate::stream::StreamItem;
use crate::topology::TopologyDefinition;

/// 设备监控产生的领域事件，经每设备一个通道交给转发流水线。
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    TopologyBatch {
        device_id: String,
        definitions: Vec<TopologyDefinition>,
    },
    SampleBatch {
        device_id: String,
        samples: Vec<Sample>,
    },
    StatusChanged(StatusEvent),
}

impl DomainEvent {
    pub fn device_id(&self) -> &str {
        match self {
            Self::TopologyBatch { device_id, .. } => device_id,
            Self::SampleBatch { device_id, .. } => device_id,
            Self::StatusChanged(status) => status.device_id(),
        }
    }

    pub fn into_stream_items(self) -> Vec<StreamItem> {
        match self {
            Self::TopologyBatch { definitions, .. } => {
                definitions.into_iter().map(StreamItem::definition).collect()
            }
            Self::SampleBatch { samples, .. } => samples.into_iter().map(StreamItem::sample).collect(),
            Self::StatusChanged(status) => vec![StreamItem::status(status)],
        }
    }
}
