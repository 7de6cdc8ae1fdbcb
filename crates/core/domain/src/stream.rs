//! 发往下游的流数据项。

use crate::data::{Sample, StatusEvent};
use crate::topology::TopologyDefinition;
use serde::{Deserialize, Serialize};

/// 缓冲区分配的条目标识。
pub type EntryId = i64;

/// 流数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamKind {
    ConnectionDefinition,
    AgentDefinition,
    DeviceDefinition,
    ComponentDefinition,
    DataItemDefinition,
    Status,
    ArchivedSample,
    CurrentSample,
}

impl StreamKind {
    /// 存储与日志使用的稳定名称。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionDefinition => "CONNECTION_DEFINITION",
            Self::AgentDefinition => "AGENT_DEFINITION",
            Self::DeviceDefinition => "DEVICE_DEFINITION",
            Self::ComponentDefinition => "COMPONENT_DEFINITION",
            Self::DataItemDefinition => "DATA_ITEM_DEFINITION",
            Self::Status => "STATUS",
            Self::ArchivedSample => "ARCHIVED_SAMPLE",
            Self::CurrentSample => "CURRENT_SAMPLE",
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", content = "data", rename_all = "snake_case")]
pub enum StreamPayload {
    Definition(TopologyDefinition),
    Sample(Sample),
    Status(StatusEvent),
}

/// 流数据项：载荷 + 类型 + 缓冲条目 ID + 发送凭据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamItem {
    pub payload: StreamPayload,
    pub kind: StreamKind,
    /// 仅从缓冲区读出的条目携带。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl StreamItem {
    pub fn definition(definition: TopologyDefinition) -> Self {
        let kind = match &definition {
            TopologyDefinition::Connection(_) => StreamKind::ConnectionDefinition,
            TopologyDefinition::Agent(_) => StreamKind::AgentDefinition,
            TopologyDefinition::Device(_) => StreamKind::DeviceDefinition,
            TopologyDefinition::Component(_) => StreamKind::ComponentDefinition,
            TopologyDefinition::DataItem(_) => StreamKind::DataItemDefinition,
        };
        Self::with_kind(StreamPayload::Definition(definition), kind)
    }

    /// 未经过采集组评估的样本默认按归档处理。
    pub fn sample(sample: Sample) -> Self {
        Self::with_kind(StreamPayload::Sample(sample), StreamKind::ArchivedSample)
    }

    pub fn tagged_sample(sample: Sample, kind: StreamKind) -> Self {
        Self::with_kind(StreamPayload::Sample(sample), kind)
    }

    pub fn status(status: StatusEvent) -> Self {
        Self::with_kind(StreamPayload::Status(status), StreamKind::Status)
    }

    fn with_kind(payload: StreamPayload, kind: StreamKind) -> Self {
        Self {
            payload,
            kind,
            entry_id: None,
            api_key: None,
        }
    }

    pub fn is_current_sample(&self) -> bool {
        self.kind == StreamKind::CurrentSample
    }

    pub fn as_sample(&self) -> Option<&Sample> {
        match &self.payload {
            StreamPayload::Sample(sample) => Some(sample),
            _ => None,
        }
    }

    pub fn device_id(&self) -> &str {
        match &self.payload {
            StreamPayload::Definition(definition) => definition.device_id(),
            StreamPayload::Sample(sample) => &sample.device_id,
            StreamPayload::Status(status) => status.device_id(),
        }
    }
}
