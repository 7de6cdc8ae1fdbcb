//! 拓扑定义（agent / device / component / data item）。
//!
//! 每份 devices 文档整体重建一次；`parent_id` 串起以设备为根的树。

use serde::{Deserialize, Serialize};

/// 上游 agent 的连接信息。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub device_id: String,
    pub address: String,
    pub physical_address: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub device_id: String,
    pub instance_id: u64,
    pub sender: Option<String>,
    pub version: Option<String>,
    pub buffer_size: u64,
    pub test_indicator: bool,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub device_id: String,
    pub agent_instance_id: u64,
    pub id: String,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub native_name: Option<String>,
    pub sample_interval: Option<f64>,
    pub sample_rate: Option<f64>,
    pub iso841_class: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub station: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub device_id: String,
    pub agent_instance_id: u64,
    pub parent_id: String,
    pub id: String,
    pub uuid: Option<String>,
    pub component_type: String,
    pub name: Option<String>,
    pub native_name: Option<String>,
    pub sample_interval: Option<f64>,
    pub sample_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItemDefinition {
    pub device_id: String,
    pub agent_instance_id: u64,
    pub parent_id: String,
    pub id: String,
    pub name: Option<String>,
    pub category: String,
    pub data_item_type: String,
    pub sub_type: Option<String>,
    pub statistic: Option<String>,
    pub units: Option<String>,
    pub native_units: Option<String>,
    pub native_scale: Option<f64>,
    pub coordinate_system: Option<String>,
    pub sample_rate: Option<f64>,
    pub representation: Option<String>,
    pub significant_digits: Option<u32>,
}

/// 拓扑定义的联合类型。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "definition", rename_all = "snake_case")]
pub enum TopologyDefinition {
    Connection(ConnectionDefinition),
    Agent(AgentDefinition),
    Device(DeviceDefinition),
    Component(ComponentDefinition),
    DataItem(DataItemDefinition),
}

impl TopologyDefinition {
    pub fn device_id(&self) -> &str {
        match self {
            Self::Connection(def) => &def.device_id,
            Self::Agent(def) => &def.device_id,
            Self::Device(def) => &def.device_id,
            Self::Component(def) => &def.device_id,
            Self::DataItem(def) => &def.device_id,
        }
    }
}
