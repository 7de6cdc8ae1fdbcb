//! 上游 agent 文档模型
//!
//! 由上游解析器产出，字段缺省即为 `None` / 空集合。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    pub instance_id: u64,
    #[serde(default)]
    pub creation_time_ms: i64,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub buffer_size: u64,
    #[serde(default)]
    pub test_indicator: bool,
}

/// 设备结构文档（probe 响应）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesDocument {
    #[serde(default)]
    pub header: Option<DocumentHeader>,
    #[serde(default)]
    pub devices: Vec<DeviceModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub station: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub id: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default)]
    pub sample_interval: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub iso841_class: Option<String>,
    #[serde(default)]
    pub description: Option<DeviceDescription>,
    #[serde(default)]
    pub data_items: Vec<DataItemModel>,
    #[serde(default)]
    pub components: Vec<ComponentModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub native_name: Option<String>,
    #[serde(default)]
    pub sample_interval: Option<f64>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub data_items: Vec<DataItemModel>,
    #[serde(default)]
    pub components: Vec<ComponentModel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataItemModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    #[serde(rename = "type")]
    pub data_item_type: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub statistic: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub native_units: Option<String>,
    #[serde(default)]
    pub native_scale: Option<f64>,
    #[serde(default)]
    pub coordinate_system: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub representation: Option<String>,
    #[serde(default)]
    pub significant_digits: Option<u32>,
}

/// 实时数据文档（current / sample 响应）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamsDocument {
    #[serde(default)]
    pub header: Option<DocumentHeader>,
    #[serde(default)]
    pub device_streams: Vec<DeviceStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStream {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub data_item_id: String,
    pub category: String,
    #[serde(default)]
    pub sequence: u64,
    pub ts_ms: i64,
    #[serde(default)]
    pub value: String,
    /// CONDITION 类观测的等级（NORMAL / WARNING / FAULT）。
    #[serde(default)]
    pub condition: Option<String>,
}

/// 单行 JSON 承载的上游文档。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "document", rename_all = "snake_case")]
pub enum AgentDocument {
    Devices(DevicesDocument),
    Streams(StreamsDocument),
}
