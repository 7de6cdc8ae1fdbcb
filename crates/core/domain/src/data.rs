use serde::{Deserialize, Serialize};

/// 单条实时采样值。
///
/// 去重标识为 `(device_id, data_item_id)`，同一批次内时间戳更新者优先。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub device_id: String,
    pub data_item_id: String,
    pub agent_instance_id: u64,
    pub sequence: u64,
    pub ts_ms: i64,
    pub value: String,
    /// 仅 CONDITION 类数据项携带（NORMAL / WARNING / FAULT 等）。
    pub condition: Option<String>,
}

impl Sample {
    /// 去重键。
    pub fn key(&self) -> SampleKey {
        SampleKey {
            device_id: self.device_id.clone(),
            data_item_id: self.data_item_id.clone(),
        }
    }
}

/// `(device_id, data_item_id)` 组合键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleKey {
    pub device_id: String,
    pub data_item_id: String,
}

/// 设备连接 / 可用状态。
///
/// 构造时强制 `available ⟹ connected`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StatusRecord")]
pub struct StatusEvent {
    device_id: String,
    ts_ms: i64,
    connected: bool,
    available: bool,
}

impl StatusEvent {
    pub fn new(device_id: impl Into<String>, ts_ms: i64, connected: bool, available: bool) -> Self {
        Self {
            device_id: device_id.into(),
            ts_ms,
            connected,
            available: connected && available,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn ts_ms(&self) -> i64 {
        self.ts_ms
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn available(&self) -> bool {
        self.available
    }
}

#[derive(Deserialize)]
struct StatusRecord {
    device_id: String,
    ts_ms: i64,
    connected: bool,
    available: bool,
}

impl From<StatusRecord> for StatusEvent {
    fn from(record: StatusRecord) -> Self {
        Self::new(record.device_id, record.ts_ms, record.connected, record.available)
    }
}

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
