use crate::ConfigError;
use relay_capture::{CaptureGroup, validate_groups};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// 设备与目的地配置。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
    #[serde(default)]
    pub destinations: Vec<DestinationSettings>,
}

/// 上游 agent 中的一台设备。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub device_id: String,
    pub address: String,
    #[serde(default)]
    pub physical_address: Option<String>,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default = "default_interval")]
    pub interval_ms: i64,
}

/// 下游目的地。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default)]
    pub name: Option<String>,
    pub hostname: String,
    #[serde(default = "default_destination_port")]
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: i64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub buffer: Option<BufferSettings>,
    #[serde(default)]
    pub data_groups: Vec<CaptureGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 缺省时使用 `RELAY_BUFFER_DIR`。
    #[serde(default)]
    pub path: Option<String>,
}

fn default_agent_port() -> u16 {
    5000
}

fn default_interval() -> i64 {
    100
}

fn default_destination_port() -> u16 {
    8472
}

fn default_send_interval() -> i64 {
    500
}

fn default_enabled() -> bool {
    true
}

impl DestinationSettings {
    /// 日志与缓冲分区使用的标签。
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.hostname)
    }

    pub fn buffer_enabled(&self) -> bool {
        self.buffer.as_ref().is_some_and(|buffer| buffer.enabled)
    }
}

impl RelaySettings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut device_ids = HashSet::new();
        for device in &self.devices {
            if device.device_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "devices.device_id".to_string(),
                    "empty".to_string(),
                ));
            }
            if !device_ids.insert(device.device_id.as_str()) {
                return Err(ConfigError::Invalid(
                    "devices.device_id".to_string(),
                    format!("duplicate {}", device.device_id),
                ));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    format!("devices[{}].address", device.device_id),
                    "empty".to_string(),
                ));
            }
            if device.port == 0 {
                return Err(ConfigError::Invalid(
                    format!("devices[{}].port", device.device_id),
                    "0".to_string(),
                ));
            }
            if device.interval_ms < 0 {
                return Err(ConfigError::Invalid(
                    format!("devices[{}].interval_ms", device.device_id),
                    device.interval_ms.to_string(),
                ));
            }
        }

        for destination in &self.destinations {
            let label = destination.label();
            if destination.hostname.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    format!("destinations[{label}].hostname"),
                    "empty".to_string(),
                ));
            }
            if destination.port == 0 {
                return Err(ConfigError::Invalid(
                    format!("destinations[{label}].port"),
                    "0".to_string(),
                ));
            }
            if destination.send_interval_ms < 0 {
                return Err(ConfigError::Invalid(
                    format!("destinations[{label}].send_interval_ms"),
                    destination.send_interval_ms.to_string(),
                ));
            }
            validate_groups(&destination.data_groups)?;
        }
        Ok(())
    }
}
