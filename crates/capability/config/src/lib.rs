//! 应用运行配置加载。
//!
//! - [`AppConfig`]：进程级环境变量（配置文件路径、缓冲目录等）
//! - [`RelaySettings`]：设备与下游目的地的 JSON 配置

mod settings;

pub use settings::{BufferSettings, DestinationSettings, DeviceSettings, RelaySettings};

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("failed to read {0}: {1}")]
    Io(String, String),
    #[error("failed to parse settings: {0}")]
    Parse(String),
    #[error(transparent)]
    Capture(#[from] relay_capture::CaptureError),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_path: String,
    pub buffer_dir: String,
    pub agent_reconnect_ms: u64,
    pub agent_request_timeout_ms: u64,
    pub transport_reconnect_ms: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let config_path =
            env::var("RELAY_CONFIG_PATH").unwrap_or_else(|_| "relay.json".to_string());
        let buffer_dir = env::var("RELAY_BUFFER_DIR").unwrap_or_else(|_| "buffer".to_string());
        let agent_reconnect_ms = read_u64_with_default("RELAY_AGENT_RECONNECT_MS", 5000)?;
        let agent_request_timeout_ms =
            read_u64_with_default("RELAY_AGENT_REQUEST_TIMEOUT_MS", 5000)?;
        let transport_reconnect_ms = read_u64_with_default("RELAY_TRANSPORT_RECONNECT_MS", 5000)?;

        Ok(Self {
            config_path,
            buffer_dir,
            agent_reconnect_ms,
            agent_request_timeout_ms,
            transport_reconnect_ms,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}
