use crate::MonitorError;
use domain::ConnectionDefinition;

/// 默认采样轮询间隔（毫秒）
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// 设备监控身份，构造后不可变。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    device_id: String,
    address: String,
    physical_address: Option<String>,
    port: u16,
    device_name: Option<String>,
    interval_ms: u64,
}

impl DeviceIdentity {
    pub fn builder(device_id: impl Into<String>) -> DeviceIdentityBuilder {
        DeviceIdentityBuilder {
            device_id: device_id.into(),
            address: None,
            physical_address: None,
            port: None,
            device_name: None,
            interval_ms: DEFAULT_INTERVAL_MS as i64,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn physical_address(&self) -> Option<&str> {
        self.physical_address.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 上游 agent 中的设备名，未配置时退回设备 ID。
    pub fn device_name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(&self.device_id)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn connection_definition(&self) -> ConnectionDefinition {
        ConnectionDefinition {
            device_id: self.device_id.clone(),
            address: self.address.clone(),
            physical_address: self.physical_address.clone(),
            port: self.port,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceIdentityBuilder {
    device_id: String,
    address: Option<String>,
    physical_address: Option<String>,
    port: Option<u16>,
    device_name: Option<String>,
    interval_ms: i64,
}

impl DeviceIdentityBuilder {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn physical_address(mut self, physical_address: impl Into<String>) -> Self {
        self.physical_address = Some(physical_address.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn device_name(mut self, device_name: impl Into<String>) -> Self {
        self.device_name = Some(device_name.into());
        self
    }

    /// 配置文件里的间隔可能为负，留到 `build` 时校验。
    pub fn interval_ms(mut self, interval_ms: i64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn build(self) -> Result<DeviceIdentity, MonitorError> {
        let device_id = self.device_id.trim().to_string();
        if device_id.is_empty() {
            return Err(MonitorError::InvalidArgument("device_id is empty".to_string()));
        }
        let address = self
            .address
            .map(|address| address.trim().to_string())
            .filter(|address| !address.is_empty())
            .ok_or_else(|| MonitorError::InvalidArgument("address is empty".to_string()))?;
        let interval_ms = u64::try_from(self.interval_ms).map_err(|_| {
            MonitorError::InvalidArgument(format!("interval must be >= 0, got {}", self.interval_ms))
        })?;
        Ok(DeviceIdentity {
            device_id,
            address,
            physical_address: self.physical_address,
            port: self.port.unwrap_or(5000),
            device_name: self.device_name.filter(|name| !name.is_empty()),
            interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let identity = DeviceIdentity::builder("device-1")
            .address("10.0.0.5")
            .build()
            .expect("identity");
        assert_eq!(identity.interval_ms(), DEFAULT_INTERVAL_MS);
        assert_eq!(identity.port(), 5000);
        assert_eq!(identity.device_name(), "device-1");
    }

    #[test]
    fn builder_rejects_invalid_fields() {
        let missing_address = DeviceIdentity::builder("device-1").build();
        assert!(matches!(missing_address, Err(MonitorError::InvalidArgument(_))));

        let empty_id = DeviceIdentity::builder(" ").address("10.0.0.5").build();
        assert!(matches!(empty_id, Err(MonitorError::InvalidArgument(_))));

        let negative = DeviceIdentity::builder("device-1")
            .address("10.0.0.5")
            .interval_ms(-1)
            .build();
        assert!(matches!(negative, Err(MonitorError::InvalidArgument(_))));
    }
}
