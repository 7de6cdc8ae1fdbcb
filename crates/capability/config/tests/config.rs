use relay_capture::{CaptureError, CaptureMode, FilterField};
use relay_config::{AppConfig, ConfigError, RelaySettings};
use std::io::Write;

const SETTINGS: &str = r#"{
    "devices": [
        { "device_id": "vmc-1", "address": "10.0.0.5", "port": 5000, "device_name": "VMC-3Axis" }
    ],
    "destinations": [
        {
            "name": "cloud",
            "hostname": "relay.example.com",
            "api_key": "key-1",
            "buffer": { "path": "/var/lib/relay" },
            "data_groups": [
                {
                    "name": "all",
                    "capture_mode": "ARCHIVE",
                    "filters": [{ "field": "CATEGORY", "values": ["SAMPLE", "CONDITION"] }],
                    "include": ["availability"]
                },
                {
                    "name": "availability",
                    "capture_mode": "CURRENT",
                    "filters": [{ "field": "DATA_ITEM_TYPE", "values": ["AVAILABILITY"] }]
                }
            ]
        },
        { "hostname": "10.0.0.9" }
    ]
}"#;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("RELAY_CONFIG_PATH", "/etc/relay/relay.json");
        std::env::set_var("RELAY_AGENT_RECONNECT_MS", "2500");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.config_path, "/etc/relay/relay.json");
    assert_eq!(config.agent_reconnect_ms, 2500);
    assert_eq!(config.buffer_dir, "buffer");
}

#[test]
fn settings_apply_defaults() {
    let settings = RelaySettings::from_json(SETTINGS).expect("settings");
    settings.validate().expect("valid");

    let device = &settings.devices[0];
    assert_eq!(device.interval_ms, 100);
    assert_eq!(device.physical_address, None);

    let cloud = &settings.destinations[0];
    assert_eq!(cloud.label(), "cloud");
    assert_eq!(cloud.port, 8472);
    assert_eq!(cloud.send_interval_ms, 500);
    assert!(!cloud.use_tls);
    assert!(cloud.buffer_enabled());
    assert_eq!(cloud.data_groups[0].mode, CaptureMode::Archive);
    assert_eq!(cloud.data_groups[0].filters[0].field, FilterField::Category);
    assert_eq!(cloud.data_groups[0].include, vec!["availability".to_string()]);

    let bare = &settings.destinations[1];
    assert_eq!(bare.label(), "10.0.0.9");
    assert!(!bare.buffer_enabled());
    assert!(bare.data_groups.is_empty());
}

#[test]
fn settings_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(SETTINGS.as_bytes()).expect("write");

    let settings = RelaySettings::from_file(file.path()).expect("settings");
    assert_eq!(settings.devices.len(), 1);
    assert_eq!(settings.destinations.len(), 2);

    let missing = RelaySettings::from_file("/nonexistent/relay.json");
    assert!(matches!(missing, Err(ConfigError::Io(_, _))));
}

#[test]
fn validation_rejects_bad_values() {
    let negative_interval = RelaySettings::from_json(
        r#"{ "devices": [{ "device_id": "d", "address": "a", "interval_ms": -5 }] }"#,
    )
    .expect("parse");
    assert!(matches!(
        negative_interval.validate(),
        Err(ConfigError::Invalid(key, _)) if key.ends_with("interval_ms")
    ));

    let negative_send = RelaySettings::from_json(
        r#"{ "destinations": [{ "hostname": "h", "send_interval_ms": -1 }] }"#,
    )
    .expect("parse");
    assert!(negative_send.validate().is_err());

    let zero_port =
        RelaySettings::from_json(r#"{ "destinations": [{ "hostname": "h", "port": 0 }] }"#)
            .expect("parse");
    assert!(zero_port.validate().is_err());

    let out_of_range =
        RelaySettings::from_json(r#"{ "destinations": [{ "hostname": "h", "port": 70000 }] }"#);
    assert!(matches!(out_of_range, Err(ConfigError::Parse(_))));

    let unknown_include = RelaySettings::from_json(
        r#"{ "destinations": [{ "hostname": "h", "data_groups": [
            { "name": "g1", "capture_mode": "ARCHIVE", "include": ["missing"] }
        ] }] }"#,
    )
    .expect("parse");
    assert!(matches!(
        unknown_include.validate(),
        Err(ConfigError::Capture(CaptureError::UnknownInclude { .. }))
    ));

    let duplicate_group = RelaySettings::from_json(
        r#"{ "destinations": [{ "hostname": "h", "data_groups": [
            { "name": "g1", "capture_mode": "ARCHIVE" },
            { "name": "g1", "capture_mode": "CURRENT" }
        ] }] }"#,
    )
    .expect("parse");
    assert!(matches!(
        duplicate_group.validate(),
        Err(ConfigError::Capture(CaptureError::DuplicateGroup(_)))
    ));
}
