use domain::{
    ComponentDefinition, DomainEvent, Sample, StatusEvent, StreamItem, StreamKind, StreamPayload,
    TopologyDefinition,
};

fn sample(data_item_id: &str, ts_ms: i64) -> Sample {
    Sample {
        device_id: "device-1".to_string(),
        data_item_id: data_item_id.to_string(),
        agent_instance_id: 7,
        sequence: 1,
        ts_ms,
        value: "AVAILABLE".to_string(),
        condition: None,
    }
}

#[test]
fn status_event_never_available_when_disconnected() {
    let status = StatusEvent::new("device-1", 1000, false, true);
    assert!(!status.connected());
    assert!(!status.available());

    let status = StatusEvent::new("device-1", 1000, true, true);
    assert!(status.available());
}

#[test]
fn deserialized_status_never_available_while_disconnected() {
    let json = r#"{"device_id":"device-1","ts_ms":5,"connected":false,"available":true}"#;
    let status: StatusEvent = serde_json::from_str(json).expect("status");
    assert!(!status.available());
}

#[test]
fn domain_event_converts_to_stream_items() {
    let component = TopologyDefinition::Component(ComponentDefinition {
        device_id: "device-1".to_string(),
        agent_instance_id: 7,
        parent_id: "dev".to_string(),
        id: "C1".to_string(),
        uuid: None,
        component_type: "Controller".to_string(),
        name: Some("Controller".to_string()),
        native_name: None,
        sample_interval: None,
        sample_rate: None,
    });
    let items = DomainEvent::TopologyBatch {
        device_id: "device-1".to_string(),
        definitions: vec![component],
    }
    .into_stream_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, StreamKind::ComponentDefinition);

    let items = DomainEvent::SampleBatch {
        device_id: "device-1".to_string(),
        samples: vec![sample("D1", 10), sample("D2", 11)],
    }
    .into_stream_items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.kind == StreamKind::ArchivedSample));
}

#[test]
fn stream_item_json_keeps_kind_and_entry_id() {
    let mut item = StreamItem::tagged_sample(sample("D1", 10), StreamKind::CurrentSample);
    item.entry_id = Some(42);
    let json = serde_json::to_string(&item).expect("encode");
    let decoded: StreamItem = serde_json::from_str(&json).expect("decode");
    assert_eq!(decoded, item);
    assert!(decoded.is_current_sample());
    assert!(matches!(decoded.payload, StreamPayload::Sample(_)));
}
