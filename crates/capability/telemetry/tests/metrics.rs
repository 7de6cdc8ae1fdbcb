use relay_telemetry::{RelayMetrics, metrics, new_batch_id};

#[test]
fn batch_ids_are_unique() {
    let first = new_batch_id();
    let second = new_batch_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn metrics_instances_are_independent() {
    let a = RelayMetrics::shared();
    let b = RelayMetrics::shared();
    a.record_items_dropped(500);
    a.record_send_failure();
    assert_eq!(a.snapshot().items_dropped, 500);
    assert_eq!(a.snapshot().send_failure, 1);
    assert_eq!(b.snapshot().items_dropped, 0);
}

#[test]
fn process_metrics_is_shared() {
    let first = metrics();
    let second = metrics();
    let before = second.snapshot().status_events;
    first.record_status_event();
    assert_eq!(second.snapshot().status_events, before + 1);
}
