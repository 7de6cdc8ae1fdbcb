use domain::{Sample, StatusEvent, StreamItem, StreamKind};
use relay_buffer::{BufferError, DurableBuffer, InMemoryBuffer, SqliteBuffer};

fn sample_item(data_item_id: &str, ts_ms: i64, kind: StreamKind) -> StreamItem {
    StreamItem::tagged_sample(
        Sample {
            device_id: "device-1".to_string(),
            data_item_id: data_item_id.to_string(),
            agent_instance_id: 1,
            sequence: ts_ms as u64,
            ts_ms,
            value: "1".to_string(),
            condition: None,
        },
        kind,
    )
}

async fn exercise_contract(buffer: &dyn DurableBuffer) {
    buffer.start("cloud-1").await.expect("start");

    let mut with_key = sample_item("D1", 1, StreamKind::ArchivedSample);
    with_key.api_key = Some("secret".to_string());
    let items = vec![
        with_key,
        sample_item("D2", 2, StreamKind::CurrentSample),
        sample_item("D3", 3, StreamKind::ArchivedSample),
        StreamItem::status(StatusEvent::new("device-1", 4, true, true)),
    ];
    let added = buffer.add(&items).await.expect("add");
    assert_eq!(added, 3, "current samples never enter the buffer");

    let samples = buffer
        .read(StreamKind::ArchivedSample, 10)
        .await
        .expect("read");
    assert_eq!(samples.len(), 2);
    assert!(samples.iter().all(|item| item.entry_id.is_some()));
    assert_eq!(
        samples[0].as_sample().map(|s| s.data_item_id.as_str()),
        Some("D1")
    );

    let limited = buffer
        .read(StreamKind::ArchivedSample, 1)
        .await
        .expect("read");
    assert_eq!(limited.len(), 1);

    let current = buffer
        .read(StreamKind::CurrentSample, 10)
        .await
        .expect("read");
    assert!(current.is_empty());

    // 读取不删除
    let again = buffer
        .read(StreamKind::ArchivedSample, 10)
        .await
        .expect("read");
    assert_eq!(again.len(), 2);

    let ids: Vec<i64> = samples.iter().filter_map(|item| item.entry_id).collect();
    let removed = buffer.remove(&ids).await.expect("remove");
    assert_eq!(removed, 2);
    assert!(
        buffer
            .read(StreamKind::ArchivedSample, 10)
            .await
            .expect("read")
            .is_empty()
    );
    assert_eq!(
        buffer.read(StreamKind::Status, 10).await.expect("read").len(),
        1
    );
}

#[tokio::test]
async fn in_memory_buffer_honours_contract() {
    let buffer = InMemoryBuffer::new();
    exercise_contract(&buffer).await;
    assert_eq!(buffer.label().as_deref(), Some("cloud-1"));
}

#[tokio::test]
async fn sqlite_buffer_honours_contract() {
    let dir = tempfile::tempdir().expect("tempdir");
    let buffer = SqliteBuffer::new(dir.path());
    exercise_contract(&buffer).await;
    assert!(buffer.database_path("cloud-1").exists());
    buffer.stop().await.expect("stop");
}

#[tokio::test]
async fn sqlite_buffer_requires_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let buffer = SqliteBuffer::new(dir.path());
    let err = buffer
        .add(&[sample_item("D1", 1, StreamKind::ArchivedSample)])
        .await
        .expect_err("not started");
    assert!(matches!(err, BufferError::NotStarted));
}

#[tokio::test]
async fn sqlite_buffer_survives_restart_and_drops_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let buffer = SqliteBuffer::new(dir.path());
    buffer.start("cloud-1").await.expect("start");
    let mut item = sample_item("D1", 1, StreamKind::ArchivedSample);
    item.api_key = Some("secret".to_string());
    buffer.add(&[item]).await.expect("add");
    buffer.stop().await.expect("stop");

    let reopened = SqliteBuffer::new(dir.path());
    reopened.start("cloud-1").await.expect("start");
    let items = reopened
        .read(StreamKind::ArchivedSample, 10)
        .await
        .expect("read");
    assert_eq!(items.len(), 1);
    assert!(items[0].api_key.is_none());

    // 不同标签互不可见
    let other = SqliteBuffer::new(dir.path());
    other.start("cloud-2").await.expect("start");
    assert!(
        other
            .read(StreamKind::ArchivedSample, 10)
            .await
            .expect("read")
            .is_empty()
    );
    reopened.stop().await.expect("stop");
    other.stop().await.expect("stop");
}
