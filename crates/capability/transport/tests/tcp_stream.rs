use domain::{Sample, StreamItem};
use relay_transport::{
    OutboundTransport, TcpStreamConfig, TcpStreamTransport, TransportError, TransportEvent,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn sample_item(data_item_id: &str) -> StreamItem {
    StreamItem::sample(Sample {
        device_id: "device-1".to_string(),
        data_item_id: data_item_id.to_string(),
        agent_instance_id: 1,
        sequence: 1,
        ts_ms: 1,
        value: "42".to_string(),
        condition: None,
    })
}

fn config_for(port: u16) -> TcpStreamConfig {
    TcpStreamConfig {
        hostname: "127.0.0.1".to_string(),
        port,
        send_interval_ms: 20,
        connect_timeout_ms: 500,
        reconnect_interval_ms: 50,
        ..TcpStreamConfig::default()
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event timeout")
        .expect("event channel open")
}

#[tokio::test]
async fn delivers_batch_as_json_line() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let transport = TcpStreamTransport::new(config_for(port));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.start(tx).await.expect("start");

    let (socket, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("accept timeout")
        .expect("accept");
    assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

    transport
        .write(vec![sample_item("D1"), sample_item("D2")])
        .await
        .expect("write");
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::SendSucceeded { count: 2 }
    );

    let mut lines = BufReader::new(socket).lines();
    let line = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("read timeout")
        .expect("read")
        .expect("line");
    let frame: serde_json::Value = serde_json::from_str(&line).expect("json");
    assert!(frame["batch_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(frame["items"].as_array().map(Vec::len), Some(2));

    transport.close().await;
}

#[tokio::test]
async fn reports_failure_while_disconnected() {
    // 先占用再释放端口，确保无人监听
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let transport = TcpStreamTransport::new(config_for(port));
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.start(tx).await.expect("start");
    transport
        .write(vec![sample_item("D1")])
        .await
        .expect("write");

    match next_event(&mut rx).await {
        TransportEvent::SendFailed { items } => assert_eq!(items.len(), 1),
        other => panic!("unexpected event: {other:?}"),
    }
    transport.close().await;
}

#[tokio::test]
async fn write_before_start_is_rejected() {
    let transport = TcpStreamTransport::new(config_for(1));
    let err = transport
        .write(vec![sample_item("D1")])
        .await
        .expect_err("not started");
    assert!(matches!(err, TransportError::NotStarted));
}

#[tokio::test]
async fn tls_is_not_supported() {
    let transport = TcpStreamTransport::new(TcpStreamConfig {
        use_tls: true,
        ..config_for(1)
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = transport.start(tx).await.expect_err("tls");
    assert!(matches!(err, TransportError::Unsupported(_)));
}

#[tokio::test]
async fn close_reports_queued_batches_as_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    // 首个节拍立即连接，下一个节拍远在关闭之后
    let transport = TcpStreamTransport::new(TcpStreamConfig {
        send_interval_ms: 60_000,
        ..config_for(port)
    });
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.start(tx).await.expect("start");
    let (_socket, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("accept timeout")
        .expect("accept");
    assert_eq!(next_event(&mut rx).await, TransportEvent::Connected);

    transport
        .write(vec![sample_item("D1"), sample_item("D2")])
        .await
        .expect("write");
    transport.close().await;

    // close 返回时工作任务已退出，事件全部在通道中
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TransportEvent::SendFailed {
                items: vec![sample_item("D1"), sample_item("D2")]
            },
            TransportEvent::Disconnected,
        ]
    );
    assert!(matches!(
        transport.write(vec![sample_item("D3")]).await,
        Err(TransportError::NotStarted)
    ));
}
