// tests/transport_memory.rs

use bytes::Bytes;
use tokio::time::{timeout, Duration};

use amqp_conductor::{
    // ---
    dial,
    ConductorError,
    ConsumeOptions,
    MemoryHub,
    Publishing,
    QueueOptions,
    JSON_CONTENT_TYPE,
};

#[tokio::test]
async fn memory_consume_then_publish_delivers() {
    // ---
    // Arrange
    // ---
    let hub = MemoryHub::new();
    let connection = dial("memory://", Some(hub.clone()))
        .await
        .expect("failed to dial memory hub");

    let channel = connection.open_channel().await.expect("open channel failed");
    channel
        .declare_queue("test.queue", QueueOptions::durable())
        .await
        .expect("declare failed");

    let mut deliveries = channel
        .consume("test.queue", ConsumeOptions::auto_ack())
        .await
        .expect("consume failed");

    let payload = Bytes::from_static(br#"{"ID":"x"}"#);

    // ---
    // Act
    // ---
    channel
        .publish("test.queue", Publishing::json(payload.clone()))
        .await
        .expect("publish failed");

    // ---
    // Assert
    // ---
    let received = timeout(Duration::from_millis(100), deliveries.inbox.recv())
        .await
        .expect("timed out waiting for message")
        .expect("consumer channel closed unexpectedly");

    assert_eq!(received.body, payload);
    assert_eq!(received.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
}

#[tokio::test]
async fn memory_connections_share_a_hub() {
    // ---
    let hub = MemoryHub::new();
    let producer = dial("memory://", Some(hub.clone())).await.unwrap();
    let consumer = dial("memory://", Some(hub.clone())).await.unwrap();

    let out = producer.open_channel().await.unwrap();
    out.declare_queue("shared", QueueOptions::durable()).await.unwrap();
    out.publish("shared", Publishing::json("early")).await.unwrap();
    assert_eq!(hub.backlog_len("shared"), 1);

    let inc = consumer.open_channel().await.unwrap();
    let mut deliveries = inc.consume("shared", ConsumeOptions::auto_ack()).await.unwrap();
    let received = timeout(Duration::from_millis(100), deliveries.inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&received.body[..], b"early");
}

#[tokio::test]
async fn memory_closed_connection_rejects_work() {
    // ---
    let hub = MemoryHub::new();
    let connection = dial("memory://", Some(hub.clone())).await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    channel.declare_queue("q", QueueOptions::durable()).await.unwrap();
    let mut deliveries = channel.consume("q", ConsumeOptions::auto_ack()).await.unwrap();

    connection.close().await.unwrap();

    assert!(deliveries.inbox.recv().await.is_none());
    assert!(matches!(
        channel.publish("q", Publishing::json("late")).await,
        Err(ConductorError::Broker(_))
    ));
    assert!(connection.open_channel().await.is_err());
}

#[tokio::test]
async fn memory_publish_faults_are_injected() {
    // ---
    let hub = MemoryHub::new();
    let channel = hub.connect().unwrap().open_channel().await.unwrap();
    channel.declare_queue("q", QueueOptions::durable()).await.unwrap();

    hub.fail_next_publishes(1);
    assert!(channel.publish("q", Publishing::json("a")).await.is_err());
    assert!(channel.publish("q", Publishing::json("b")).await.is_ok());
    assert_eq!(hub.backlog_len("q"), 1);
}
