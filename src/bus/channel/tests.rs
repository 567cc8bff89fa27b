use super::*;
use std::time::Duration;

async fn next_payload(binding: &mut Binding) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_millis(200), binding.deliveries.next())
        .await
        .ok()
        .flatten()
        .map(|r| r.unwrap())
}

#[tokio::test]
async fn test_channel_publish_no_queues() {
    let broker = ChannelBroker::default();

    // Should not error even with no receivers
    let result = broker.publish("channels.orders", b"x".to_vec()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_channel_bind_and_receive() {
    let broker = ChannelBroker::default();
    let mut binding = broker
        .bind("orders", BindingMode::Hierarchical)
        .await
        .unwrap();
    assert_eq!(binding.pattern, "channels.orders.#");

    broker
        .publish("channels.orders", b"one".to_vec())
        .await
        .unwrap();
    broker
        .publish("channels.orders.returns", b"two".to_vec())
        .await
        .unwrap();

    assert_eq!(next_payload(&mut binding).await, Some(b"one".to_vec()));
    assert_eq!(next_payload(&mut binding).await, Some(b"two".to_vec()));
}

#[tokio::test]
async fn test_channel_exact_binding_filters() {
    let broker = ChannelBroker::default();
    let mut binding = broker
        .bind("orders.returns", BindingMode::Exact)
        .await
        .unwrap();

    broker
        .publish("channels.orders", b"parent".to_vec())
        .await
        .unwrap();
    broker
        .publish("channels.inventory.returns", b"other".to_vec())
        .await
        .unwrap();
    broker
        .publish("channels.orders.returns", b"match".to_vec())
        .await
        .unwrap();

    assert_eq!(next_payload(&mut binding).await, Some(b"match".to_vec()));
    assert_eq!(next_payload(&mut binding).await, None);
}

#[tokio::test]
async fn test_channel_each_queue_gets_a_copy() {
    let broker = ChannelBroker::default();
    let mut first = broker
        .bind("orders", BindingMode::Hierarchical)
        .await
        .unwrap();
    let mut second = broker
        .bind("orders", BindingMode::Hierarchical)
        .await
        .unwrap();
    assert_ne!(first.queue, second.queue);

    broker
        .publish("channels.orders", b"copy".to_vec())
        .await
        .unwrap();

    assert_eq!(next_payload(&mut first).await, Some(b"copy".to_vec()));
    assert_eq!(next_payload(&mut second).await, Some(b"copy".to_vec()));
}

#[tokio::test]
async fn test_channel_unbind_ends_stream() {
    let broker = ChannelBroker::default();
    let mut binding = broker
        .bind("orders", BindingMode::Hierarchical)
        .await
        .unwrap();

    broker.unbind(&binding.queue).await.unwrap();
    assert_eq!(broker.queue_count().await, 0);

    // Stream ends rather than blocking forever
    let next = tokio::time::timeout(Duration::from_millis(200), binding.deliveries.next())
        .await
        .expect("stream should end after unbind");
    assert!(next.is_none());

    // Unbinding twice is harmless
    assert!(broker.unbind(&binding.queue).await.is_ok());
}

#[tokio::test]
async fn test_channel_close_rejects_operations() {
    let broker = ChannelBroker::default();
    let mut binding = broker
        .bind("orders", BindingMode::Hierarchical)
        .await
        .unwrap();

    broker.close().await.unwrap();

    assert!(binding.deliveries.next().await.is_none());
    assert!(matches!(
        broker.publish("channels.orders", vec![]).await,
        Err(BusError::Connection(_))
    ));
    assert!(broker.bind("orders", BindingMode::Exact).await.is_err());
    assert!(broker.declare().await.is_err());

    // Second close is a no-op
    assert!(broker.close().await.is_ok());
}

#[tokio::test]
async fn test_channel_publish_with_wildcard_heavy_binding() {
    let broker = ChannelBroker::default();
    let topic = format!("{}z", ">.".repeat(12));
    let mut binding = broker.bind(&topic, BindingMode::Exact).await.unwrap();

    let words = vec!["w"; 30].join(".");
    broker
        .publish(&format!("channels.{}", words), b"miss".to_vec())
        .await
        .unwrap();
    broker
        .publish(&format!("channels.{}.z", words), b"hit".to_vec())
        .await
        .unwrap();

    assert_eq!(next_payload(&mut binding).await, Some(b"hit".to_vec()));
}
