mod common;

use common::get_test_config;
use kafka_feed_publisher::kafka::test_utils::{CountingCheckpoint, CountingContext};
use kafka_feed_publisher::kafka::MessagePool;
use kafka_feed_publisher::Producer;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::Message;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
#[ignore] // Requires running Kafka. Run with: cargo test --test kafka_live_test -- --ignored
async fn test_batches_reach_kafka_in_order() {
    tracing_subscriber::fmt()
        .with_env_filter("kafka_feed_publisher=debug")
        .try_init()
        .ok();

    let config = get_test_config();
    let checkpoint = Arc::new(CountingCheckpoint::default());
    let producer = Producer::new(
        &config,
        Arc::new(MessagePool::new(64)),
        checkpoint.clone(),
    )
    .unwrap();

    let ctx = CountingContext::default();
    let mut headers = BTreeMap::new();
    headers.insert("source".to_string(), b"live-test".to_vec());
    for i in 0..7 {
        producer
            .produce(&ctx, format!("record-{}", i).as_bytes(), b"same-key", &headers)
            .await
            .unwrap();
    }
    producer.close().await.unwrap();
    assert!(checkpoint.count() >= 3);

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", config.brokers.join(","))
        .set("group.id", format!("live-test-{}", std::process::id()))
        .set("auto.offset.reset", "earliest")
        .create()
        .unwrap();
    consumer.subscribe(&[config.topic.as_str()]).unwrap();

    let mut received = Vec::new();
    while received.len() < 7 {
        let message = timeout(Duration::from_secs(10), consumer.recv())
            .await
            .expect("timed out waiting for records")
            .unwrap();
        if let Some(payload) = message.payload() {
            received.push(String::from_utf8_lossy(payload).into_owned());
        }
    }

    let expected: Vec<String> = (0..7).map(|i| format!("record-{}", i)).collect();
    assert_eq!(received, expected);
}
