#![allow(dead_code)]

use kafka_feed_publisher::config::KafkaConfig;
use kafka_feed_publisher::kafka::test_utils::{CountingCheckpoint, CountingContext, MockWriter};
use kafka_feed_publisher::kafka::{BatchSettings, FatalAction, MessagePool};
use kafka_feed_publisher::Producer;
use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Get test configuration from environment variables
pub fn get_test_config() -> KafkaConfig {
    KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        topic: format!("test_feed_{}", std::process::id()),
        required_acks: "all".to_string(),
        compression: "none".to_string(),
        read_timeout_ms: 5_000,
        write_timeout_ms: 5_000,
        producer_batch_size: 3,
        producer_batch_bytes: 1_048_576,
        producer_batch_ticker_ms: 100,
        secure_connection: false,
        scram_username: String::new(),
        scram_password: String::new(),
        root_ca_path: String::new(),
        inter_ca_path: String::new(),
    }
}

pub struct TestPublisher {
    pub producer: Arc<Producer>,
    pub writer: Arc<MockWriter>,
    pub checkpoint: Arc<CountingCheckpoint>,
    pub ctx: Arc<CountingContext>,
}

impl TestPublisher {
    pub async fn produce(&self, value: &str) {
        self.producer
            .produce(self.ctx.as_ref(), value.as_bytes(), b"", &BTreeMap::new())
            .await
            .unwrap();
    }
}

pub fn settings(max_records: usize, max_bytes: usize, ticker: Duration) -> BatchSettings {
    BatchSettings {
        max_records,
        max_bytes,
        ticker,
        fatal_action: FatalAction::Halt,
    }
}

/// Producer over an in-memory writer. Must be called inside a runtime.
pub fn publisher(settings: BatchSettings, writer: MockWriter) -> TestPublisher {
    let writer = Arc::new(writer);
    let checkpoint = Arc::new(CountingCheckpoint::default());
    let producer = Producer::with_writer(
        writer.clone(),
        settings,
        Arc::new(MessagePool::new(64)),
        checkpoint.clone(),
    );

    TestPublisher {
        producer: Arc::new(producer),
        writer,
        checkpoint,
        ctx: Arc::new(CountingContext::default()),
    }
}
