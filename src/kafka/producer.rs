use crate::config::KafkaConfig;
use crate::feed::{CheckpointCommit, ListenerContext};
use crate::kafka::batch::{millis, BatchSettings, FlushOutcome, MetricsSnapshot, ProducerBatch};
use crate::kafka::message::MessagePool;
use crate::kafka::security::SecureTransport;
use crate::kafka::writer::{BatchWriter, KafkaWriter};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Publishing front end handed to the feed listener.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Producer {
    batch: Arc<ProducerBatch>,
    writer: Arc<dyn BatchWriter>,
    pool: Arc<MessagePool>,
}

impl Producer {
    /// Connects to Kafka as described by `config` and starts the batch ticker.
    ///
    /// Fails if the secure transport cannot be built; that is a startup error.
    pub fn new(
        config: &KafkaConfig,
        pool: Arc<MessagePool>,
        checkpoint: Arc<dyn CheckpointCommit>,
    ) -> Result<Self> {
        config.validate()?;

        let transport = if config.secure_connection {
            let transport = SecureTransport::load(
                &config.scram_username,
                &config.scram_password,
                &config.root_ca_path,
                &config.inter_ca_path,
            )
            .map_err(|e| {
                error!(error = %e, "Secure kafka couldn't connect");
                e
            })?;
            Some(transport)
        } else {
            None
        };

        let writer = KafkaWriter::new(config, transport.as_ref())?;
        Ok(Self::with_writer(
            Arc::new(writer),
            BatchSettings::from_config(config),
            pool,
            checkpoint,
        ))
    }

    /// Builds a producer around any writer and starts the batch ticker.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_writer(
        writer: Arc<dyn BatchWriter>,
        settings: BatchSettings,
        pool: Arc<MessagePool>,
        checkpoint: Arc<dyn CheckpointCommit>,
    ) -> Self {
        info!(
            max_records = settings.max_records,
            max_bytes = settings.max_bytes,
            ticker_ms = millis(settings.ticker),
            "Starting batch producer"
        );

        let batch = Arc::new(ProducerBatch::new(
            settings,
            Arc::clone(&writer),
            checkpoint,
            Arc::clone(&pool),
        ));
        batch.start_ticker();

        Self {
            batch,
            writer,
            pool,
        }
    }

    /// Queues one record for publishing.
    ///
    /// Returns after the record is in the batch, or after the flush it
    /// triggered. Records offered during a rebalance are dropped.
    pub async fn produce(
        &self,
        ctx: &dyn ListenerContext,
        value: &[u8],
        key: &[u8],
        headers: &BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let mut message = self.pool.get();
        message.fill(value, key, headers, Instant::now());
        self.batch.append(ctx, message).await
    }

    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.batch.flush().await
    }

    pub async fn prepare_start_rebalancing(&self) {
        self.batch.prepare_start_rebalancing().await
    }

    pub async fn prepare_end_rebalancing(&self) {
        self.batch.prepare_end_rebalancing().await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.batch.metrics()
    }

    /// Stops the ticker, flushes what is left and closes the broker
    /// connection, in that order. The writer is closed even when the final
    /// flush fails; the flush error is returned in preference.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        info!("Closing producer");
        let flushed = self.batch.close().await;
        let closed = self.writer.close().await;

        match (&flushed, &closed) {
            (Err(e), _) => error!(error = %e, "final flush failed"),
            (Ok(()), Err(e)) => error!(error = %e, "failed to close Kafka writer"),
            (Ok(()), Ok(())) => info!("Producer closed"),
        }
        flushed.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::batch::FatalAction;
    use crate::kafka::test_utils::{CountingCheckpoint, CountingContext, MockWriter};
    use std::time::Duration;

    fn settings() -> BatchSettings {
        BatchSettings {
            max_records: 100,
            max_bytes: 1 << 20,
            ticker: Duration::from_secs(3600),
            fatal_action: FatalAction::Halt,
        }
    }

    #[tokio::test]
    async fn test_produce_populates_message() {
        let writer = Arc::new(MockWriter::new());
        let producer = Producer::with_writer(
            writer.clone(),
            settings(),
            Arc::new(MessagePool::new(8)),
            Arc::new(CountingCheckpoint::default()),
        );
        let ctx = CountingContext::default();
        let mut headers = BTreeMap::new();
        headers.insert("op".to_string(), b"mutation".to_vec());

        producer.produce(&ctx, b"v1", b"k1", &headers).await.unwrap();
        producer.flush().await.unwrap();

        let batches = writer.published_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].key, b"k1".to_vec());
        assert_eq!(batches[0][0].value, b"v1".to_vec());
        assert_eq!(
            batches[0][0].headers,
            vec![("op".to_string(), b"mutation".to_vec())]
        );
        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_published_messages_return_to_pool() {
        let pool = Arc::new(MessagePool::new(8));
        let producer = Producer::with_writer(
            Arc::new(MockWriter::new()),
            settings(),
            Arc::clone(&pool),
            Arc::new(CountingCheckpoint::default()),
        );
        let ctx = CountingContext::default();

        for value in ["a", "b", "c"] {
            producer
                .produce(&ctx, value.as_bytes(), b"", &BTreeMap::new())
                .await
                .unwrap();
        }
        assert_eq!(pool.idle(), 0);

        producer.flush().await.unwrap();
        assert_eq!(pool.idle(), 3);
        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_closes_writer() {
        let writer = Arc::new(MockWriter::new());
        let producer = Producer::with_writer(
            writer.clone(),
            settings(),
            Arc::new(MessagePool::new(8)),
            Arc::new(CountingCheckpoint::default()),
        );

        producer.close().await.unwrap();
        assert!(writer.is_closed());
    }

    fn secure_config() -> KafkaConfig {
        KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            topic: "feed".to_string(),
            required_acks: "all".to_string(),
            compression: "none".to_string(),
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            producer_batch_size: 10,
            producer_batch_bytes: 1024,
            producer_batch_ticker_ms: 100,
            secure_connection: true,
            scram_username: "svc".to_string(),
            scram_password: "secret".to_string(),
            root_ca_path: "/nonexistent/ca.pem".to_string(),
            inter_ca_path: "/nonexistent/int.pem".to_string(),
        }
    }

    #[cfg(feature = "ssl")]
    #[tokio::test]
    async fn test_secure_connection_with_missing_certs_fails_startup() {
        let result = Producer::new(
            &secure_config(),
            Arc::new(MessagePool::new(8)),
            Arc::new(CountingCheckpoint::default()),
        );
        assert!(matches!(result, Err(crate::Error::Tls { .. })));
    }

    #[cfg(not(feature = "ssl"))]
    #[tokio::test]
    async fn test_secure_connection_without_ssl_build_fails_startup() {
        let result = Producer::new(
            &secure_config(),
            Arc::new(MessagePool::new(8)),
            Arc::new(CountingCheckpoint::default()),
        );
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
