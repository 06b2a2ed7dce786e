use crate::config::KafkaConfig;
use crate::kafka::batch::millis;
use crate::kafka::message::OutboundMessage;
use crate::kafka::security::SecureTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

/// librdkafka's ceiling for integer properties; used where "unlimited" is wanted.
const RDKAFKA_INT_MAX: i32 = i32::MAX;

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronously publishes a whole batch and reports the outcome.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Publishes `batch` in order. Returns once every record is acknowledged
    /// or the first failure is known.
    async fn publish(&self, batch: &[OutboundMessage]) -> Result<()>;

    /// Releases the broker connection.
    async fn close(&self) -> Result<()>;
}

pub struct KafkaWriter {
    producer: FutureProducer,
    topic: String,
}

impl KafkaWriter {
    pub fn new(config: &KafkaConfig, transport: Option<&SecureTransport>) -> Result<Self> {
        let mut client_config = client_config(config);
        if let Some(transport) = transport {
            transport.apply(&mut client_config);
        }

        let producer: FutureProducer = client_config.create().map_err(Error::Kafka)?;

        info!(
            brokers = ?config.brokers,
            topic = %config.topic,
            acks = %config.required_acks,
            secure = transport.is_some(),
            "Kafka writer created"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", config.brokers.join(","))
        .set("acks", &config.required_acks)
        .set("compression.type", &config.compression)
        // crc32 of the key, like a content-hash balancer
        .set("partitioner", "consistent_random")
        .set("batch.num.messages", config.producer_batch_size.to_string())
        .set("batch.size", RDKAFKA_INT_MAX.to_string())
        .set("message.send.max.retries", RDKAFKA_INT_MAX.to_string())
        // With unlimited retries, more than one request in flight lets a
        // retried record land after its successors.
        .set("max.in.flight.requests.per.connection", "1")
        .set("socket.timeout.ms", millis(config.read_timeout()).to_string())
        .set("request.timeout.ms", millis(config.write_timeout()).to_string())
        // Batches are formed by the caller; hand them to the broker at once.
        .set("linger.ms", "0");
    client_config
}

fn to_headers(headers: &[(String, Vec<u8>)]) -> Option<OwnedHeaders> {
    if headers.is_empty() {
        return None;
    }
    let owned = headers.iter().fold(
        OwnedHeaders::new_with_capacity(headers.len()),
        |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        },
    );
    Some(owned)
}

#[async_trait]
impl BatchWriter for KafkaWriter {
    async fn publish(&self, batch: &[OutboundMessage]) -> Result<()> {
        let mut deliveries = Vec::with_capacity(batch.len());
        let mut enqueue_error = None;

        for message in batch {
            let mut record = FutureRecord::to(&self.topic)
                .payload(&message.value[..])
                .key(&message.key[..]);
            if let Some(headers) = to_headers(&message.headers) {
                record = record.headers(headers);
            }

            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((e, _)) => {
                    enqueue_error = Some(e);
                    break;
                }
            }
        }

        // Wait for whatever was enqueued before reporting, so a retry never
        // races an outstanding delivery of the same batch.
        let mut first_error = enqueue_error.map(Error::Kafka);
        for outcome in join_all(deliveries).await {
            let failure = match outcome {
                Ok(Ok(_)) => None,
                Ok(Err((e, _))) => Some(Error::Kafka(e)),
                Err(_) => Some(Error::Publish {
                    message: "delivery future canceled".to_string(),
                }),
            };
            if first_error.is_none() {
                first_error = failure;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                debug!(records = batch.len(), topic = %self.topic, "batch delivered");
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || producer.flush(CLOSE_FLUSH_TIMEOUT))
            .await
            .map_err(|e| Error::Publish {
                message: format!("flush task failed: {}", e),
            })?;

        if let Err(e) = &flushed {
            warn!(error = %e, "failed to flush Kafka producer on close");
        }
        flushed.map_err(Error::Kafka)?;
        info!(topic = %self.topic, "Kafka writer closed");
        Ok(())
    }
}
