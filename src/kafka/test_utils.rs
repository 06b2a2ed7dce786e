//! In-memory stand-ins for the broker and the feed, used by the test suites.

use crate::feed::{CheckpointCommit, ListenerContext};
use crate::kafka::message::OutboundMessage;
use crate::kafka::writer::BatchWriter;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Result of one scripted `publish` call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Ok,
    Io(io::ErrorKind),
    Kafka(RDKafkaErrorCode),
    Other(String),
}

impl MockOutcome {
    fn into_result(self) -> Result<()> {
        match self {
            MockOutcome::Ok => Ok(()),
            MockOutcome::Io(kind) => Err(Error::Io(io::Error::from(kind))),
            MockOutcome::Kafka(code) => Err(Error::Kafka(KafkaError::MessageProduction(code))),
            MockOutcome::Other(message) => Err(Error::Publish { message }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Vec<(String, Vec<u8>)>,
}

impl From<&OutboundMessage> for PublishedRecord {
    fn from(message: &OutboundMessage) -> Self {
        Self {
            key: message.key.to_vec(),
            value: message.value.to_vec(),
            headers: message.headers.clone(),
        }
    }
}

/// Records every batch it is handed. Outcomes are scripted per call;
/// once the script runs out every call succeeds.
#[derive(Debug, Default)]
pub struct MockWriter {
    script: Mutex<VecDeque<MockOutcome>>,
    attempted: Mutex<Vec<Vec<PublishedRecord>>>,
    published: Mutex<Vec<Vec<PublishedRecord>>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    published_after_close: AtomicBool,
}

impl MockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: MockOutcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Makes every publish take `delay`, like a slow broker.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempted.lock().len()
    }

    pub fn attempted_batches(&self) -> Vec<Vec<PublishedRecord>> {
        self.attempted.lock().clone()
    }

    pub fn published_batches(&self) -> Vec<Vec<PublishedRecord>> {
        self.published.lock().clone()
    }

    /// Values of every successfully published record, in publish order.
    pub fn published_values(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .flatten()
            .map(|r| String::from_utf8_lossy(&r.value).into_owned())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True if a publish finished after `close` had been called.
    pub fn published_after_close(&self) -> bool {
        self.published_after_close.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchWriter for MockWriter {
    async fn publish(&self, batch: &[OutboundMessage]) -> Result<()> {
        let records: Vec<PublishedRecord> = batch.iter().map(PublishedRecord::from).collect();
        self.attempted.lock().push(records.clone());
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.script.lock().pop_front().unwrap_or(MockOutcome::Ok);
        let result = outcome.into_result();
        if result.is_ok() {
            if self.is_closed() {
                self.published_after_close.store(true, Ordering::SeqCst);
            }
            self.published.lock().push(records);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Checkpoint sink that only counts commits.
#[derive(Debug, Default)]
pub struct CountingCheckpoint {
    commits: AtomicUsize,
}

impl CountingCheckpoint {
    pub fn count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl CheckpointCommit for CountingCheckpoint {
    fn commit(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener context that counts acks.
#[derive(Debug, Default)]
pub struct CountingContext {
    acks: AtomicUsize,
}

impl CountingContext {
    pub fn acks(&self) -> usize {
        self.acks.load(Ordering::SeqCst)
    }
}

impl ListenerContext for CountingContext {
    fn ack(&self) {
        self.acks.fetch_add(1, Ordering::SeqCst);
    }
}
