//! Pending batch, flush engine and rebalance gate.
//!
//! A single async mutex guards the pending records, the running byte count,
//! the rebalance flag and the closed flag. Appends, flushes and rebalance
//! transitions all take it, and flush keeps it across the broker call, so
//! batches reach the broker strictly in append order.
//!
//! Flush outcomes:
//!
//! | pending   | publish result | batch    | timer | checkpoint |
//! |-----------|----------------|----------|-------|------------|
//! | empty     | (not called)   | -        | -     | commit     |
//! | non-empty | ok             | cleared  | reset | commit     |
//! | non-empty | transient      | retained | -     | -          |
//! | non-empty | fatal          | retained | -     | - (halt)   |

use crate::config::KafkaConfig;
use crate::feed::{CheckpointCommit, ListenerContext};
use crate::kafka::classify::{classify, ErrorClass};
use crate::kafka::message::{MessagePool, OutboundMessage};
use crate::kafka::writer::BatchWriter;
use crate::{Error, Result};
use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What to do once a publish failure is classified fatal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FatalAction {
    /// Log and abort the process; a supervisor restarts it.
    #[default]
    Abort,
    /// Leave the batch terminal and report [`Error::Fatal`] to callers.
    Halt,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_records: usize,
    pub max_bytes: usize,
    pub ticker: Duration,
    pub fatal_action: FatalAction,
}

impl BatchSettings {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            max_records: config.producer_batch_size,
            max_bytes: config.producer_batch_bytes,
            ticker: config.batch_ticker(),
            fatal_action: FatalAction::Abort,
        }
    }

    pub fn with_fatal_action(mut self, fatal_action: FatalAction) -> Self {
        self.fatal_action = fatal_action;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; the checkpoint was committed anyway.
    Empty,
    /// This many records were published and the checkpoint committed.
    Published(usize),
    /// Publishing failed transiently; this many records wait for the next trigger.
    Retained(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Record arrival until it joined the batch.
    pub connector_latency_ms: u64,
    /// Duration of the last successful batch publish.
    pub batch_produce_latency_ms: u64,
}

#[derive(Debug, Default)]
struct PublishMetrics {
    connector_latency_ms: AtomicU64,
    batch_produce_latency_ms: AtomicU64,
}

impl PublishMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connector_latency_ms: self.connector_latency_ms.load(Ordering::Relaxed),
            batch_produce_latency_ms: self.batch_produce_latency_ms.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct PendingBatch {
    messages: Vec<OutboundMessage>,
    bytes: usize,
    rebalancing: bool,
    closed: bool,
}

struct Ticker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct ProducerBatch {
    state: Mutex<PendingBatch>,
    writer: Arc<dyn BatchWriter>,
    checkpoint: Arc<dyn CheckpointCommit>,
    pool: Arc<MessagePool>,
    settings: BatchSettings,
    metrics: PublishMetrics,
    ticker_reset: Notify,
    ticker: SyncMutex<Option<Ticker>>,
    terminated: AtomicBool,
}

impl ProducerBatch {
    pub fn new(
        settings: BatchSettings,
        writer: Arc<dyn BatchWriter>,
        checkpoint: Arc<dyn CheckpointCommit>,
        pool: Arc<MessagePool>,
    ) -> Self {
        Self {
            state: Mutex::new(PendingBatch {
                messages: Vec::with_capacity(settings.max_records.min(65_536)),
                ..PendingBatch::default()
            }),
            writer,
            checkpoint,
            pool,
            settings,
            metrics: PublishMetrics::default(),
            ticker_reset: Notify::new(),
            ticker: SyncMutex::new(None),
            terminated: AtomicBool::new(false),
        }
    }

    /// Spawns the periodic flush. Calling it again while running is a no-op.
    pub fn start_ticker(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }

        let (stop, stopped) = oneshot::channel();
        let batch = Arc::clone(self);
        let handle = tokio::spawn(async move { batch.run_ticker(stopped).await });
        *ticker = Some(Ticker { stop, handle });
    }

    async fn run_ticker(self: Arc<Self>, mut stopped: oneshot::Receiver<()>) {
        // tokio panics on a zero period.
        let period = self.settings.ticker.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(period_ms = millis(period), "batch ticker started");

        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => break,
                _ = self.ticker_reset.notified() => interval.reset(),
                _ = interval.tick() => {
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "batch ticker stopping");
                        break;
                    }
                }
            }
        }
        debug!("batch ticker stopped");
    }

    /// Adds a record to the pending batch and acks it to the feed.
    ///
    /// While a rebalance is in progress the record is dropped without an ack.
    /// Flushes once the count or byte threshold is reached.
    pub async fn append(&self, ctx: &dyn ListenerContext, message: OutboundMessage) -> Result<()> {
        self.ensure_live()?;
        let arrived_at = message.arrived_at;

        let threshold_reached = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(Error::Closed);
            }
            if state.rebalancing {
                drop(state);
                self.pool.recycle(std::iter::once(message));
                return Ok(());
            }

            state.bytes += message.estimated_size();
            state.messages.push(message);
            ctx.ack();

            state.messages.len() >= self.settings.max_records
                || state.bytes >= self.settings.max_bytes
        };

        self.metrics
            .connector_latency_ms
            .store(millis(arrived_at.elapsed()), Ordering::Relaxed);

        if threshold_reached {
            self.flush().await?;
        }
        Ok(())
    }

    /// Publishes whatever is pending. See the module docs for the outcomes.
    ///
    /// Rejected with [`Error::Closed`] once [`close`](Self::close) has run,
    /// since the writer may already be gone.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.ensure_live()?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        self.flush_locked(&mut state).await
    }

    async fn flush_locked(&self, state: &mut PendingBatch) -> Result<FlushOutcome> {
        if state.messages.is_empty() {
            self.checkpoint.commit();
            return Ok(FlushOutcome::Empty);
        }

        let count = state.messages.len();
        let started = Instant::now();

        match self.writer.publish(&state.messages).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.metrics
                    .batch_produce_latency_ms
                    .store(millis(elapsed), Ordering::Relaxed);

                self.pool.recycle(state.messages.drain(..));
                state.bytes = 0;
                self.ticker_reset.notify_one();
                self.checkpoint.commit();

                debug!(
                    records = count,
                    elapsed_ms = millis(elapsed),
                    "batch flushed"
                );
                Ok(FlushOutcome::Published(count))
            }
            Err(e) => match classify(&e) {
                ErrorClass::Transient => {
                    warn!(
                        error = %e,
                        records = count,
                        "batch producer flush error, batch retained for retry"
                    );
                    Ok(FlushOutcome::Retained(count))
                }
                ErrorClass::Fatal => {
                    self.terminated.store(true, Ordering::Release);
                    error!(
                        error = %e,
                        records = count,
                        "permanent error on Kafka side"
                    );
                    if self.settings.fatal_action == FatalAction::Abort {
                        std::process::abort();
                    }
                    Err(Error::Fatal {
                        message: e.to_string(),
                    })
                }
            },
        }
    }

    /// Stops accepting records and discards the pending batch.
    pub async fn prepare_start_rebalancing(&self) {
        let mut state = self.state.lock().await;
        state.rebalancing = true;
        let discarded = state.messages.len();
        self.pool.recycle(state.messages.drain(..));
        state.bytes = 0;

        if discarded > 0 {
            info!(discarded, "rebalance started, pending batch discarded");
        } else {
            debug!("rebalance started");
        }
    }

    pub async fn prepare_end_rebalancing(&self) {
        let mut state = self.state.lock().await;
        state.rebalancing = false;
        debug!("rebalance ended");
    }

    /// Stops the ticker, waits for it to finish, then runs the final flush.
    ///
    /// Records appended before this returns are either published or reported
    /// through the returned error.
    pub async fn close(&self) -> Result<()> {
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            // The ticker may already have exited after a fatal error.
            let _ = ticker.stop.send(());
            if let Err(e) = ticker.handle.await {
                warn!(error = %e, "batch ticker task failed");
            }
        }

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::Closed);
        }
        state.closed = true;
        self.ensure_live()?;

        match self.flush_locked(&mut state).await? {
            FlushOutcome::Retained(count) => Err(Error::Publish {
                message: format!("{} records left unpublished at close", count),
            }),
            _ => Ok(()),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn pending_bytes(&self) -> usize {
        self.state.lock().await.bytes
    }

    pub async fn is_rebalancing(&self) -> bool {
        self.state.lock().await.rebalancing
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::Fatal {
                message: "publisher halted after a fatal publish error".to_string(),
            });
        }
        Ok(())
    }
}
