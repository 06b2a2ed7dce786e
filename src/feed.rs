//! Seams to the upstream change feed.
//!
//! The publisher only needs two things from the feed: a way to acknowledge
//! that a record was handed to the batch ([`ListenerContext::ack`]), and a
//! callback that advances the feed's durable position
//! ([`CheckpointCommit::commit`]).
//!
//! [`LineRecord`] and [`LinePosition`] implement both for a feed of
//! newline-delimited JSON records, which is what the binary reads from stdin.

use crate::kafka::Producer;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-record context handed in by the feed listener.
pub trait ListenerContext: Send + Sync {
    /// Marks the record as handed off to the pending batch.
    fn ack(&self);
}

/// Advances the feed's durable read position.
///
/// Called after every successful or empty flush, never after a failed one.
pub trait CheckpointCommit: Send + Sync {
    fn commit(&self);
}

impl<F> CheckpointCommit for F
where
    F: Fn() + Send + Sync,
{
    fn commit(&self) {
        self()
    }
}

/// One line of the newline-delimited JSON feed.
#[derive(Debug, Clone, Deserialize)]
pub struct LineRecord {
    #[serde(default)]
    pub key: Option<String>,
    pub value: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl LineRecord {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(Error::Serialization)
    }

    pub fn key_bytes(&self) -> &[u8] {
        self.key.as_deref().map(str::as_bytes).unwrap_or_default()
    }

    pub fn value_bytes(&self) -> Result<Vec<u8>> {
        match &self.value {
            serde_json::Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => serde_json::to_vec(other).map_err(Error::Serialization),
        }
    }

    pub fn header_bytes(&self) -> BTreeMap<String, Vec<u8>> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
            .collect()
    }
}

/// Highest line number acknowledged so far, shared by every record's context.
#[derive(Debug, Clone, Default)]
pub struct LinePosition {
    acked: Arc<AtomicU64>,
}

impl LinePosition {
    pub fn starting_at(line: u64) -> Self {
        Self {
            acked: Arc::new(AtomicU64::new(line)),
        }
    }

    pub fn context(&self, line: u64) -> LineContext {
        LineContext {
            acked: Arc::clone(&self.acked),
            line,
        }
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct LineContext {
    acked: Arc<AtomicU64>,
    line: u64,
}

impl ListenerContext for LineContext {
    fn ack(&self) {
        self.acked.fetch_max(self.line, Ordering::AcqRel);
    }
}

/// Feeds lines from `reader` into the producer, skipping lines at or before
/// `resume_after` and lines that do not parse. Returns the number of lines read.
///
/// `shutdown` is only checked while waiting for the next line. A `produce`
/// that has started, including the flush it triggers, always runs to the end;
/// the loop then returns [`Error::Shutdown`] before taking another line.
pub async fn pump_lines<R>(
    reader: R,
    producer: &Producer,
    position: &LinePosition,
    resume_after: u64,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    loop {
        // next_line is cancel safe.
        let next = tokio::select! {
            biased;
            Ok(_) = shutdown.wait_for(|stop| *stop) => return Err(Error::Shutdown),
            next = lines.next_line() => next?,
        };
        let Some(line) = next else {
            break;
        };

        line_no += 1;
        if line_no <= resume_after || line.trim().is_empty() {
            continue;
        }

        let record = match LineRecord::parse(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed record");
                continue;
            }
        };

        let ctx = position.context(line_no);
        producer
            .produce(
                &ctx,
                &record.value_bytes()?,
                record.key_bytes(),
                &record.header_bytes(),
            )
            .await?;
        debug!(line = line_no, "Record queued");
    }

    Ok(line_no)
}
