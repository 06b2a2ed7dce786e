//! Outbound records and the pool they are recycled through.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Instant;

/// A record waiting in the pending batch.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub key: BytesMut,
    pub value: BytesMut,
    pub headers: Vec<(String, Vec<u8>)>,
    /// When the record was handed to the publisher.
    pub arrived_at: Instant,
}

impl Default for OutboundMessage {
    fn default() -> Self {
        Self {
            key: BytesMut::new(),
            value: BytesMut::new(),
            headers: Vec::new(),
            arrived_at: Instant::now(),
        }
    }
}

impl OutboundMessage {
    /// Overwrites this message in place, keeping buffer capacity.
    pub fn fill(
        &mut self,
        value: &[u8],
        key: &[u8],
        headers: &BTreeMap<String, Vec<u8>>,
        arrived_at: Instant,
    ) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.value.clear();
        self.value.extend_from_slice(value);
        self.headers.clear();
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.arrived_at = arrived_at;
    }

    /// Estimated wire size used for the byte threshold.
    pub fn estimated_size(&self) -> usize {
        self.key.len()
            + self.value.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    fn reset(&mut self) {
        self.key.clear();
        self.value.clear();
        self.headers.clear();
    }
}

/// Bounded free list of [`OutboundMessage`]s.
///
/// Owned by whoever builds the producer and shared by `Arc`, so tests and
/// multiple publishers never see each other's buffers.
#[derive(Debug)]
pub struct MessagePool {
    free: Mutex<Vec<OutboundMessage>>,
    capacity: usize,
}

impl MessagePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn get(&self) -> OutboundMessage {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Returns messages to the pool; anything past capacity is dropped.
    pub fn recycle<I>(&self, messages: I)
    where
        I: IntoIterator<Item = OutboundMessage>,
    {
        let mut free = self.free.lock();
        for mut message in messages {
            if free.len() >= self.capacity {
                break;
            }
            message.reset();
            free.push(message);
        }
    }

    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}
