pub mod batch;
pub mod classify;
pub mod message;
pub mod producer;
pub mod security;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod writer;

pub use batch::{BatchSettings, FatalAction, FlushOutcome, MetricsSnapshot, ProducerBatch};
pub use classify::{classify, ErrorClass};
pub use message::{MessagePool, OutboundMessage};
pub use producer::Producer;
pub use security::SecureTransport;
pub use writer::{BatchWriter, KafkaWriter};
