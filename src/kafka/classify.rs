//! Decides whether a failed publish may be retried.
//!
//! Everything is fatal unless it is on the allowlist below: broker errors the
//! broker itself reports as temporary, and a handful of connection faults.
//! An unknown failure is never retried silently.

use crate::Error;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Keep the batch and retry on the next trigger.
    Transient,
    /// Stop; retrying could drop or duplicate data.
    Fatal,
}

pub fn classify(err: &Error) -> ErrorClass {
    let transient = match err {
        Error::Kafka(e) => is_temporary_kafka_error(e),
        Error::Io(e) => is_connection_fault(e.kind()),
        _ => false,
    };

    if transient {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

fn is_temporary_kafka_error(err: &KafkaError) -> bool {
    match err.rdkafka_error_code() {
        Some(code) => is_temporary_code(code) || is_transport_code(code),
        None => false,
    }
}

/// Broker response codes the protocol marks retriable.
fn is_temporary_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::ReplicaNotAvailable
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::CoordinatorLoadInProgress
            | RDKafkaErrorCode::CoordinatorNotAvailable
            | RDKafkaErrorCode::NotCoordinator
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::KafkaStorageError
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::QueueFull
    )
}

/// librdkafka's local codes for a dropped or refused broker connection.
fn is_transport_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown
    )
}

fn is_connection_fault(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
    )
}
