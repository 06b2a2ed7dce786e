//! Error types and result handling for kafka-feed-publisher.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use kafka_feed_publisher::{Error, Result};
//!
//! fn open_publisher() -> Result<()> {
//!     Err(Error::Config("kafka.topic must not be empty".to_string()))
//! }
//!
//! match open_publisher() {
//!     Ok(()) => println!("Publisher ready"),
//!     Err(Error::Config(msg)) => eprintln!("Configuration error: {}", msg),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for kafka-feed-publisher operations.
///
/// Publish failures surface as [`Error::Kafka`] or [`Error::Io`]; whether
/// they are retried is decided by [`crate::kafka::classify`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically an invalid or missing setting.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure while loading configuration sources.
    #[error("Configuration load error: {0}")]
    Settings(#[from] config::ConfigError),

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// I/O error, from checkpoint files or a writer's transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Certificate material could not be read or parsed.
    #[error("TLS error for {}: {message}", .path.display())]
    Tls {
        /// File the certificate was read from
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Publish failure that carries no lower-level cause.
    #[error("Publish error: {message}")]
    Publish {
        /// Description of the failure
        message: String,
    },

    /// A publish failure was classified fatal; the publisher is terminal.
    #[error("Fatal publish error: {message}")]
    Fatal {
        /// Description of the original failure
        message: String,
    },

    /// The publisher has been closed and accepts no more records.
    #[error("Publisher is closed")]
    Closed,

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// Not really an error; used to leave the feed loop cleanly.
    #[error("Shutdown requested")]
    Shutdown,
}

/// A convenient Result type alias for kafka-feed-publisher operations.
pub type Result<T> = std::result::Result<T, Error>;
