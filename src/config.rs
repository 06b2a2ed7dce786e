use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    #[serde(default = "default_acks")]
    pub required_acks: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_producer_batch_size")]
    pub producer_batch_size: usize,
    #[serde(default = "default_producer_batch_bytes")]
    pub producer_batch_bytes: usize,
    #[serde(default = "default_producer_batch_ticker_ms")]
    pub producer_batch_ticker_ms: u64,
    #[serde(default)]
    pub secure_connection: bool,
    #[serde(default)]
    pub scram_username: String,
    #[serde(default)]
    pub scram_password: String,
    #[serde(default)]
    pub root_ca_path: String,
    #[serde(default)]
    pub inter_ca_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_file")]
    pub file: PathBuf,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            file: default_checkpoint_file(),
            pool_capacity: default_pool_capacity(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FEED_PUBLISHER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kafka.validate()
    }
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::Config("kafka.brokers must not be empty".to_string()));
        }
        if self.topic.trim().is_empty() {
            return Err(Error::Config("kafka.topic must not be empty".to_string()));
        }
        if !matches!(self.required_acks.as_str(), "all" | "-1" | "0" | "1") {
            return Err(Error::Config(format!(
                "kafka.required_acks must be one of all, -1, 0, 1 (got {:?})",
                self.required_acks
            )));
        }
        if self.producer_batch_size == 0 {
            return Err(Error::Config(
                "kafka.producer_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.producer_batch_bytes == 0 {
            return Err(Error::Config(
                "kafka.producer_batch_bytes must be greater than zero".to_string(),
            ));
        }
        if self.producer_batch_ticker_ms == 0 {
            return Err(Error::Config(
                "kafka.producer_batch_ticker_ms must be greater than zero".to_string(),
            ));
        }
        if self.secure_connection {
            let missing: Vec<&str> = [
                ("scram_username", &self.scram_username),
                ("scram_password", &self.scram_password),
                ("root_ca_path", &self.root_ca_path),
                ("inter_ca_path", &self.inter_ca_path),
            ]
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();

            if !missing.is_empty() {
                return Err(Error::Config(format!(
                    "kafka.secure_connection requires {}",
                    missing.join(", ")
                )));
            }
            if !cfg!(feature = "ssl") {
                return Err(Error::Config(
                    "kafka.secure_connection requires a build with the `ssl` feature".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn batch_ticker(&self) -> Duration {
        Duration::from_millis(self.producer_batch_ticker_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_producer_batch_size() -> usize {
    2000
}

fn default_producer_batch_bytes() -> usize {
    10_485_760 // 10MB
}

fn default_producer_batch_ticker_ms() -> u64 {
    10_000
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("checkpoint.json")
}

fn default_pool_capacity() -> usize {
    4096
}
