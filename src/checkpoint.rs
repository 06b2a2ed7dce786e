//! Durable feed position for the binary's checkpoint-commit sink.
//!
//! The publisher itself only invokes a [`crate::CheckpointCommit`] callback;
//! this module is one place such a callback can land. It stores the last
//! feed position that is known to be published, so a restart resumes after
//! it instead of replaying the whole feed.
//!
//! # Example
//!
//! ```rust,no_run
//! use kafka_feed_publisher::checkpoint::{Checkpoint, CheckpointManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = CheckpointManager::new("checkpoint.json");
//!
//!     if let Some(checkpoint) = manager.load().await? {
//!         println!("Resuming after position {}", checkpoint.position);
//!     }
//!
//!     manager.save(&Checkpoint::new(1_024)).await?;
//!     Ok(())
//! }
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// A committed position in the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Every record up to and including this position has been published.
    pub position: u64,
    /// When this checkpoint was written.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Checkpoint {
    pub fn new(position: u64) -> Self {
        Self {
            position,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Persists checkpoints to a JSON file.
///
/// Writes go to a temporary file that is synced and then renamed over the
/// target, so a crash mid-write leaves the previous checkpoint intact.
pub struct CheckpointManager {
    file_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl AsRef<Path>) -> Self {
        Self {
            file_path: checkpoint_path.as_ref().to_path_buf(),
        }
    }

    /// Loads the checkpoint, or `None` on first run.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        if !fs::try_exists(&self.file_path).await? {
            debug!("No checkpoint file found at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path).await.map_err(|e| {
            error!("Failed to read checkpoint file: {}", e);
            Error::Io(e)
        })?;

        let checkpoint = serde_json::from_str::<Checkpoint>(&content).map_err(|e| {
            error!("Failed to parse checkpoint file: {}", e);
            Error::Serialization(e)
        })?;

        info!(
            "Loaded checkpoint: position={}, timestamp={}",
            checkpoint.position, checkpoint.timestamp
        );
        Ok(Some(checkpoint))
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        debug!("Saving checkpoint: position={}", checkpoint.position);

        let temp_path = self.file_path.with_extension("tmp");

        let json = serde_json::to_string_pretty(checkpoint)?;
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.file_path).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        if fs::try_exists(&self.file_path).await? {
            fs::remove_file(&self.file_path).await?;
            info!("Deleted checkpoint file");
        }
        Ok(())
    }

    /// Saves every new position published on `positions` until the sender
    /// is dropped, skipping positions that did not move.
    ///
    /// Returns the last position written.
    pub async fn persist_from(&self, mut positions: watch::Receiver<u64>) -> Result<u64> {
        let mut saved = *positions.borrow_and_update();

        while positions.changed().await.is_ok() {
            let position = *positions.borrow_and_update();
            if position <= saved {
                continue;
            }
            if let Err(e) = self.save(&Checkpoint::new(position)).await {
                warn!(position, error = %e, "Failed to save checkpoint, will retry on next commit");
                continue;
            }
            saved = position;
        }

        // Last value may have been published right before the sender dropped.
        let position = *positions.borrow();
        if position > saved {
            self.save(&Checkpoint::new(position)).await?;
            saved = position;
        }
        Ok(saved)
    }
}
