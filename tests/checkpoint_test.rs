use kafka_feed_publisher::checkpoint::{Checkpoint, CheckpointManager};
use kafka_feed_publisher::feed::LinePosition;
use kafka_feed_publisher::kafka::test_utils::MockWriter;
use kafka_feed_publisher::kafka::{BatchSettings, FatalAction, MessagePool};
use kafka_feed_publisher::{CheckpointCommit, Producer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

#[tokio::test]
async fn test_checkpoint_recovery_simulation() {
    let temp_dir = TempDir::new().unwrap();
    let checkpoint_path = temp_dir.path().join("recovery_checkpoint.json");

    // Simulate first run
    {
        let manager = CheckpointManager::new(&checkpoint_path);
        assert!(manager.load().await.unwrap().is_none());
        manager.save(&Checkpoint::new(500)).await.unwrap();
    }

    // Simulate restart/recovery
    {
        let manager = CheckpointManager::new(&checkpoint_path);
        let loaded = manager.load().await.unwrap().expect("Should recover checkpoint");
        assert_eq!(loaded.position, 500);

        manager.save(&Checkpoint::new(loaded.position + 300)).await.unwrap();
    }

    let manager = CheckpointManager::new(&checkpoint_path);
    let final_checkpoint = manager.load().await.unwrap().expect("Should have final checkpoint");
    assert_eq!(final_checkpoint.position, 800);
}

#[tokio::test]
async fn test_published_position_is_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let manager = CheckpointManager::new(temp_dir.path().join("checkpoint.json"));

    let position = LinePosition::default();
    let (tx, rx) = watch::channel(0u64);
    let persister = tokio::spawn(async move { manager.persist_from(rx).await });

    let commit_position = position.clone();
    let checkpoint: Arc<dyn CheckpointCommit> = Arc::new(move || {
        let acked = commit_position.acked();
        tx.send_if_modified(|committed| {
            let moved = acked > *committed;
            if moved {
                *committed = acked;
            }
            moved
        });
    });

    let writer = Arc::new(MockWriter::new());
    let producer = Producer::with_writer(
        writer.clone(),
        BatchSettings {
            max_records: 2,
            max_bytes: 1 << 20,
            ticker: Duration::from_secs(3600),
            fatal_action: FatalAction::Halt,
        },
        Arc::new(MessagePool::new(8)),
        checkpoint,
    );

    for line in 1..=5u64 {
        let ctx = position.context(line);
        producer
            .produce(&ctx, format!("line {}", line).as_bytes(), b"", &BTreeMap::new())
            .await
            .unwrap();
    }
    // Lines 1-4 went out in two threshold flushes; line 5 goes out on close.
    assert_eq!(writer.published_batches().len(), 2);

    producer.close().await.unwrap();
    drop(producer);

    let saved = persister.await.unwrap().unwrap();
    assert_eq!(saved, 5);
    assert_eq!(writer.published_values().len(), 5);
}
