use anyhow::Context;
use clap::Parser;
use kafka_feed_publisher::checkpoint::CheckpointManager;
use kafka_feed_publisher::feed::{pump_lines, LinePosition};
use kafka_feed_publisher::kafka::MessagePool;
use kafka_feed_publisher::{CheckpointCommit, Config, Error, Producer};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-feed-publisher")]
#[command(about = "Batch newline-delimited JSON records from stdin into Kafka", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(long, help = "Ignore any saved checkpoint and start from the first line")]
    reset_checkpoint: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Starting kafka-feed-publisher");
    info!("Loading configuration from {:?}", args.config);

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;

    info!(
        kafka_brokers = ?config.kafka.brokers,
        kafka_topic = %config.kafka.topic,
        batch_size = config.kafka.producer_batch_size,
        batch_bytes = config.kafka.producer_batch_bytes,
        batch_ticker_ms = config.kafka.producer_batch_ticker_ms,
        secure = config.kafka.secure_connection,
        checkpoint_file = ?config.checkpoint.file,
        "Configuration summary"
    );

    let manager = CheckpointManager::new(&config.checkpoint.file);
    if args.reset_checkpoint {
        manager.delete().await?;
    }
    let resume_after = manager
        .load()
        .await?
        .map(|checkpoint| checkpoint.position)
        .unwrap_or(0);

    let position = LinePosition::starting_at(resume_after);
    let (committed_tx, committed_rx) = watch::channel(resume_after);
    let persister = tokio::spawn(async move { manager.persist_from(committed_rx).await });

    let commit_position = position.clone();
    let checkpoint: Arc<dyn CheckpointCommit> = Arc::new(move || {
        // send_if_modified never blocks; the persister task does the IO.
        let acked = commit_position.acked();
        committed_tx.send_if_modified(|committed| {
            if acked > *committed {
                *committed = acked;
                true
            } else {
                false
            }
        });
    });

    let producer = Producer::new(
        &config.kafka,
        Arc::new(MessagePool::new(config.checkpoint.pool_capacity)),
        checkpoint,
    )
    .context("failed to start producer")?;

    // Ctrl+C only raises the flag; the feed stops between records so a
    // flush that is already running completes before close.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let outcome = pump_lines(
        BufReader::new(tokio::io::stdin()),
        &producer,
        &position,
        resume_after,
        shutdown_rx,
    )
    .await;

    match &outcome {
        Ok(lines) => info!(lines, "End of input"),
        Err(Error::Shutdown) => {}
        Err(e) => error!(error = %e, "Feed stopped"),
    }

    let metrics = producer.metrics();
    info!(
        connector_latency_ms = metrics.connector_latency_ms,
        batch_produce_latency_ms = metrics.batch_produce_latency_ms,
        "Final metrics"
    );

    let closed = producer.close().await;
    drop(producer);

    let saved = persister.await.context("checkpoint task panicked")??;
    info!(position = saved, "Checkpoint saved");

    closed.context("failed to close producer")?;
    match outcome {
        Ok(_) | Err(Error::Shutdown) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_feed_publisher=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_feed_publisher=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
