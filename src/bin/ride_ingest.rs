//! Ride Ingest - commits complete rides from the bike log stream
//!
//! Recovers ride numbering from the committed rows, tails the log file and
//! commits each finished ride. The heart rate watch runs alongside on its own
//! reader unless disabled.
//!
//! Usage:
//!   ride_ingest [--backend sqlite|jsonl]
//!
//! Environment variables: see `IngestConfig::from_env`.

use dotenv::dotenv;
use log::{error, info, warn};
use ridelog::notify::{alerter_for, notifier_for};
use ridelog::ride_core::{AnomalyWatcher, RecoveryCoordinator, RideAssembler};
use ridelog::runtime::{run_anomaly_watch, run_ride_ingestion, IngestConfig};
use ridelog::sink::open_commit_sink;
use ridelog::stream::TailSource;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let mut config = IngestConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    config.apply_backend_arg(&args);

    let rows_table = config.rows_table();

    info!("🚴 Ride Ingest");
    info!("   ├─ Stream: {}", config.stream_path.display());
    info!("   ├─ From beginning: {}", config.from_beginning);
    info!("   ├─ Backend: {} ({})", config.backend.as_str(), config.sink_path().display());
    info!("   ├─ Table: {}", rows_table);
    info!("   ├─ Poll timeout: {}ms", config.poll_timeout_ms);
    info!(
        "   ├─ Sink retries: {} ({}s → {}s)",
        config.sink_max_retries, config.sink_retry_initial_secs, config.sink_retry_max_secs
    );
    info!(
        "   ├─ Notifications: {}",
        config.notify_webhook_url.as_deref().unwrap_or("log only")
    );
    info!("   └─ Heart rate watch: {}", config.enable_anomaly_watcher);

    let sink = open_commit_sink(config.backend, config.sink_path(), rows_table.clone())?;
    let plan = RecoveryCoordinator::new(rows_table).initialize(sink.as_ref()).await?;

    let notifier = notifier_for(config.notify_webhook_url.as_deref());
    let mut assembler = RideAssembler::resume(sink, notifier, &plan);

    // Both readers are opened before any task starts
    let opened = TailSource::open_readers(
        &config.stream_path,
        config.from_beginning,
        config.enable_anomaly_watcher,
    )
    .await;
    let (mut source, watch_source) = match opened {
        Ok(readers) => readers,
        Err(e) => {
            close_sink(&mut assembler).await;
            return Err(e.into());
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backoff = config.sink_backoff();
    let poll_timeout = config.poll_timeout();
    let ingest_shutdown = shutdown_rx.clone();
    let mut ingest_task = tokio::spawn(async move {
        let result =
            run_ride_ingestion(&mut source, &mut assembler, backoff, poll_timeout, ingest_shutdown)
                .await;
        close_sink(&mut assembler).await;
        result
    });
    info!("✅ Ingestion task spawned");

    let watch_task = if let Some(mut watch_source) = watch_source {
        let mut watcher = AnomalyWatcher::new(alerter_for(config.alert_webhook_url.as_deref()));
        let watch_shutdown = shutdown_rx.clone();
        info!("✅ Heart rate watch task spawned");
        Some(tokio::spawn(async move {
            run_anomaly_watch(&mut watch_source, &mut watcher, poll_timeout, watch_shutdown).await
        }))
    } else {
        None
    };

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let finished_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            None
        }
        finished = &mut ingest_task => Some(finished),
    };

    let _ = shutdown_tx.send(true);

    let ingest_result = match finished_early {
        Some(result) => result,
        None => ingest_task.await,
    };

    if let Some(task) = watch_task {
        match task.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("⚠️  Heart rate watch ended with error: {}", e),
            Err(e) => warn!("⚠️  Heart rate watch task failed: {}", e),
        }
    }

    let stats = ingest_result??;
    info!(
        "✅ Ride ingest stopped: {} rides committed ({} rows), {} discarded",
        stats.rides_committed, stats.rows_committed, stats.rides_discarded
    );
    Ok(())
}

async fn close_sink(assembler: &mut RideAssembler) {
    if let Err(e) = assembler.close().await {
        error!("❌ Failed to close commit sink: {}", e);
    }
}
