//! Heart rate watch - alerts riders whose heart rate leaves the healthy band
//!
//! Standalone reader of the bike log stream; shares nothing with ride ingestion.
//!
//! Environment variables: `RIDELOG_STREAM_PATH`, `RIDELOG_FROM_BEGINNING`,
//! `POLL_TIMEOUT_MS`, `ALERT_WEBHOOK_URL`, `RUST_LOG`.

use dotenv::dotenv;
use log::{error, info};
use ridelog::notify::alerter_for;
use ridelog::ride_core::AnomalyWatcher;
use ridelog::runtime::{run_anomaly_watch, IngestConfig};
use ridelog::stream::TailSource;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let config = IngestConfig::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.rust_log))
        .target(env_logger::Target::Stderr)
        .init();

    info!("💓 Heart Rate Watch");
    info!("   ├─ Stream: {}", config.stream_path.display());
    info!("   ├─ Poll timeout: {}ms", config.poll_timeout_ms);
    info!(
        "   └─ Alerts: {}",
        config.alert_webhook_url.as_deref().unwrap_or("log only")
    );

    let mut source = TailSource::open(&config.stream_path, config.from_beginning).await?;
    let mut watcher = AnomalyWatcher::new(alerter_for(config.alert_webhook_url.as_deref()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_timeout = config.poll_timeout();
    let mut task = tokio::spawn(async move {
        run_anomaly_watch(&mut source, &mut watcher, poll_timeout, shutdown_rx).await
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    let finished_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
                Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
            }
            None
        }
        finished = &mut task => Some(finished),
    };

    let _ = shutdown_tx.send(true);
    let result = match finished_early {
        Some(result) => result,
        None => task.await,
    };

    let stats = result??;
    info!("✅ Heart rate watch stopped: {} alerts sent", stats.alerts_sent);
    Ok(())
}
