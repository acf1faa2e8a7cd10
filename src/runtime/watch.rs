//! Heart rate watch loop - its own read of the stream, no shared state with ingestion

use crate::ride_core::anomaly::AnomalyWatcher;
use crate::ride_core::parser::classify;
use crate::stream::{StreamError, StreamSource};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchStats {
    pub lines_read: u64,
    pub alerts_sent: u64,
}

/// Run until `shutdown` flips to true or the source fails. The source is
/// closed before returning.
pub async fn run_anomaly_watch(
    source: &mut dyn StreamSource,
    watcher: &mut AnomalyWatcher,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<WatchStats, StreamError> {
    log::info!("💓 Starting heart rate watch on {}", source.describe());

    let mut stats = WatchStats::default();
    let result = loop {
        if *shutdown.borrow() {
            break Ok(());
        }
        match source.poll(poll_timeout).await {
            Ok(Some(line)) => {
                stats.lines_read += 1;
                watcher.observe(&classify(&line));
            }
            Ok(None) => {}
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = source.close().await {
        log::warn!("⚠️  Failed to close source: {}", e);
    }

    stats.alerts_sent = watcher.alerts_sent();
    match result {
        Ok(()) => {
            log::info!(
                "✅ Heart rate watch stopped: {} lines, {} alerts",
                stats.lines_read,
                stats.alerts_sent
            );
            Ok(stats)
        }
        Err(e) => {
            log::error!("❌ Heart rate watch halted: {}", e);
            Err(e)
        }
    }
}
