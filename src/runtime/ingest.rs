//! Ride ingestion loop - polls a line source and drives the assembler
//!
//! One record is processed per iteration. A failed commit is retried by
//! re-delivering the same line under exponential backoff; once the budget is
//! spent the loop releases the source and returns the error so the process can
//! halt for external supervision.

use super::retry::ExponentialBackoff;
use crate::ride_core::assembler::RideAssembler;
use crate::ride_core::parser::classify;
use crate::sink::SinkError;
use crate::stream::{StreamError, StreamSource};
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug)]
pub enum IngestError {
    Stream(StreamError),
    /// Commit still failing after the retry budget, or shutdown requested mid-retry
    Sink { ride_id: Option<i64>, source: SinkError },
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Stream(e) => write!(f, "Stream error: {}", e),
            IngestError::Sink { ride_id, source } => match ride_id {
                Some(id) => write!(f, "Commit of ride {} failed: {}", id, source),
                None => write!(f, "Commit failed: {}", source),
            },
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StreamError> for IngestError {
    fn from(err: StreamError) -> Self {
        IngestError::Stream(err)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub lines_read: u64,
    pub rides_committed: u64,
    pub rides_discarded: u64,
    pub rows_committed: u64,
    pub commit_retries: u64,
}

/// Run until `shutdown` flips to true or an unrecoverable error occurs.
///
/// The source is always closed before returning. The assembler (and its sink)
/// stay with the caller.
pub async fn run_ride_ingestion(
    source: &mut dyn StreamSource,
    assembler: &mut RideAssembler,
    mut backoff: ExponentialBackoff,
    poll_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<IngestStats, IngestError> {
    log::info!("🚀 Starting ride ingestion");
    log::info!("   ├─ Source: {}", source.describe());
    log::info!("   ├─ Poll timeout: {}ms", poll_timeout.as_millis());
    log::info!("   └─ Waiting for rides...");

    let result = ingest_loop(source, assembler, &mut backoff, poll_timeout, &shutdown).await;

    if let Err(e) = source.close().await {
        log::warn!("⚠️  Failed to close source: {}", e);
    }

    match &result {
        Ok(stats) => log::info!(
            "✅ Ride ingestion stopped: {} lines, {} rides committed, {} discarded",
            stats.lines_read,
            stats.rides_committed,
            stats.rides_discarded
        ),
        Err(e) => log::error!("❌ Ride ingestion halted: {}", e),
    }
    result
}

async fn ingest_loop(
    source: &mut dyn StreamSource,
    assembler: &mut RideAssembler,
    backoff: &mut ExponentialBackoff,
    poll_timeout: Duration,
    shutdown: &watch::Receiver<bool>,
) -> Result<IngestStats, IngestError> {
    let mut stats = IngestStats::default();
    let mut window_lines = 0u64;
    let mut last_log_time = Instant::now();

    while !*shutdown.borrow() {
        let Some(line) = source.poll(poll_timeout).await? else {
            continue;
        };
        stats.lines_read += 1;
        window_lines += 1;

        deliver(&line, assembler, backoff, shutdown, &mut stats).await?;

        // Log throughput every 60 seconds
        if last_log_time.elapsed().as_secs() >= 60 {
            log::info!(
                "📊 Ingestion: {} lines in last {}s | ride open: {:?} ({} records buffered)",
                window_lines,
                last_log_time.elapsed().as_secs(),
                assembler.current_ride_id(),
                assembler.buffered_records()
            );
            window_lines = 0;
            last_log_time = Instant::now();
        }
    }

    let assembled = assembler.stats();
    stats.rides_committed = assembled.rides_committed;
    stats.rides_discarded = assembled.rides_discarded;
    stats.rows_committed = assembled.rows_committed;
    Ok(stats)
}

/// Hand one line to the assembler, re-delivering it while the sink fails
async fn deliver(
    line: &str,
    assembler: &mut RideAssembler,
    backoff: &mut ExponentialBackoff,
    shutdown: &watch::Receiver<bool>,
    stats: &mut IngestStats,
) -> Result<(), IngestError> {
    loop {
        let record = classify(line);
        let err = match assembler.process(&record).await {
            Ok(()) => {
                backoff.reset();
                return Ok(());
            }
            Err(e) => e,
        };

        let ride_id = assembler.current_ride_id();
        log::error!("❌ Failed to commit ride {:?}: {}", ride_id, err);

        if *shutdown.borrow() {
            log::warn!("⚠️  Shutdown requested while ride {:?} is uncommitted", ride_id);
            return Err(IngestError::Sink { ride_id, source: err });
        }
        if backoff.sleep().await.is_err() {
            return Err(IngestError::Sink { ride_id, source: err });
        }
        stats.commit_retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use crate::ride_core::batch::RideBatch;
    use crate::sink::{CommitSink, TableRef};
    use crate::stream::ChannelSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Fails the first `failures` writes, then records ride ids
    #[derive(Clone, Default)]
    struct FlakySink {
        failures: Arc<AtomicUsize>,
        committed: Arc<Mutex<Vec<i64>>>,
    }

    #[async_trait]
    impl CommitSink for FlakySink {
        async fn write_batch(&mut self, batch: &RideBatch) -> Result<usize, SinkError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SinkError::Database("database is locked".to_string()));
            }
            self.committed.lock().unwrap().push(batch.ride_id);
            Ok(batch.row_count())
        }

        async fn max_committed_ride_id(&self, _table: &TableRef) -> Result<i64, SinkError> {
            Ok(0)
        }

        async fn close(&mut self) -> Result<(), SinkError> {
            Ok(())
        }

        fn backend_type(&self) -> &'static str {
            "Flaky"
        }
    }

    fn fast_backoff(retries: u32) -> ExponentialBackoff {
        ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(5), retries)
    }

    async fn send_ride(tx: &tokio::sync::mpsc::Sender<String>) {
        for line in ["new ride", "[INFO]: Telemetry - hrt = 101", "beginning of main"] {
            tx.send(line.to_string()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_retry_then_commit() {
        let sink = FlakySink::default();
        sink.failures.store(2, Ordering::SeqCst);
        let mut assembler = RideAssembler::new(Box::new(sink.clone()), Arc::new(LogNotifier), 0);
        let (tx, mut source) = ChannelSource::pair(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        send_ride(&tx).await;
        let committed = sink.committed.clone();
        let stopper = tokio::spawn(async move {
            while committed.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            stop_tx.send(true).unwrap();
        });

        let stats = run_ride_ingestion(
            &mut source,
            &mut assembler,
            fast_backoff(5),
            Duration::from_millis(20),
            stop_rx,
        )
        .await
        .unwrap();
        stopper.await.unwrap();

        assert_eq!(*sink.committed.lock().unwrap(), vec![1]);
        assert_eq!(stats.lines_read, 3);
        assert_eq!(stats.commit_retries, 2);
        assert_eq!(stats.rides_committed, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_halts() {
        let sink = FlakySink::default();
        sink.failures.store(10, Ordering::SeqCst);
        let mut assembler = RideAssembler::new(Box::new(sink.clone()), Arc::new(LogNotifier), 4);
        let (tx, mut source) = ChannelSource::pair(16);
        let (_stop_tx, stop_rx) = watch::channel(false);

        send_ride(&tx).await;
        let result = run_ride_ingestion(
            &mut source,
            &mut assembler,
            fast_backoff(2),
            Duration::from_millis(20),
            stop_rx,
        )
        .await;

        match result {
            Err(IngestError::Sink { ride_id, .. }) => assert_eq!(ride_id, Some(5)),
            other => panic!("expected sink error, got {:?}", other),
        }
        assert!(sink.committed.lock().unwrap().is_empty());
        // Source released on the way out
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_disconnected_source_is_an_error() {
        let mut assembler =
            RideAssembler::new(Box::new(FlakySink::default()), Arc::new(LogNotifier), 0);
        let (tx, mut source) = ChannelSource::pair(1);
        drop(tx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let result = run_ride_ingestion(
            &mut source,
            &mut assembler,
            fast_backoff(1),
            Duration::from_millis(10),
            stop_rx,
        )
        .await;
        assert!(matches!(result, Err(IngestError::Stream(StreamError::Disconnected))));
    }

    #[tokio::test]
    async fn test_shutdown_between_polls() {
        let mut assembler =
            RideAssembler::new(Box::new(FlakySink::default()), Arc::new(LogNotifier), 0);
        let (_tx, mut source) = ChannelSource::pair(1);
        let (stop_tx, stop_rx) = watch::channel(false);
        stop_tx.send(true).unwrap();

        let stats = run_ride_ingestion(
            &mut source,
            &mut assembler,
            fast_backoff(1),
            Duration::from_millis(10),
            stop_rx,
        )
        .await
        .unwrap();
        assert_eq!(stats, IngestStats::default());
    }
}
