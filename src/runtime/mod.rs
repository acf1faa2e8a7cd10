//! Driving loops, configuration and retry policy

pub mod config;
pub mod ingest;
pub mod retry;
pub mod watch;

pub use config::{ConfigError, IngestConfig};
pub use ingest::{run_ride_ingestion, IngestError, IngestStats};
pub use retry::{ExponentialBackoff, MaxRetriesExceeded};
pub use watch::{run_anomaly_watch, WatchStats};
