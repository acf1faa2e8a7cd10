//! Runtime configuration from environment variables

use crate::runtime::retry::ExponentialBackoff;
use crate::sink::{BackendType, TableRef};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings shared by the ingestion and heart rate watch binaries
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Log file the bikes' lines are appended to
    pub stream_path: PathBuf,
    pub from_beginning: bool,

    pub backend: BackendType,
    /// SQLite database file
    pub db_path: PathBuf,
    /// Output directory for the JSONL backend
    pub jsonl_dir: PathBuf,
    pub schema: String,
    pub table: String,

    pub poll_timeout_ms: u64,

    pub sink_retry_initial_secs: u64,
    pub sink_retry_max_secs: u64,
    pub sink_max_retries: u32,

    pub notify_webhook_url: Option<String>,
    pub alert_webhook_url: Option<String>,
    pub enable_anomaly_watcher: bool,

    pub rust_log: String,
}

impl IngestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RIDELOG_STREAM_PATH` (required)
    /// - `RIDELOG_FROM_BEGINNING` (default: false)
    /// - `RIDELOG_BACKEND` (default: sqlite, or jsonl)
    /// - `RIDELOG_DB_PATH` (default: data/ridelog.db)
    /// - `RIDELOG_JSONL_DIR` (default: data/jsonl)
    /// - `RIDELOG_SCHEMA` (default: ride_staging)
    /// - `RIDELOG_TABLE` (default: ride_logs)
    /// - `POLL_TIMEOUT_MS` (default: 1000)
    /// - `SINK_RETRY_INITIAL_SECS` (default: 1)
    /// - `SINK_RETRY_MAX_SECS` (default: 60)
    /// - `SINK_MAX_RETRIES` (default: 5)
    /// - `NOTIFY_WEBHOOK_URL`, `ALERT_WEBHOOK_URL` (optional)
    /// - `ENABLE_ANOMALY_WATCHER` (default: true)
    /// - `RUST_LOG` (default: info)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let stream_path = lookup("RIDELOG_STREAM_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingVariable("RIDELOG_STREAM_PATH".to_string()))?;

        let backend = match lookup("RIDELOG_BACKEND") {
            Some(raw) => BackendType::from_str(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "RIDELOG_BACKEND must be sqlite or jsonl, got '{}'",
                    raw
                ))
            })?,
            None => BackendType::Sqlite,
        };

        let schema = lookup("RIDELOG_SCHEMA").unwrap_or_else(|| "ride_staging".to_string());
        let table = lookup("RIDELOG_TABLE").unwrap_or_else(|| "ride_logs".to_string());
        validate_identifier("RIDELOG_SCHEMA", &schema)?;
        validate_identifier("RIDELOG_TABLE", &table)?;

        let poll_timeout_ms = parsed(&lookup, "POLL_TIMEOUT_MS", 1_000u64);
        if poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let sink_retry_initial_secs = parsed(&lookup, "SINK_RETRY_INITIAL_SECS", 1u64);
        let sink_retry_max_secs = parsed(&lookup, "SINK_RETRY_MAX_SECS", 60u64);
        if sink_retry_max_secs < sink_retry_initial_secs {
            return Err(ConfigError::InvalidValue(format!(
                "SINK_RETRY_MAX_SECS ({}) is below SINK_RETRY_INITIAL_SECS ({})",
                sink_retry_max_secs, sink_retry_initial_secs
            )));
        }

        let notify_webhook_url = webhook_url(&lookup, "NOTIFY_WEBHOOK_URL")?;
        let alert_webhook_url = webhook_url(&lookup, "ALERT_WEBHOOK_URL")?;

        Ok(Self {
            stream_path,
            from_beginning: parsed_bool(&lookup, "RIDELOG_FROM_BEGINNING", false),
            backend,
            db_path: lookup("RIDELOG_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/ridelog.db")),
            jsonl_dir: lookup("RIDELOG_JSONL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/jsonl")),
            schema,
            table,
            poll_timeout_ms,
            sink_retry_initial_secs,
            sink_retry_max_secs,
            sink_max_retries: parsed(&lookup, "SINK_MAX_RETRIES", 5u32),
            notify_webhook_url,
            alert_webhook_url,
            enable_anomaly_watcher: parsed_bool(&lookup, "ENABLE_ANOMALY_WATCHER", true),
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// `--backend sqlite|jsonl` on the command line wins over `RIDELOG_BACKEND`
    pub fn apply_backend_arg(&mut self, args: &[String]) {
        if let Some(idx) = args.iter().position(|x| x == "--backend") {
            match args.get(idx + 1).and_then(|s| BackendType::from_str(s)) {
                Some(backend) => self.backend = backend,
                None => log::warn!("Ignoring unknown --backend value, keeping {}", self.backend.as_str()),
            }
        }
    }

    pub fn rows_table(&self) -> TableRef {
        TableRef::new(self.schema.clone(), self.table.clone())
    }

    /// Database file or output directory, depending on the backend
    pub fn sink_path(&self) -> &PathBuf {
        match self.backend {
            BackendType::Sqlite => &self.db_path,
            BackendType::Jsonl => &self.jsonl_dir,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn sink_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_secs(self.sink_retry_initial_secs),
            Duration::from_secs(self.sink_retry_max_secs),
            self.sink_max_retries,
        )
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn parsed_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    lookup(key)
        .and_then(|s| s.trim().to_lowercase().parse().ok())
        .unwrap_or(default)
}

fn webhook_url(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<String>, ConfigError> {
    match lookup(key).filter(|s| !s.trim().is_empty()) {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => Ok(Some(url)),
        Some(_) => Err(ConfigError::InvalidValue(format!(
            "{} must start with http:// or https://",
            key
        ))),
        None => Ok(None),
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed
fn validate_identifier(key: &str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(format!(
            "{} must be a plain identifier, got '{}'",
            key, value
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<IngestConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[("RIDELOG_STREAM_PATH", "/tmp/bike.log")]).unwrap();

        assert_eq!(config.stream_path, PathBuf::from("/tmp/bike.log"));
        assert!(!config.from_beginning);
        assert_eq!(config.backend, BackendType::Sqlite);
        assert_eq!(config.db_path, PathBuf::from("data/ridelog.db"));
        assert_eq!(config.rows_table(), TableRef::new("ride_staging", "ride_logs"));
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
        assert_eq!(config.sink_max_retries, 5);
        assert!(config.notify_webhook_url.is_none());
        assert!(config.enable_anomaly_watcher);
        assert_eq!(config.rust_log, "info");
    }

    #[test]
    fn test_custom_config() {
        let config = config_from(&[
            ("RIDELOG_STREAM_PATH", "/var/log/bikes.log"),
            ("RIDELOG_FROM_BEGINNING", "TRUE"),
            ("RIDELOG_BACKEND", "jsonl"),
            ("RIDELOG_JSONL_DIR", "/tmp/out"),
            ("RIDELOG_SCHEMA", "prod"),
            ("POLL_TIMEOUT_MS", "250"),
            ("SINK_MAX_RETRIES", "not-a-number"),
            ("NOTIFY_WEBHOOK_URL", "https://hooks.example.com/rides"),
            ("ENABLE_ANOMALY_WATCHER", "false"),
        ])
        .unwrap();

        assert!(config.from_beginning);
        assert_eq!(config.backend, BackendType::Jsonl);
        assert_eq!(config.sink_path(), &PathBuf::from("/tmp/out"));
        assert_eq!(config.rows_table().qualified(), "prod_ride_logs");
        assert_eq!(config.poll_timeout_ms, 250);
        assert_eq!(config.sink_max_retries, 5);
        assert_eq!(
            config.notify_webhook_url.as_deref(),
            Some("https://hooks.example.com/rides")
        );
        assert!(!config.enable_anomaly_watcher);
    }

    #[test]
    fn test_missing_stream_path() {
        assert!(matches!(
            config_from(&[]),
            Err(ConfigError::MissingVariable(var)) if var == "RIDELOG_STREAM_PATH"
        ));
    }

    #[test]
    fn test_invalid_values() {
        let base = ("RIDELOG_STREAM_PATH", "/tmp/bike.log");
        assert!(config_from(&[base, ("RIDELOG_BACKEND", "parquet")]).is_err());
        assert!(config_from(&[base, ("RIDELOG_TABLE", "logs; DROP TABLE x")]).is_err());
        assert!(config_from(&[base, ("ALERT_WEBHOOK_URL", "ftp://x")]).is_err());
        assert!(config_from(&[base, ("POLL_TIMEOUT_MS", "0")]).is_err());
        assert!(config_from(&[
            base,
            ("SINK_RETRY_INITIAL_SECS", "30"),
            ("SINK_RETRY_MAX_SECS", "10")
        ])
        .is_err());
    }

    #[test]
    fn test_backend_arg_overrides_env() {
        let mut config = config_from(&[("RIDELOG_STREAM_PATH", "/tmp/bike.log")]).unwrap();
        let args: Vec<String> = ["ride_ingest", "--backend", "jsonl"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        config.apply_backend_arg(&args);
        assert_eq!(config.backend, BackendType::Jsonl);
    }
}
