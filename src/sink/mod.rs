//! Durable storage for committed rides
//!
//! Routes batches to either the SQLite or the JSONL backend based on
//! configuration. Both read back the recovery checkpoint from their own rows.

pub mod commit_sink;
pub mod jsonl_sink;
pub mod sqlite_pragma;
pub mod sqlite_sink;

pub use commit_sink::{CommitSink, SinkError, TableRef};
pub use jsonl_sink::JsonlCommitSink;
pub use sqlite_sink::SqliteCommitSink;

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Sqlite,
    Jsonl,
}

impl BackendType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" => Some(BackendType::Sqlite),
            "jsonl" => Some(BackendType::Jsonl),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Sqlite => "sqlite",
            BackendType::Jsonl => "jsonl",
        }
    }
}

/// Open the configured backend. `path` is the database file for SQLite and the
/// output directory for JSONL.
pub fn open_commit_sink(
    backend: BackendType,
    path: &Path,
    rows_table: TableRef,
) -> Result<Box<dyn CommitSink>, SinkError> {
    match backend {
        BackendType::Sqlite => Ok(Box::new(SqliteCommitSink::new(path, rows_table)?)),
        BackendType::Jsonl => Ok(Box::new(JsonlCommitSink::new(path, rows_table)?)),
    }
}
