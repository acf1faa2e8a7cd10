//! Commit sink trait for completed rides
//!
//! Defines the interface for durably appending ride batches and for reading back
//! the recovery checkpoint.

use crate::ride_core::batch::RideBatch;
use async_trait::async_trait;

#[derive(Debug)]
pub enum SinkError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    Closed,
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        SinkError::Database(err.to_string())
    }
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Io(e) => write!(f, "IO error: {}", e),
            SinkError::Serialization(e) => write!(f, "Serialization error: {}", e),
            SinkError::Database(e) => write!(f, "Database error: {}", e),
            SinkError::Closed => write!(f, "Sink already closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Schema-qualified table holding committed ride rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Physical table name. SQLite has no schemas, so the schema becomes a prefix.
    pub fn qualified(&self) -> String {
        format!("{}_{}", self.schema, self.table)
    }

    /// Sibling table in the same schema
    pub fn sibling(&self, table: &str) -> TableRef {
        TableRef::new(self.schema.clone(), table)
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[async_trait]
pub trait CommitSink: Send + Sync {
    /// Append every row of a ride atomically. Returns the number of rows written.
    async fn write_batch(&mut self, batch: &RideBatch) -> Result<usize, SinkError>;

    /// Highest ride id present in `table`, 0 when the table does not exist yet
    async fn max_committed_ride_id(&self, table: &TableRef) -> Result<i64, SinkError>;

    /// Release the underlying connection
    async fn close(&mut self) -> Result<(), SinkError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}
