//! JSONL commit sink - one append-only file per table
//!
//! Each ride is serialized completely before the first byte is written. The
//! rides and riders files are appended first and the rows file last, since the
//! rows file is where the checkpoint is read from. On any write error every
//! file is cut back to its length before the call, so a retried ride is never
//! appended twice.

use super::commit_sink::{CommitSink, SinkError, TableRef};
use crate::ride_core::batch::RideBatch;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct RideIdOnly {
    ride_id: i64,
}

#[derive(Deserialize)]
struct UserIdOnly {
    user_id: Option<i64>,
}

struct OpenFiles {
    rows: File,
    rides: File,
    riders: File,
}

impl OpenFiles {
    fn lengths(&self) -> std::io::Result<[u64; 3]> {
        Ok([
            self.rows.metadata()?.len(),
            self.rides.metadata()?.len(),
            self.riders.metadata()?.len(),
        ])
    }

    fn append(&mut self, rows: &str, summary: &str, rider: Option<&str>) -> std::io::Result<()> {
        self.rides.write_all(summary.as_bytes())?;
        if let Some(rider) = rider {
            self.riders.write_all(rider.as_bytes())?;
        }
        self.rows.write_all(rows.as_bytes())?;
        self.rows.flush()
    }

    fn truncate_to(&self, lengths: [u64; 3]) {
        let files = [&self.rows, &self.rides, &self.riders];
        for (file, len) in files.into_iter().zip(lengths) {
            if let Err(e) = file.set_len(len) {
                log::warn!("⚠️  Could not roll back partial JSONL write: {}", e);
            }
        }
    }
}

pub struct JsonlCommitSink {
    base_path: PathBuf,
    rows_table: TableRef,
    files: Option<OpenFiles>,
    known_riders: HashSet<i64>,
}

fn table_path(base_path: &Path, table: &TableRef) -> PathBuf {
    base_path.join(format!("{}.jsonl", table.qualified()))
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Deserialize every parseable line, skipping torn or foreign lines
fn scan<T: for<'de> Deserialize<'de>>(path: &Path) -> std::io::Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        match serde_json::from_str::<T>(&line) {
            Ok(value) => out.push(value),
            Err(_) if line.trim().is_empty() => {}
            Err(e) => log::debug!("Skipping unreadable line in {}: {}", path.display(), e),
        }
    }
    Ok(out)
}

impl JsonlCommitSink {
    pub fn new(base_path: impl Into<PathBuf>, rows_table: TableRef) -> Result<Self, SinkError> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;

        let rows_path = table_path(&base_path, &rows_table);
        let rides_path = table_path(&base_path, &rows_table.sibling("rides"));
        let riders_path = table_path(&base_path, &rows_table.sibling("riders"));

        let known_riders = scan::<UserIdOnly>(&riders_path)?
            .into_iter()
            .filter_map(|r| r.user_id)
            .collect();

        let files = OpenFiles {
            rows: open_append(&rows_path)?,
            rides: open_append(&rides_path)?,
            riders: open_append(&riders_path)?,
        };

        log::info!("📝 Writing ride rows to: {}", rows_path.display());

        Ok(Self {
            base_path,
            rows_table,
            files: Some(files),
            known_riders,
        })
    }
}

#[async_trait]
impl CommitSink for JsonlCommitSink {
    async fn write_batch(&mut self, batch: &RideBatch) -> Result<usize, SinkError> {
        let files = self.files.as_mut().ok_or(SinkError::Closed)?;

        let mut rows = String::new();
        for row in &batch.rows {
            rows.push_str(&serde_json::to_string(row)?);
            rows.push('\n');
        }
        let summary = format!("{}\n", serde_json::to_string(&batch.summary)?);

        let new_rider = match &batch.rider {
            Some(rider) => match rider.user_id {
                Some(id) if !self.known_riders.contains(&id) => {
                    let mut value = serde_json::to_value(rider)?;
                    if let (Some(fields), Some(age)) = (value.as_object_mut(), batch.rider_age) {
                        fields.insert("age".to_string(), age.into());
                    }
                    Some((id, format!("{}\n", value)))
                }
                _ => None,
            },
            None => None,
        };

        let lengths = files.lengths()?;
        if let Err(e) = files.append(&rows, &summary, new_rider.as_ref().map(|(_, json)| json.as_str())) {
            files.truncate_to(lengths);
            return Err(e.into());
        }

        if let Some((id, _)) = new_rider {
            self.known_riders.insert(id);
        }

        Ok(batch.row_count())
    }

    async fn max_committed_ride_id(&self, table: &TableRef) -> Result<i64, SinkError> {
        let path = table_path(&self.base_path, table);
        let max = scan::<RideIdOnly>(&path)?
            .into_iter()
            .map(|r| r.ride_id)
            .max()
            .unwrap_or(0);
        Ok(max)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        if let Some(mut files) = self.files.take() {
            files.rows.flush()?;
            files.rides.flush()?;
            files.riders.flush()?;
            log::info!("JSONL sink for {} closed", self.rows_table);
        }
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "JSONL"
    }
}
