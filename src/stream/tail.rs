//! Tail a growing log file with rotation detection

use super::{unwrap_envelope, StreamError, StreamSource};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailSource {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    /// Bytes of a line whose newline has not arrived yet
    pending: Vec<u8>,
    poll_interval: Duration,
    closed: bool,
}

impl TailSource {
    /// Open `path`. Starts at the end of the file unless `from_beginning`.
    pub async fn open(path: impl Into<PathBuf>, from_beginning: bool) -> Result<Self, StreamError> {
        let mut source = Self {
            path: path.into(),
            file: None,
            inode: None,
            pending: Vec::new(),
            poll_interval: Duration::from_millis(100),
            closed: false,
        };
        source.reopen(!from_beginning).await?;

        log::info!(
            "📖 Started tailing: {} ({})",
            source.path.display(),
            if from_beginning { "from beginning" } else { "new lines only" }
        );
        Ok(source)
    }

    /// Open a primary reader and, when `with_second`, an independent second
    /// reader over the same file. Nothing stays open if either fails.
    pub async fn open_readers(
        path: impl Into<PathBuf>,
        from_beginning: bool,
        with_second: bool,
    ) -> Result<(Self, Option<Self>), StreamError> {
        let path = path.into();
        let mut primary = Self::open(&path, from_beginning).await?;
        if !with_second {
            return Ok((primary, None));
        }

        match Self::open(&path, from_beginning).await {
            Ok(second) => Ok((primary, Some(second))),
            Err(e) => {
                primary.close().await?;
                Err(e)
            }
        }
    }

    async fn reopen(&mut self, seek_to_end: bool) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;

        #[cfg(unix)]
        {
            let metadata = file.metadata().await?;
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        if seek_to_end {
            reader.seek(SeekFrom::End(0)).await?;
        }
        self.file = Some(reader);
        self.pending.clear();
        Ok(())
    }

    /// Wait for the next complete, non-empty line.
    ///
    /// Partial reads accumulate in `pending`, so dropping this future on a
    /// poll timeout loses nothing.
    async fn next_line(&mut self) -> Result<String, StreamError> {
        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                self.reopen(false).await?;
            }

            let reader = self.file.as_mut().ok_or(StreamError::Closed)?;
            let read = reader.read_until(b'\n', &mut self.pending).await?;

            if read == 0 || self.pending.last() != Some(&b'\n') {
                sleep(self.poll_interval).await;
                continue;
            }

            let line = String::from_utf8_lossy(&self.pending).trim().to_string();
            self.pending.clear();
            if !line.is_empty() {
                return Ok(unwrap_envelope(&line));
            }
        }
    }

    /// Detect if the file has been replaced (inode changed) or truncated
    async fn detect_rotation(&mut self) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            // Mid-rotation: keep draining the old handle until the new file appears
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        #[cfg(unix)]
        {
            if self.inode.map_or(false, |old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        match self.file.as_mut() {
            Some(reader) => {
                let position = reader.stream_position().await?;
                Ok(metadata.len() < position)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl StreamSource for TailSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<String>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        match tokio::time::timeout(timeout, self.next_line()).await {
            Ok(line) => line.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.file = None;
        self.closed = true;
        log::info!("Stopped tailing: {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn append(path: &std::path::Path, bytes: &[u8]) {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(bytes).await.unwrap();
        file.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_tail_only_new_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("bike.log");
        tokio::fs::write(&file_path, b"old line\n").await.unwrap();

        let mut source = TailSource::open(&file_path, false).await.unwrap();
        append(&file_path, b"new ride\n").await;

        let line = source.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(line.as_deref(), Some("new ride"));
    }

    #[tokio::test]
    async fn test_open_readers_read_independently() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("bike.log");
        tokio::fs::write(&file_path, b"new ride\n").await.unwrap();

        let (mut primary, second) = TailSource::open_readers(&file_path, true, true).await.unwrap();
        let mut second = second.unwrap();
        assert_eq!(primary.poll(Duration::from_secs(2)).await.unwrap().as_deref(), Some("new ride"));
        assert_eq!(second.poll(Duration::from_secs(2)).await.unwrap().as_deref(), Some("new ride"));

        let (_, none) = TailSource::open_readers(&file_path, true, false).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_open_readers_missing_file_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = TailSource::open_readers(temp_dir.path().join("missing.log"), false, true).await;
        assert!(matches!(result, Err(StreamError::Io(_))));
    }

    #[tokio::test]
    async fn test_from_beginning_and_envelope() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("bike.log");
        tokio::fs::write(&file_path, b"{\"log\": \"beginning of main\"}\n\n")
            .await
            .unwrap();

        let mut source = TailSource::open(&file_path, true).await.unwrap();
        let line = source.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(line.as_deref(), Some("beginning of main"));

        let idle = source.poll(Duration::from_millis(150)).await.unwrap();
        assert!(idle.is_none());
    }

    #[tokio::test]
    async fn test_partial_line_survives_timeout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("bike.log");
        tokio::fs::write(&file_path, b"").await.unwrap();

        let mut source = TailSource::open(&file_path, true).await.unwrap();
        append(&file_path, b"[INFO]: Telemetry - hr").await;
        assert!(source.poll(Duration::from_millis(250)).await.unwrap().is_none());

        append(&file_path, b"t = 77\n").await;
        let line = source.poll(Duration::from_secs(2)).await.unwrap();
        assert_eq!(line.as_deref(), Some("[INFO]: Telemetry - hrt = 77"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = TailSource::open(temp_dir.path().join("absent.log"), false).await;
        assert!(matches!(result, Err(StreamError::Io(_))));
    }
}
