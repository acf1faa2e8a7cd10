//! In-process source over a tokio mpsc channel

use super::{unwrap_envelope, StreamError, StreamSource};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct ChannelSource {
    rx: mpsc::Receiver<String>,
    closed: bool,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx, closed: false }
    }

    /// Bounded channel plus the source reading from it
    pub fn pair(buffer: usize) -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl StreamSource for ChannelSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<String>, StreamError> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(raw)) => Ok(Some(unwrap_envelope(&raw))),
            Ok(None) => Err(StreamError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.rx.close();
        self.closed = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "in-process channel".to_string()
    }
}
