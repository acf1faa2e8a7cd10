//! Line sources feeding the driving loops
//!
//! A source yields one raw log line per `poll`, waiting at most the given
//! timeout. Producers that wrap lines in a `{"log": "..."}` envelope are
//! unwrapped here so the parser only ever sees the bike's text.

pub mod channel;
pub mod tail;

pub use channel::ChannelSource;
pub use tail::TailSource;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug)]
pub enum StreamError {
    Io(std::io::Error),
    /// Producer side went away
    Disconnected,
    Closed,
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err)
    }
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Io(e) => write!(f, "IO error: {}", e),
            StreamError::Disconnected => write!(f, "Stream producer disconnected"),
            StreamError::Closed => write!(f, "Stream already closed"),
        }
    }
}

impl std::error::Error for StreamError {}

#[async_trait]
pub trait StreamSource: Send {
    /// Next line, or `None` if nothing arrived within `timeout`
    async fn poll(&mut self, timeout: Duration) -> Result<Option<String>, StreamError>;

    /// Release the subscription. Later polls return `StreamError::Closed`.
    async fn close(&mut self) -> Result<(), StreamError>;

    /// Get source description for logging
    fn describe(&self) -> String;
}

/// Strip a `{"log": "..."}` envelope. Anything else is returned as-is.
pub fn unwrap_envelope(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(Value::String(line)) = map.get("log") {
                return line.clone();
            }
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(
            unwrap_envelope(r#"{"log": "2022-10-20 11:55:34.602573 [INFO]: Telemetry - hrt = 80"}"#),
            "2022-10-20 11:55:34.602573 [INFO]: Telemetry - hrt = 80"
        );
        assert_eq!(unwrap_envelope("  new ride \n"), "new ride");
        assert_eq!(unwrap_envelope(r#"{"other": 1}"#), r#"{"other": 1}"#);
    }
}
