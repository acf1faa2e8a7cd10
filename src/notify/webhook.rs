//! HTTP webhook ports
//!
//! Each call spawns its POST onto the current tokio runtime and returns
//! immediately. Delivery failures only reach the log.

use super::alert_body::{render_alert_html, ALERT_SUBJECT, ALERT_TEXT};
use super::{AlertPort, NotificationPort};
use crate::ride_core::anomaly::HeartRateAlert;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Handle;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()
}

fn spawn_post(client: &reqwest::Client, url: &str, payload: Value, what: &'static str) {
    let Ok(handle) = Handle::try_current() else {
        log::warn!("⚠️  No async runtime available, {} not sent", what);
        return;
    };

    let request = client.post(url).json(&payload);
    handle.spawn(async move {
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                log::debug!("{} delivered", what);
            }
            Ok(response) => {
                log::warn!("⚠️  {} rejected: HTTP {}", what, response.status());
            }
            Err(e) => {
                log::warn!("⚠️  {} failed: {}", what, e);
            }
        }
    });
}

pub fn notification_payload(row_count: usize) -> Value {
    json!({ "rows": row_count })
}

pub fn alert_payload(alert: &HeartRateAlert) -> Value {
    json!({
        "recipient": alert.recipient,
        "subject": ALERT_SUBJECT,
        "text": ALERT_TEXT,
        "html": render_alert_html(alert),
        "heart_rate": alert.heart_rate,
        "age": alert.age,
    })
}

/// Posts `{"rows": n}` after each committed ride
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

impl NotificationPort for WebhookNotifier {
    fn notify(&self, row_count: usize) {
        spawn_post(
            &self.client,
            &self.url,
            notification_payload(row_count),
            "Ride notification",
        );
    }
}

/// Posts the rendered heart rate warning for delivery to the rider
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

impl AlertPort for WebhookAlerter {
    fn alert(&self, alert: &HeartRateAlert) {
        log::info!(
            "🚨 Sending heart rate alert to {} ({} BPM)",
            alert.recipient,
            alert.heart_rate
        );
        spawn_post(&self.client, &self.url, alert_payload(alert), "Heart rate alert");
    }
}
