//! Best-effort outbound signals
//!
//! Both ports are fire-and-forget: implementations log their own failures and
//! never report them back to the ingestion path.

pub mod alert_body;
pub mod webhook;

use crate::ride_core::anomaly::HeartRateAlert;
use std::sync::Arc;

pub use webhook::{WebhookAlerter, WebhookNotifier};

/// Signal sent after each successful ride commit
pub trait NotificationPort: Send + Sync {
    fn notify(&self, row_count: usize);
}

/// Abnormal heart rate dispatch
pub trait AlertPort: Send + Sync {
    fn alert(&self, alert: &HeartRateAlert);
}

/// Notifier that only writes to the log
pub struct LogNotifier;

impl NotificationPort for LogNotifier {
    fn notify(&self, row_count: usize) {
        log::info!("📣 Ride committed: {} rows appended", row_count);
    }
}

/// Alerter that only writes to the log
pub struct LogAlerter;

impl AlertPort for LogAlerter {
    fn alert(&self, alert: &HeartRateAlert) {
        log::warn!(
            "🚨 Abnormal heart rate for {}: {} BPM (age {}, healthy {}-{})",
            alert.recipient,
            alert.heart_rate,
            alert.age,
            alert.band.lower,
            alert.band.upper
        );
    }
}

/// Webhook notifier when a URL is configured, log notifier otherwise
pub fn notifier_for(url: Option<&str>) -> Arc<dyn NotificationPort> {
    match url.map(WebhookNotifier::new) {
        Some(Ok(notifier)) => Arc::new(notifier),
        Some(Err(e)) => {
            log::warn!("⚠️  Could not build webhook client ({}), logging notifications instead", e);
            Arc::new(LogNotifier)
        }
        None => Arc::new(LogNotifier),
    }
}

/// Webhook alerter when a URL is configured, log alerter otherwise
pub fn alerter_for(url: Option<&str>) -> Arc<dyn AlertPort> {
    match url.map(WebhookAlerter::new) {
        Some(Ok(alerter)) => Arc::new(alerter),
        Some(Err(e)) => {
            log::warn!("⚠️  Could not build webhook client ({}), logging alerts instead", e);
            Arc::new(LogAlerter)
        }
        None => Arc::new(LogAlerter),
    }
}
