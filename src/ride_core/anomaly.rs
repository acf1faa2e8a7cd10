//! Real-time heart rate watcher
//!
//! Runs over its own read of the stream, independent of ride assembly. Only the
//! most recently seen rider is considered current.

use super::parser::{ClassifiedRecord, RecordKind, UserProfile};
use crate::notify::AlertPort;
use chrono::{DateTime, Datelike, NaiveDate};
use std::sync::Arc;

/// Resting floor of the healthy band, in BPM
pub const RESTING_HEART_RATE: i64 = 40;

/// Age-derived maximum is `MAX_HEART_RATE_BASE - age`
pub const MAX_HEART_RATE_BASE: i64 = 220;

/// Whole years between `dob` and `today`.
///
/// A Feb 29 birthday is compared as Mar 1 in years without that date.
pub fn compute_age(dob: NaiveDate, today: NaiveDate) -> i32 {
    let birthday = NaiveDate::from_ymd_opt(today.year(), dob.month(), dob.day())
        .or_else(|| NaiveDate::from_ymd_opt(today.year(), dob.month() + 1, 1));

    let age = today.year() - dob.year();
    match birthday {
        Some(birthday) if today < birthday => age - 1,
        _ => age,
    }
}

/// Convert an epoch-millisecond date of birth to a calendar date
pub fn date_from_epoch_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Age of a rider on `today`, when the profile carries a date of birth
pub fn rider_age(profile: &UserProfile, today: NaiveDate) -> Option<i32> {
    profile
        .date_of_birth
        .and_then(date_from_epoch_millis)
        .map(|dob| compute_age(dob, today))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateBand {
    pub lower: i64,
    pub upper: i64,
}

impl HeartRateBand {
    pub fn for_age(age: i32) -> Self {
        Self {
            lower: RESTING_HEART_RATE,
            upper: MAX_HEART_RATE_BASE - i64::from(age),
        }
    }

    /// Zero is a missing reading, never a low one
    pub fn is_abnormal(&self, heart_rate: i64) -> bool {
        heart_rate > self.upper || (heart_rate < self.lower && heart_rate > 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateAlert {
    pub recipient: String,
    pub name: String,
    pub age: i32,
    pub heart_rate: i64,
    pub band: HeartRateBand,
}

/// Cached view of the current rider
#[derive(Debug, Clone, PartialEq)]
struct CurrentRider {
    recipient: String,
    name: String,
    age: i32,
}

pub struct AnomalyWatcher {
    alerter: Arc<dyn AlertPort>,
    today_fn: Box<dyn Fn() -> NaiveDate + Send + Sync>,
    rider: Option<CurrentRider>,
    alerts_sent: u64,
}

impl AnomalyWatcher {
    pub fn new(alerter: Arc<dyn AlertPort>) -> Self {
        Self::new_with_today_fn(alerter, Box::new(|| chrono::Local::now().date_naive()))
    }

    /// Used for testing with a fixed calendar date
    pub fn new_with_today_fn(
        alerter: Arc<dyn AlertPort>,
        today_fn: Box<dyn Fn() -> NaiveDate + Send + Sync>,
    ) -> Self {
        Self {
            alerter,
            today_fn,
            rider: None,
            alerts_sent: 0,
        }
    }

    /// Update the rider cache or check a heart rate reading.
    /// Returns the alert when one was dispatched.
    pub fn observe(&mut self, record: &ClassifiedRecord) -> Option<HeartRateAlert> {
        match &record.kind {
            RecordKind::UserProfile(profile) => {
                self.update_rider(profile);
                None
            }
            RecordKind::Telemetry(_) => {
                let heart_rate = record.heart_rate()?;
                self.check(heart_rate)
            }
            _ => None,
        }
    }

    fn update_rider(&mut self, profile: &UserProfile) {
        let age = rider_age(profile, (self.today_fn)());

        self.rider = match (age, &profile.email_address) {
            (Some(age), Some(recipient)) => {
                log::debug!("Current rider {:?}, age {}", profile.user_id, age);
                Some(CurrentRider {
                    recipient: recipient.clone(),
                    name: profile.name.clone().unwrap_or_default(),
                    age,
                })
            }
            _ => {
                log::debug!(
                    "Rider {:?} has no date of birth or email, alerts paused",
                    profile.user_id
                );
                None
            }
        };
    }

    fn check(&mut self, heart_rate: i64) -> Option<HeartRateAlert> {
        let rider = self.rider.as_ref()?;
        let band = HeartRateBand::for_age(rider.age);
        if !band.is_abnormal(heart_rate) {
            return None;
        }

        let alert = HeartRateAlert {
            recipient: rider.recipient.clone(),
            name: rider.name.clone(),
            age: rider.age,
            heart_rate,
            band,
        };
        self.alerter.alert(&alert);
        self.alerts_sent += 1;
        Some(alert)
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent
    }

    pub fn current_rider_age(&self) -> Option<i32> {
        self.rider.as_ref().map(|r| r.age)
    }
}
