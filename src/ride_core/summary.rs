//! Per-ride statistics computed when a ride is committed

use super::parser::{ClassifiedRecord, RecordKind};
use chrono::{NaiveDateTime, SubsecRound};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideSummary {
    pub ride_id: i64,
    pub user_id: Option<i64>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    /// Largest `duration` reading seen during the ride
    pub total_duration_secs: Option<i64>,
    pub max_heart_rate_bpm: Option<i64>,
    pub min_heart_rate_bpm: Option<i64>,
    pub avg_heart_rate_bpm: Option<i64>,
    pub avg_resistance: Option<i64>,
    pub avg_rpm: Option<i64>,
    pub total_power_kilojoules: f64,
}

#[derive(Default)]
struct Mean {
    sum: i64,
    count: i64,
}

impl Mean {
    fn add(&mut self, value: i64) {
        self.sum += value;
        self.count += 1;
    }

    /// Truncated integer mean
    fn value(&self) -> Option<i64> {
        (self.count > 0).then(|| self.sum / self.count)
    }
}

impl RideSummary {
    pub fn from_records(ride_id: i64, records: &[ClassifiedRecord]) -> Self {
        let mut user_id = None;
        let mut start_time: Option<NaiveDateTime> = None;
        let mut end_time: Option<NaiveDateTime> = None;
        let mut total_duration_secs: Option<i64> = None;
        let mut max_hr: Option<i64> = None;
        let mut min_hr: Option<i64> = None;
        let mut heart_rate = Mean::default();
        let mut resistance = Mean::default();
        let mut rpm = Mean::default();
        let mut power_watts = 0.0;

        for record in records {
            if let Some(ts) = record.timestamp {
                start_time = Some(start_time.map_or(ts, |s| s.min(ts)));
                end_time = Some(end_time.map_or(ts, |e| e.max(ts)));
            }

            match &record.kind {
                RecordKind::Telemetry(t) => {
                    let t = t.clone().normalized();
                    if let Some(hr) = t.heart_rate {
                        max_hr = Some(max_hr.map_or(hr, |m| m.max(hr)));
                        min_hr = Some(min_hr.map_or(hr, |m| m.min(hr)));
                        heart_rate.add(hr);
                    }
                    if let Some(r) = t.resistance {
                        resistance.add(r);
                    }
                    if let Some(r) = t.rpm {
                        rpm.add(r);
                    }
                    if let Some(p) = t.power {
                        power_watts += p;
                    }
                    if let Some(d) = t.duration_secs {
                        total_duration_secs = Some(total_duration_secs.map_or(d, |m| m.max(d)));
                    }
                }
                RecordKind::UserProfile(profile) => {
                    if profile.user_id.is_some() {
                        user_id = profile.user_id;
                    }
                }
                _ => {}
            }
        }

        Self {
            ride_id,
            user_id,
            start_time: start_time.map(|t| t.round_subsecs(0)),
            end_time: end_time.map(|t| t.round_subsecs(0)),
            total_duration_secs,
            max_heart_rate_bpm: max_hr,
            min_heart_rate_bpm: min_hr,
            avg_heart_rate_bpm: heart_rate.value(),
            avg_resistance: resistance.value(),
            avg_rpm: rpm.value(),
            total_power_kilojoules: (power_watts / 1000.0 * 100.0).round() / 100.0,
        }
    }
}
