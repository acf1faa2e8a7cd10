//! Converts a finished ride buffer into the rows handed to the commit sink

use super::anomaly::rider_age;
use super::assembler::RideBuffer;
use super::parser::{ClassifiedRecord, RecordKind, UserProfile};
use super::summary::RideSummary;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// One persisted log line, tagged with the ride it belongs to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideRow {
    pub ride_id: i64,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct RideBatch {
    pub ride_id: i64,
    pub rows: Vec<RideRow>,
    pub summary: RideSummary,
    /// Last rider profile seen during the ride
    pub rider: Option<UserProfile>,
    /// Rider's age on the day the ride started
    pub rider_age: Option<i32>,
}

impl RideBatch {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Build the batch for a ride. Boundary markers never become rows.
pub fn build_batch(buffer: &RideBuffer) -> RideBatch {
    let rows = buffer
        .records
        .iter()
        .filter_map(|record| {
            row_fields(record).map(|fields| RideRow {
                ride_id: buffer.ride_id,
                fields,
            })
        })
        .collect();

    let rider = buffer.records.iter().rev().find_map(|record| match &record.kind {
        RecordKind::UserProfile(profile) => Some(profile.clone()),
        _ => None,
    });

    let summary = RideSummary::from_records(buffer.ride_id, &buffer.records);
    let ride_date = summary
        .start_time
        .map(|t| t.date())
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let age = rider.as_ref().and_then(|r| rider_age(r, ride_date));

    RideBatch {
        ride_id: buffer.ride_id,
        rows,
        summary,
        rider,
        rider_age: age,
    }
}

fn row_fields(record: &ClassifiedRecord) -> Option<Map<String, Value>> {
    let extracted = match &record.kind {
        RecordKind::RideStart | RecordKind::RideEnd => return None,
        RecordKind::Telemetry(t) => serde_json::to_value(t.clone().normalized()).ok(),
        RecordKind::UserProfile(p) => serde_json::to_value(p).ok(),
        RecordKind::Unclassified => None,
    };

    let mut fields = Map::new();
    fields.insert("kind".to_string(), json!(record.kind.as_str()));
    fields.insert("is_info".to_string(), json!(record.is_info));
    fields.insert("is_system".to_string(), json!(record.is_system));
    if let Some(ts) = record.timestamp {
        fields.insert(
            "timestamp".to_string(),
            json!(ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        );
    }
    fields.insert("log".to_string(), json!(record.line));

    if let Some(Value::Object(extra)) = extracted {
        fields.extend(extra);
    }

    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ride_core::assembler::BufferState;
    use crate::ride_core::parser::classify;

    fn buffer(ride_id: i64, lines: &[&str]) -> RideBuffer {
        RideBuffer {
            ride_id,
            records: lines.iter().map(|l| classify(l)).collect(),
            state: BufferState::Active,
        }
    }

    #[test]
    fn test_boundaries_are_not_rows() {
        let batch = build_batch(&buffer(
            3,
            &[
                "new ride",
                "[INFO]: Telemetry - hrt = 100",
                "[SYSTEM] data = {broken",
                "beginning of main",
            ],
        ));

        assert_eq!(batch.ride_id, 3);
        assert_eq!(batch.row_count(), 2);
        assert!(batch.rows.iter().all(|r| r.ride_id == 3));
        assert_eq!(batch.rows[0].fields["kind"], "telemetry");
        assert_eq!(batch.rows[1].fields["kind"], "unclassified");
    }

    #[test]
    fn test_row_fields_only_hold_present_values() {
        let batch = build_batch(&buffer(
            1,
            &["2022-10-20 11:55:34.602573 mendoza v9: [INFO]: Telemetry - hrt = 0; rpm = 58"],
        ));

        let fields = &batch.rows[0].fields;
        assert_eq!(fields["rpm"], 58);
        assert!(!fields.contains_key("heart_rate"));
        assert!(!fields.contains_key("power"));
        assert_eq!(fields["timestamp"], "2022-10-20 11:55:34.602573");
        assert_eq!(fields["is_info"], true);
    }

    #[test]
    fn test_last_profile_is_the_rider() {
        let batch = build_batch(&buffer(
            2,
            &[
                r#"[SYSTEM] data = {"user_id": 1, "name": "First"}"#,
                r#"[SYSTEM] data = {"user_id": 2, "name": "Second"}"#,
            ],
        ));

        let rider = batch.rider.unwrap();
        assert_eq!(rider.user_id, Some(2));
        assert_eq!(batch.rows[1].fields["name"], "Second");
        assert_eq!(batch.summary.user_id, Some(2));
        assert_eq!(batch.rider_age, None);
    }

    #[test]
    fn test_rider_age_on_ride_date() {
        // 1996-02-03 birthday, ride on 2022-10-20
        let batch = build_batch(&buffer(
            4,
            &[
                r#"[SYSTEM] data = {"user_id": 7, "date_of_birth": 823305600000}"#,
                "2022-10-20 11:55:34.602573 mendoza v9: [INFO]: Telemetry - hrt = 100",
            ],
        ));

        assert_eq!(batch.rider_age, Some(26));
    }
}
