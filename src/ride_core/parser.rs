//! Log line classification and field extraction
//!
//! Every raw line from a bike is turned into a [`ClassifiedRecord`]. Classification
//! is total: a line that matches nothing still yields a record, never an error.

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Substring that opens a new ride
pub const NEW_RIDE_MARKER: &str = "new ride";

/// Substring emitted by the bike firmware when it restarts after a ride
pub const END_OF_RIDE_MARKER: &str = "beginning of main";

/// Substring of SYSTEM lines carrying the rider JSON payload
pub const SYSTEM_DATA_MARKER: &str = "[SYSTEM] data";

const LOG_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{6}")
        .expect("datetime pattern")
});
static HEART_RATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:hrt|heart) = ([0-9]+)").expect("heart rate pattern"));
static RESISTANCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"resistance = ([0-9]+)").expect("resistance pattern"));
static RPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rpm = ([0-9]+)").expect("rpm pattern"));
static POWER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"power = ([0-9]+\.[0-9]{8})").expect("power pattern"));
static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"duration = ([0-9]+)").expect("duration pattern"));
static USER_PAYLOAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data = (\{.*\})").expect("user payload pattern"));

/// Telemetry values reported by INFO lines. Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Telemetry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resistance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
}

impl Telemetry {
    /// Heart rate sensors report 0 when the rider is not holding the handles.
    /// A zero reading carries no information and is dropped here.
    pub fn normalized(mut self) -> Self {
        if self.heart_rate == Some(0) {
            self.heart_rate = None;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.heart_rate.is_none()
            && self.resistance.is_none()
            && self.rpm.is_none()
            && self.power.is_none()
            && self.duration_secs.is_none()
    }
}

/// Rider details from a `[SYSTEM] data = {...}` line
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    /// Epoch milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bike_serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
}

impl UserProfile {
    fn from_payload(payload: &Map<String, Value>) -> Self {
        Self {
            user_id: int_field(payload, "user_id"),
            name: text_field(payload, "name"),
            gender: text_field(payload, "gender"),
            date_of_birth: int_field(payload, "date_of_birth"),
            height_cm: int_field(payload, "height_cm"),
            weight_kg: int_field(payload, "weight_kg"),
            address: text_field(payload, "address"),
            email_address: text_field(payload, "email_address"),
            account_created: int_field(payload, "account_create_date"),
            bike_serial: text_field(payload, "bike_serial"),
            original_source: text_field(payload, "original_source"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    RideStart,
    RideEnd,
    Telemetry(Telemetry),
    UserProfile(UserProfile),
    Unclassified,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::RideStart => "ride_start",
            RecordKind::RideEnd => "ride_end",
            RecordKind::Telemetry(_) => "telemetry",
            RecordKind::UserProfile(_) => "user_profile",
            RecordKind::Unclassified => "unclassified",
        }
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self, RecordKind::RideStart | RecordKind::RideEnd)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub kind: RecordKind,
    pub is_info: bool,
    pub is_system: bool,
    pub timestamp: Option<NaiveDateTime>,
    /// The raw line, kept for the `log` column
    pub line: String,
}

impl ClassifiedRecord {
    fn boundary(kind: RecordKind, line: &str) -> Self {
        Self {
            kind,
            is_info: false,
            is_system: false,
            timestamp: None,
            line: line.to_string(),
        }
    }

    /// Heart rate after zero normalization, if this is a telemetry record
    pub fn heart_rate(&self) -> Option<i64> {
        match &self.kind {
            RecordKind::Telemetry(t) => t.clone().normalized().heart_rate,
            _ => None,
        }
    }
}

/// Classify one raw log line
pub fn classify(line: &str) -> ClassifiedRecord {
    if line.contains(NEW_RIDE_MARKER) {
        return ClassifiedRecord::boundary(RecordKind::RideStart, line);
    }
    if line.contains(END_OF_RIDE_MARKER) {
        return ClassifiedRecord::boundary(RecordKind::RideEnd, line);
    }

    let is_info = line.contains("INFO");
    let is_system = line.contains("SYSTEM");
    let timestamp = extract_timestamp(line);

    let kind = if line.contains(SYSTEM_DATA_MARKER) {
        match extract_user_payload(line) {
            Some(payload) => RecordKind::UserProfile(UserProfile::from_payload(&payload)),
            None => RecordKind::Unclassified,
        }
    } else {
        RecordKind::Telemetry(extract_telemetry(line))
    };

    ClassifiedRecord {
        kind,
        is_info,
        is_system,
        timestamp,
        line: line.to_string(),
    }
}

fn extract_timestamp(line: &str) -> Option<NaiveDateTime> {
    let found = DATETIME_RE.find(line)?;
    NaiveDateTime::parse_from_str(found.as_str(), LOG_DATETIME_FORMAT).ok()
}

fn extract_telemetry(line: &str) -> Telemetry {
    Telemetry {
        heart_rate: capture(&HEART_RATE_RE, line),
        resistance: capture(&RESISTANCE_RE, line),
        rpm: capture(&RPM_RE, line),
        power: capture(&POWER_RE, line),
        duration_secs: capture(&DURATION_RE, line),
    }
}

fn capture<T: std::str::FromStr>(re: &Regex, line: &str) -> Option<T> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

fn extract_user_payload(line: &str) -> Option<Map<String, Value>> {
    let raw = USER_PAYLOAD_RE.captures(line)?.get(1)?.as_str();
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn text_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn int_field(payload: &Map<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEMETRY_LINE: &str =
        "2022-10-20 11:55:34.602573 mendoza v9: [INFO]: Telemetry - hrt = 131; rpm = 58; power = 24.31358612";
    const RIDE_LINE: &str =
        "2022-10-20 11:55:34.102421 mendoza v9: [INFO]: Ride - duration = 412.0; resistance = 40";
    const SYSTEM_LINE: &str = r#"2022-10-20 11:48:36.102011 mendoza v9: [SYSTEM] data = {"user_id": 3194, "name": "Grace Carter", "gender": "female", "address": "Flat 6,\nWest Road,\nLondon,\nE1 4DD", "date_of_birth": 823305600000, "email_address": "grace@example.com", "height_cm": 168, "weight_kg": 62, "account_create_date": 1641168000000, "bike_serial": "SN0000", "original_source": "offline"}"#;

    #[test]
    fn test_new_ride_marker_wins_over_everything() {
        let record = classify("2022-10-20 11:48:35.000000 mendoza v9: [INFO]: new ride hrt = 99 [SYSTEM] data = {}");
        assert_eq!(record.kind, RecordKind::RideStart);

        let record = classify("new ride beginning of main");
        assert_eq!(record.kind, RecordKind::RideStart);
    }

    #[test]
    fn test_end_of_ride_marker() {
        let record = classify("2022-10-20 12:02:11.300011 mendoza v9: ================== beginning of main ==================");
        assert_eq!(record.kind, RecordKind::RideEnd);
        assert!(record.kind.is_boundary());
    }

    #[test]
    fn test_telemetry_fields() {
        let record = classify(TELEMETRY_LINE);
        assert!(record.is_info);
        assert!(!record.is_system);
        assert_eq!(
            record.timestamp.unwrap().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            "2022-10-20 11:55:34.602573"
        );

        match record.kind {
            RecordKind::Telemetry(t) => {
                assert_eq!(t.heart_rate, Some(131));
                assert_eq!(t.rpm, Some(58));
                assert_eq!(t.power, Some(24.31358612));
                assert_eq!(t.resistance, None);
                assert_eq!(t.duration_secs, None);
            }
            other => panic!("expected telemetry, got {:?}", other),
        }
    }

    #[test]
    fn test_ride_line_duration_and_resistance() {
        match classify(RIDE_LINE).kind {
            RecordKind::Telemetry(t) => {
                assert_eq!(t.duration_secs, Some(412));
                assert_eq!(t.resistance, Some(40));
                assert_eq!(t.heart_rate, None);
            }
            other => panic!("expected telemetry, got {:?}", other),
        }
    }

    #[test]
    fn test_heart_label_variant() {
        match classify("[INFO]: Telemetry - heart = 87").kind {
            RecordKind::Telemetry(t) => assert_eq!(t.heart_rate, Some(87)),
            other => panic!("expected telemetry, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_heart_rate_survives_parse_and_is_normalized_after() {
        let record = classify("[INFO]: Telemetry - hrt = 0; rpm = 12");
        match &record.kind {
            RecordKind::Telemetry(t) => {
                assert_eq!(t.heart_rate, Some(0));
                assert_eq!(t.clone().normalized().heart_rate, None);
                assert_eq!(t.clone().normalized().rpm, Some(12));
            }
            other => panic!("expected telemetry, got {:?}", other),
        }
        assert_eq!(record.heart_rate(), None);
    }

    #[test]
    fn test_power_requires_eight_decimals() {
        match classify("[INFO]: Telemetry - power = 0.0").kind {
            RecordKind::Telemetry(t) => assert_eq!(t.power, None),
            other => panic!("expected telemetry, got {:?}", other),
        }
    }

    #[test]
    fn test_line_without_fields_is_inert_telemetry() {
        let record = classify("some unrelated chatter");
        match record.kind {
            RecordKind::Telemetry(t) => assert!(t.is_empty()),
            other => panic!("expected telemetry, got {:?}", other),
        }
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn test_invalid_datetime_is_absent() {
        let record = classify("2022-13-45 99:00:00.000000 [INFO]: Telemetry - hrt = 80");
        assert!(record.timestamp.is_none());
    }

    #[test]
    fn test_user_profile_payload() {
        let record = classify(SYSTEM_LINE);
        assert!(record.is_system);
        match record.kind {
            RecordKind::UserProfile(p) => {
                assert_eq!(p.user_id, Some(3194));
                assert_eq!(p.name.as_deref(), Some("Grace Carter"));
                assert_eq!(p.gender.as_deref(), Some("female"));
                assert_eq!(p.date_of_birth, Some(823305600000));
                assert_eq!(p.height_cm, Some(168));
                assert_eq!(p.weight_kg, Some(62));
                assert_eq!(p.email_address.as_deref(), Some("grace@example.com"));
                assert_eq!(p.account_created, Some(1641168000000));
                assert_eq!(p.bike_serial.as_deref(), Some("SN0000"));
                assert_eq!(p.original_source.as_deref(), Some("offline"));
                assert!(p.address.unwrap().contains("West Road"));
            }
            other => panic!("expected user profile, got {:?}", other),
        }
    }

    #[test]
    fn test_user_profile_missing_keys_are_absent() {
        let record = classify(r#"[SYSTEM] data = {"user_id": 7}"#);
        match record.kind {
            RecordKind::UserProfile(p) => {
                assert_eq!(p.user_id, Some(7));
                assert!(p.name.is_none());
                assert!(p.date_of_birth.is_none());
            }
            other => panic!("expected user profile, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload_is_unclassified() {
        let record = classify("[SYSTEM] data = {not json}");
        assert_eq!(record.kind, RecordKind::Unclassified);

        let record = classify("[SYSTEM] data lost");
        assert_eq!(record.kind, RecordKind::Unclassified);
    }
}
