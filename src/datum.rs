//! Datum: one immutable observation or system event
//!
//! Every record carries a globally unique id, the UTC time it was created,
//! the probe type that emitted it and a variant-specific payload. Id and
//! timestamp are fixed at construction; the only way to obtain a record with
//! different field values is the anonymization pipeline, which always works
//! on a copy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SensusError};

/// Probe type stamped on protocol reports
pub const PROTOCOL_REPORT_SOURCE: &str = "sensus.protocol";

/// Discriminant of a [`DatumPayload`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumKind {
    Location,
    Light,
    Wlan,
    Acceleration,
    Script,
    ProtocolReport,
    ParticipationReward,
}

impl DatumKind {
    pub const ALL: [DatumKind; 7] = [
        DatumKind::Location,
        DatumKind::Light,
        DatumKind::Wlan,
        DatumKind::Acceleration,
        DatumKind::Script,
        DatumKind::ProtocolReport,
        DatumKind::ParticipationReward,
    ];

    /// Reports and rewards are produced by the agent itself, not by probes
    pub fn is_probe_data(&self) -> bool {
        !matches!(
            self,
            DatumKind::ProtocolReport | DatumKind::ParticipationReward
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatumKind::Location => "location",
            DatumKind::Light => "light",
            DatumKind::Wlan => "wlan",
            DatumKind::Acceleration => "acceleration",
            DatumKind::Script => "script",
            DatumKind::ProtocolReport => "protocol_report",
            DatumKind::ParticipationReward => "participation_reward",
        }
    }
}

impl fmt::Display for DatumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatumPayload {
    Location {
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
    },
    Light {
        brightness: f64,
    },
    Wlan {
        access_point_bssid: Option<String>,
    },
    Acceleration {
        x: f64,
        y: f64,
        z: f64,
    },
    /// A survey response
    Script {
        script_id: String,
        run_id: String,
        input_id: String,
        response: Option<String>,
        trigger_datum_id: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
        presentation_timestamp: Option<DateTime<Utc>>,
    },
    ProtocolReport {
        error: String,
        warning: String,
        misc: String,
    },
    ParticipationReward {
        participation: f32,
    },
}

impl DatumPayload {
    pub fn kind(&self) -> DatumKind {
        match self {
            DatumPayload::Location { .. } => DatumKind::Location,
            DatumPayload::Light { .. } => DatumKind::Light,
            DatumPayload::Wlan { .. } => DatumKind::Wlan,
            DatumPayload::Acceleration { .. } => DatumKind::Acceleration,
            DatumPayload::Script { .. } => DatumKind::Script,
            DatumPayload::ProtocolReport { .. } => DatumKind::ProtocolReport,
            DatumPayload::ParticipationReward { .. } => DatumKind::ParticipationReward,
        }
    }
}

/// Value of one named field, as seen by anonymizers
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(Option<f64>),
    Text(Option<String>),
    Time(Option<DateTime<Utc>>),
}

/// One sensor observation or system event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    id: Uuid,
    timestamp: DateTime<Utc>,
    probe_type: String,
    #[serde(flatten)]
    payload: DatumPayload,
    #[serde(default)]
    anonymized: bool,
}

impl Datum {
    /// Create a record stamped with the current time
    pub fn new(probe_type: impl Into<String>, payload: DatumPayload) -> Self {
        Self::at(Utc::now(), probe_type, payload)
    }

    /// Create a record with an explicit observation time
    pub fn at(timestamp: DateTime<Utc>, probe_type: impl Into<String>, payload: DatumPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            probe_type: probe_type.into(),
            payload,
            anonymized: false,
        }
    }

    /// Protocol report produced by a health test
    pub fn protocol_report(
        timestamp: DateTime<Utc>,
        error: impl Into<String>,
        warning: impl Into<String>,
        misc: impl Into<String>,
    ) -> Self {
        Self::at(
            timestamp,
            PROTOCOL_REPORT_SOURCE,
            DatumPayload::ProtocolReport {
                error: error.into(),
                warning: warning.into(),
                misc: misc.into(),
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn probe_type(&self) -> &str {
        &self.probe_type
    }

    pub fn payload(&self) -> &DatumPayload {
        &self.payload
    }

    pub fn kind(&self) -> DatumKind {
        self.payload.kind()
    }

    /// Whether this is a transformed copy produced by the anonymization pipeline
    pub fn is_anonymized(&self) -> bool {
        self.anonymized
    }

    /// Read a named field. `timestamp` is available on every variant.
    pub fn field(&self, name: &str) -> Option<FieldValue> {
        use DatumPayload::*;
        use FieldValue::{Number, Text, Time};

        if name == "timestamp" {
            return Some(Time(Some(self.timestamp)));
        }

        let value = match (&self.payload, name) {
            (Location { latitude, .. }, "latitude") => Number(Some(*latitude)),
            (Location { longitude, .. }, "longitude") => Number(Some(*longitude)),
            (Location { accuracy, .. }, "accuracy") => Number(*accuracy),
            (Light { brightness }, "brightness") => Number(Some(*brightness)),
            (Wlan { access_point_bssid }, "access_point_bssid") => Text(access_point_bssid.clone()),
            (Acceleration { x, .. }, "x") => Number(Some(*x)),
            (Acceleration { y, .. }, "y") => Number(Some(*y)),
            (Acceleration { z, .. }, "z") => Number(Some(*z)),
            (Script { response, .. }, "response") => Text(response.clone()),
            (Script { trigger_datum_id, .. }, "trigger_datum_id") => Text(trigger_datum_id.clone()),
            (Script { latitude, .. }, "latitude") => Number(*latitude),
            (Script { longitude, .. }, "longitude") => Number(*longitude),
            (Script { presentation_timestamp, .. }, "presentation_timestamp") => {
                Time(*presentation_timestamp)
            }
            (ParticipationReward { participation }, "participation") => {
                Number(Some(f64::from(*participation)))
            }
            _ => return None,
        };

        Some(value)
    }

    /// Replace a named field on this (copied) record
    pub(crate) fn set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        use DatumPayload::*;
        use FieldValue::{Number, Text, Time};

        let kind = self.kind();

        match (&mut self.payload, name, &value) {
            (_, "timestamp", Time(Some(t))) => self.timestamp = *t,
            (Location { latitude, .. }, "latitude", Number(Some(v))) => *latitude = *v,
            (Location { longitude, .. }, "longitude", Number(Some(v))) => *longitude = *v,
            (Location { accuracy, .. }, "accuracy", Number(v)) => *accuracy = *v,
            (Light { brightness }, "brightness", Number(Some(v))) => *brightness = *v,
            (Wlan { access_point_bssid }, "access_point_bssid", Text(v)) => {
                *access_point_bssid = v.clone()
            }
            (Acceleration { x, .. }, "x", Number(Some(v))) => *x = *v,
            (Acceleration { y, .. }, "y", Number(Some(v))) => *y = *v,
            (Acceleration { z, .. }, "z", Number(Some(v))) => *z = *v,
            (Script { response, .. }, "response", Text(v)) => *response = v.clone(),
            (Script { trigger_datum_id, .. }, "trigger_datum_id", Text(v)) => {
                *trigger_datum_id = v.clone()
            }
            (Script { latitude, .. }, "latitude", Number(v)) => *latitude = *v,
            (Script { longitude, .. }, "longitude", Number(v)) => *longitude = *v,
            (Script { presentation_timestamp, .. }, "presentation_timestamp", Time(v)) => {
                *presentation_timestamp = *v
            }
            (ParticipationReward { participation }, "participation", Number(Some(v))) => {
                *participation = *v as f32
            }
            _ => {
                return Err(SensusError::Anonymization(format!(
                    "Field \"{}\" of {} cannot hold {:?}",
                    name, kind, value
                )))
            }
        }

        Ok(())
    }

    pub(crate) fn mark_anonymized(&mut self) {
        self.anonymized = true;
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} at {}",
            self.kind(),
            self.id,
            self.probe_type,
            self.timestamp.to_rfc3339()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Datum {
        Datum::new(
            "sensus.location",
            DatumPayload::Location {
                latitude: 38.0336,
                longitude: -78.508,
                accuracy: Some(5.0),
            },
        )
    }

    #[test]
    fn test_ids_are_unique() {
        let a = location();
        let b = location();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_clone_keeps_identity() {
        let a = location();
        let b = a.clone();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.timestamp(), b.timestamp());
    }

    #[test]
    fn test_field_access() {
        let d = location();
        assert_eq!(d.field("latitude"), Some(FieldValue::Number(Some(38.0336))));
        assert_eq!(d.field("accuracy"), Some(FieldValue::Number(Some(5.0))));
        assert_eq!(d.field("timestamp"), Some(FieldValue::Time(Some(d.timestamp()))));
        assert_eq!(d.field("brightness"), None);
    }

    #[test]
    fn test_set_field_rejects_absent_required_value() {
        let mut d = location();
        assert!(d.set_field("latitude", FieldValue::Number(None)).is_err());
        assert!(d.set_field("accuracy", FieldValue::Number(None)).is_ok());
        assert_eq!(d.field("accuracy"), Some(FieldValue::Number(None)));
    }

    #[test]
    fn test_set_field_rejects_type_mismatch() {
        let mut d = location();
        assert!(d
            .set_field("latitude", FieldValue::Text(Some("north".to_string())))
            .is_err());
    }

    #[test]
    fn test_probe_data_classification() {
        assert!(DatumKind::Location.is_probe_data());
        assert!(!DatumKind::ProtocolReport.is_probe_data());
        assert!(!DatumKind::ParticipationReward.is_probe_data());
    }

    #[test]
    fn test_protocol_report_constructor() {
        let now = Utc::now();
        let report = Datum::protocol_report(now, "err", "warn", "info");
        assert_eq!(report.kind(), DatumKind::ProtocolReport);
        assert_eq!(report.timestamp(), now);
        assert_eq!(report.probe_type(), PROTOCOL_REPORT_SOURCE);
    }

    #[test]
    fn test_json_shape() {
        let d = Datum::new("sensus.light", DatumPayload::Light { brightness: 12.5 });
        let json = serde_json::to_value(&d).unwrap();

        assert_eq!(json["kind"], "light");
        assert_eq!(json["probe_type"], "sensus.light");
        assert_eq!(json["brightness"], 12.5);

        let back: Datum = serde_json::from_value(json).unwrap();
        assert_eq!(back, d);
    }
}
