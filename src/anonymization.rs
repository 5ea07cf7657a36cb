//! Field-level anonymization
//!
//! Each datum kind declares, in a static table, which of its fields may be
//! anonymized, which transformations each field allows and the default one.
//! A protocol's [`AnonymizationRegistry`] is seeded from that table when a
//! probe is registered and can then be overridden per field.
//!
//! ```text
//!   raw Datum ──► registry.anonymize(&datum) ──► transformed copy ──► remote
//!       │                                                  (original untouched)
//!       └──► local-only consumers
//! ```
//!
//! Every transformation reads the field from the original record, so a
//! transform is applied exactly once per export and never chained.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::datum::{Datum, DatumKind, FieldValue};
use crate::error::{Result, SensusError};

/// A field transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anonymizer {
    RoundTenths,
    RoundHundredths,
    RoundThousandths,
    /// SHA-256 hex digest
    StringHash,
    /// Remove the value
    Omit,
    /// Shift onto the protocol's random timeline
    TimelineShift,
}

impl Anonymizer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anonymizer::RoundTenths => "round_tenths",
            Anonymizer::RoundHundredths => "round_hundredths",
            Anonymizer::RoundThousandths => "round_thousandths",
            Anonymizer::StringHash => "string_hash",
            Anonymizer::Omit => "omit",
            Anonymizer::TimelineShift => "timeline_shift",
        }
    }

    /// Transform one value. `time_anchor` is only used by `TimelineShift`.
    pub fn apply(&self, value: &FieldValue, time_anchor: DateTime<Utc>) -> Result<FieldValue> {
        match (self, value) {
            (Anonymizer::Omit, FieldValue::Number(_)) => Ok(FieldValue::Number(None)),
            (Anonymizer::Omit, FieldValue::Text(_)) => Ok(FieldValue::Text(None)),
            (Anonymizer::Omit, FieldValue::Time(_)) => Ok(FieldValue::Time(None)),

            (Anonymizer::RoundTenths, FieldValue::Number(v)) => {
                Ok(FieldValue::Number(v.map(|x| round_to(x, 10.0))))
            }
            (Anonymizer::RoundHundredths, FieldValue::Number(v)) => {
                Ok(FieldValue::Number(v.map(|x| round_to(x, 100.0))))
            }
            (Anonymizer::RoundThousandths, FieldValue::Number(v)) => {
                Ok(FieldValue::Number(v.map(|x| round_to(x, 1000.0))))
            }

            (Anonymizer::StringHash, FieldValue::Text(v)) => {
                Ok(FieldValue::Text(v.as_deref().map(sha256_hex)))
            }

            (Anonymizer::TimelineShift, FieldValue::Time(Some(t))) => {
                shift_onto_timeline(*t, time_anchor).map(|t| FieldValue::Time(Some(t)))
            }
            (Anonymizer::TimelineShift, FieldValue::Time(None)) => Ok(FieldValue::Time(None)),

            (anonymizer, value) => Err(SensusError::Anonymization(format!(
                "{} cannot be applied to {:?}",
                anonymizer, value
            ))),
        }
    }
}

impl fmt::Display for Anonymizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Anonymizer {
    type Err = SensusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round_tenths" => Ok(Anonymizer::RoundTenths),
            "round_hundredths" => Ok(Anonymizer::RoundHundredths),
            "round_thousandths" => Ok(Anonymizer::RoundThousandths),
            "string_hash" => Ok(Anonymizer::StringHash),
            "omit" => Ok(Anonymizer::Omit),
            "timeline_shift" => Ok(Anonymizer::TimelineShift),
            other => Err(SensusError::Anonymization(format!(
                "Unknown anonymizer \"{}\"",
                other
            ))),
        }
    }
}

fn round_to(value: f64, scale: f64) -> f64 {
    (value * scale).round() / scale
}

fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Midnight, January 1st of year 1 AD
pub fn start_of_timeline() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Random instant within the first 1000 years AD
pub fn random_time_anchor() -> DateTime<Utc> {
    let start = start_of_timeline();
    let end = NaiveDate::from_ymd_opt(1001, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .unwrap_or(start);

    let span = (end - start).num_seconds();
    if span <= 0 {
        return start;
    }

    start + chrono::Duration::seconds(rand::rng().random_range(0..span))
}

fn shift_onto_timeline(t: DateTime<Utc>, anchor: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let offset = anchor.signed_duration_since(start_of_timeline());
    t.checked_sub_signed(offset).ok_or_else(|| {
        SensusError::Anonymization(format!("Timestamp {} cannot be shifted by {}", t, offset))
    })
}

/// Declaration of one anonymizable field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnonymizableField {
    pub name: &'static str,
    pub allowed: &'static [Anonymizer],
    pub default: Option<Anonymizer>,
}

const ROUNDING: &[Anonymizer] = &[
    Anonymizer::RoundTenths,
    Anonymizer::RoundHundredths,
    Anonymizer::RoundThousandths,
];

const ROUNDING_OR_OMIT: &[Anonymizer] = &[
    Anonymizer::RoundTenths,
    Anonymizer::RoundHundredths,
    Anonymizer::RoundThousandths,
    Anonymizer::Omit,
];

const HASH_OR_OMIT: &[Anonymizer] = &[Anonymizer::StringHash, Anonymizer::Omit];

const TIMELINE: &[Anonymizer] = &[Anonymizer::TimelineShift];

const TIMESTAMP: AnonymizableField = AnonymizableField {
    name: "timestamp",
    allowed: TIMELINE,
    default: None,
};

const LOCATION_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "latitude", allowed: ROUNDING, default: None },
    AnonymizableField { name: "longitude", allowed: ROUNDING, default: None },
    AnonymizableField { name: "accuracy", allowed: ROUNDING_OR_OMIT, default: None },
];

const LIGHT_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "brightness", allowed: ROUNDING, default: None },
];

const WLAN_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "access_point_bssid", allowed: HASH_OR_OMIT, default: None },
];

const ACCELERATION_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "x", allowed: ROUNDING, default: None },
    AnonymizableField { name: "y", allowed: ROUNDING, default: None },
    AnonymizableField { name: "z", allowed: ROUNDING, default: None },
];

const SCRIPT_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "response", allowed: HASH_OR_OMIT, default: None },
    AnonymizableField {
        name: "trigger_datum_id",
        allowed: HASH_OR_OMIT,
        default: Some(Anonymizer::StringHash),
    },
    AnonymizableField {
        name: "latitude",
        allowed: ROUNDING_OR_OMIT,
        default: Some(Anonymizer::RoundHundredths),
    },
    AnonymizableField {
        name: "longitude",
        allowed: ROUNDING_OR_OMIT,
        default: Some(Anonymizer::RoundHundredths),
    },
    AnonymizableField {
        name: "presentation_timestamp",
        allowed: &[Anonymizer::TimelineShift, Anonymizer::Omit],
        default: None,
    },
];

const REPORT_FIELDS: &[AnonymizableField] = &[TIMESTAMP];

const REWARD_FIELDS: &[AnonymizableField] = &[
    TIMESTAMP,
    AnonymizableField { name: "participation", allowed: ROUNDING, default: None },
];

/// Static declaration of the anonymizable fields of a datum kind
pub fn anonymizable_fields(kind: DatumKind) -> &'static [AnonymizableField] {
    match kind {
        DatumKind::Location => LOCATION_FIELDS,
        DatumKind::Light => LIGHT_FIELDS,
        DatumKind::Wlan => WLAN_FIELDS,
        DatumKind::Acceleration => ACCELERATION_FIELDS,
        DatumKind::Script => SCRIPT_FIELDS,
        DatumKind::ProtocolReport => REPORT_FIELDS,
        DatumKind::ParticipationReward => REWARD_FIELDS,
    }
}

fn declared_field(kind: DatumKind, field: &str) -> Option<&'static AnonymizableField> {
    anonymizable_fields(kind).iter().find(|f| f.name == field)
}

type Assignments = HashMap<(DatumKind, &'static str), Option<Anonymizer>>;

/// Per-protocol mapping of (datum kind, field) to anonymizer
#[derive(Debug)]
pub struct AnonymizationRegistry {
    assignments: RwLock<Assignments>,
    time_anchor: RwLock<DateTime<Utc>>,
}

impl Default for AnonymizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AnonymizationRegistry {
    /// Empty registry with a random time anchor
    pub fn new() -> Self {
        Self::with_time_anchor(random_time_anchor())
    }

    pub fn with_time_anchor(anchor: DateTime<Utc>) -> Self {
        Self {
            assignments: RwLock::new(HashMap::new()),
            time_anchor: RwLock::new(anchor),
        }
    }

    /// Seed the declared defaults of `kind`, keeping existing overrides
    pub fn register_kind(&self, kind: DatumKind) {
        let mut assignments = self.assignments_mut();
        for field in anonymizable_fields(kind) {
            assignments.entry((kind, field.name)).or_insert(field.default);
        }
        debug!(datum = %kind, "Registered anonymizable fields");
    }

    /// Override the anonymizer for one field; `None` sends it unchanged
    pub fn set_anonymizer(
        &self,
        kind: DatumKind,
        field: &str,
        anonymizer: Option<Anonymizer>,
    ) -> Result<()> {
        let declared = declared_field(kind, field).ok_or_else(|| {
            SensusError::Anonymization(format!("{} has no anonymizable field \"{}\"", kind, field))
        })?;

        if let Some(a) = anonymizer {
            if !declared.allowed.contains(&a) {
                return Err(SensusError::Anonymization(format!(
                    "{} is not allowed for {}.{}",
                    a, kind, field
                )));
            }
        }

        self.register_kind(kind);
        self.assignments_mut().insert((kind, declared.name), anonymizer);
        info!(datum = %kind, field, anonymizer = ?anonymizer, "Anonymizer assigned");
        Ok(())
    }

    pub fn anonymizer_for(&self, kind: DatumKind, field: &str) -> Option<Anonymizer> {
        let name = declared_field(kind, field)?.name;
        self.assignments_ref().get(&(kind, name)).copied().flatten()
    }

    pub fn is_registered(&self, kind: DatumKind) -> bool {
        self.assignments_ref().keys().any(|(k, _)| *k == kind)
    }

    /// All assignments, sorted by kind then field
    pub fn assignments(&self) -> Vec<(DatumKind, &'static str, Option<Anonymizer>)> {
        let mut all: Vec<_> = self
            .assignments_ref()
            .iter()
            .map(|((kind, field), a)| (*kind, *field, *a))
            .collect();
        all.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        all
    }

    pub fn time_anchor(&self) -> DateTime<Utc> {
        *self
            .time_anchor
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_time_anchor(&self, anchor: DateTime<Utc>) {
        *self
            .time_anchor
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = anchor;
    }

    /// Re-roll the random time anchor
    pub fn reset_time_anchor(&self) -> DateTime<Utc> {
        let anchor = random_time_anchor();
        self.set_time_anchor(anchor);
        anchor
    }

    /// Produce a transformed copy of `datum`. The original is never touched.
    pub fn anonymize(&self, datum: &Datum) -> Result<Datum> {
        let kind = datum.kind();
        let anchor = self.time_anchor();

        // Snapshot so the lock is not held while transforming
        let plan: Vec<(&'static str, Anonymizer)> = anonymizable_fields(kind)
            .iter()
            .filter_map(|f| {
                self.assignments_ref()
                    .get(&(kind, f.name))
                    .copied()
                    .flatten()
                    .map(|a| (f.name, a))
            })
            .collect();

        let mut copy = datum.clone();
        for (field, anonymizer) in plan {
            if let Some(raw) = datum.field(field) {
                let transformed = anonymizer.apply(&raw, anchor)?;
                copy.set_field(field, transformed)?;
            }
        }
        copy.mark_anonymized();
        Ok(copy)
    }

    fn assignments_ref(&self) -> std::sync::RwLockReadGuard<'_, Assignments> {
        self.assignments
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn assignments_mut(&self) -> std::sync::RwLockWriteGuard<'_, Assignments> {
        self.assignments
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
