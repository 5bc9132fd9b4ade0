//! Static field classification and record segmentation.
//!
//! Two fixed name lists decide every field: identifying fields go to
//! AES-GCM, numeric vitals go to CKKS, everything else is dropped and never
//! stored in any form.

use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

/// Fields that identify a patient.
pub const IDENTIFYING_FIELDS: [&str; 6] = ["patient_id", "name", "address", "phone", "email", "dob"];

/// Numeric vitals analysed homomorphically.
pub const NUMERIC_SENSITIVE_FIELDS: [&str; 7] = [
    "heart_rate",
    "blood_pressure_sys",
    "blood_pressure_dia",
    "temperature",
    "glucose",
    "bmi",
    "cholesterol",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldCategory {
    Identifying,
    NumericSensitive,
    Unclassified,
}

/// A raw input value: ingestion hands over numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    fn to_text(&self) -> String {
        match self {
            FieldValue::Number(v) => v.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }

    fn to_number(&self) -> Option<f64> {
        let v = match self {
            FieldValue::Number(v) => *v,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// One input row.
pub type Record = BTreeMap<String, FieldValue>;

/// Case-insensitive exact match against the two lists; total and idempotent.
pub fn classify(field_name: &str) -> FieldCategory {
    let name = normalize_field_name(field_name);
    if IDENTIFYING_FIELDS.contains(&name.as_str()) {
        FieldCategory::Identifying
    } else if NUMERIC_SENSITIVE_FIELDS.contains(&name.as_str()) {
        FieldCategory::NumericSensitive
    } else {
        FieldCategory::Unclassified
    }
}

/// The two surviving halves of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifiedRecord {
    pub identifying: BTreeMap<String, String>,
    pub numeric: BTreeMap<String, f64>,
}

/// Field names as they appear in the lists: trimmed and lowercase.
pub fn normalize_field_name(field_name: &str) -> String {
    field_name.trim().to_lowercase()
}

/// Split a record by category, keyed by normalized field name. Vitals that
/// do not parse as finite numbers are skipped; unclassified fields are dropped.
pub fn segment(record: &Record) -> ClassifiedRecord {
    let mut out = ClassifiedRecord::default();
    for (field, value) in record {
        let name = normalize_field_name(field);
        match classify(&name) {
            FieldCategory::Identifying => {
                out.identifying.insert(name, value.to_text());
            }
            FieldCategory::NumericSensitive => match value.to_number() {
                Some(v) => {
                    out.numeric.insert(name, v);
                }
                None => warn!("skipping non-numeric value for vitals field {field}"),
            },
            FieldCategory::Unclassified => {}
        }
    }
    out
}

/// Data-minimization report over a set of field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub field_classifications: BTreeMap<String, FieldCategory>,
    pub identifying_count: usize,
    pub numeric_count: usize,
    pub unclassified_count: usize,
    pub total_fields: usize,
    pub identifying_percentage: f64,
    pub numeric_percentage: f64,
    /// Fields that will never be stored.
    pub dropped_fields: Vec<String>,
}

pub fn classification_report<S: AsRef<str>>(field_names: &[S]) -> ClassificationReport {
    let field_classifications: BTreeMap<String, FieldCategory> = field_names
        .iter()
        .map(|f| (f.as_ref().to_string(), classify(f.as_ref())))
        .collect();
    let count = |category: FieldCategory| {
        field_classifications
            .values()
            .filter(|&&c| c == category)
            .count()
    };
    let identifying_count = count(FieldCategory::Identifying);
    let numeric_count = count(FieldCategory::NumericSensitive);
    let unclassified_count = count(FieldCategory::Unclassified);
    let total_fields = field_classifications.len();
    let percentage = |n: usize| {
        if total_fields == 0 {
            0.0
        } else {
            n as f64 / total_fields as f64 * 100.0
        }
    };

    let dropped_fields: Vec<String> = field_classifications
        .iter()
        .filter(|(_, c)| **c == FieldCategory::Unclassified)
        .map(|(f, _)| f.clone())
        .collect();
    if !dropped_fields.is_empty() {
        warn!("dropping unclassified fields: {dropped_fields:?}");
    }

    ClassificationReport {
        identifying_percentage: percentage(identifying_count),
        numeric_percentage: percentage(numeric_count),
        field_classifications,
        identifying_count,
        numeric_count,
        unclassified_count,
        total_fields,
        dropped_fields,
    }
}
