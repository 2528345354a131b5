//! The fixed prescription record schema.
//!
//! [`ExtractionRecord`] serialises with the exact key names and order of the
//! persisted JSON files. Every field is optional and always emitted; a field
//! the model left out deserialises to `None` and is written back as `null`.
//!
//! Models occasionally answer `"Dosage": 500` instead of `"500"`. Scalars
//! are accepted for string fields and stored as their text; objects or
//! arrays where a string belongs make the record invalid.

use crate::error::RxError;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One parsed prescription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(rename = "Patient Name", default, deserialize_with = "lenient_string")]
    pub patient_name: Option<String>,

    #[serde(rename = "Doctor Name", default, deserialize_with = "lenient_string")]
    pub doctor_name: Option<String>,

    /// `YYYY-MM-DD` when the model could normalise it, otherwise best effort.
    #[serde(rename = "Date", default, deserialize_with = "lenient_string")]
    pub date: Option<String>,

    #[serde(rename = "Medications", default)]
    pub medications: Option<Vec<Medication>>,

    #[serde(rename = "Special Instructions", default, deserialize_with = "lenient_string")]
    pub special_instructions: Option<String>,
}

/// One medication line of a prescription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medication {
    #[serde(rename = "Name", default, deserialize_with = "lenient_string")]
    pub name: Option<String>,

    #[serde(rename = "Dosage", default, deserialize_with = "lenient_string")]
    pub dosage: Option<String>,

    #[serde(rename = "Frequency", default, deserialize_with = "lenient_string")]
    pub frequency: Option<String>,

    #[serde(rename = "Duration", default, deserialize_with = "lenient_string")]
    pub duration: Option<String>,
}

/// Accept string, number, bool or null for an optional text field.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        serde_json::Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string or null, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// ── Search fields ────────────────────────────────────────────────────────

/// The five top-level fields a stored record can be searched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchField {
    PatientName,
    DoctorName,
    Date,
    Medications,
    SpecialInstructions,
}

impl SearchField {
    /// Every field, in schema order.
    pub const ALL: [SearchField; 5] = [
        SearchField::PatientName,
        SearchField::DoctorName,
        SearchField::Date,
        SearchField::Medications,
        SearchField::SpecialInstructions,
    ];

    /// The JSON key of this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchField::PatientName => "Patient Name",
            SearchField::DoctorName => "Doctor Name",
            SearchField::Date => "Date",
            SearchField::Medications => "Medications",
            SearchField::SpecialInstructions => "Special Instructions",
        }
    }

    /// All JSON keys, in schema order.
    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|f| f.as_str().to_string()).collect()
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchField {
    type Err = RxError;

    /// Exact, case-sensitive match on the JSON key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| RxError::InvalidSearchField {
                field: s.to_string(),
                valid: Self::names(),
            })
    }
}
