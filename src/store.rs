//! Record persistence and the flattened search table.
//!
//! Records are written one file per image as `<stem>.json`, pretty-printed
//! with a 4-space indent. Only fully parsed [`ExtractionRecord`]s reach
//! [`write_record`], so the results folder never holds unparseable content
//! produced by this crate.
//!
//! [`ResultTable::load`] reads the folder back into rows keyed by filename.
//! It reads files generically rather than through `ExtractionRecord`, so
//! records with extra keys or hand-edited values still load; files that are
//! not a JSON object are skipped with a logged error.

use crate::error::{ImageError, RxError};
use crate::pipeline::input::list_json;
use crate::record::{ExtractionRecord, SearchField};
use serde::{Serialize, Serializer};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Serialise `record` as JSON with a 4-space indent.
pub fn to_pretty_json(record: &ExtractionRecord) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    record.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write `record` to `dir/<stem>.json`, replacing any previous file atomically.
pub fn write_record(
    dir: &Path,
    stem: &str,
    file: &str,
    record: &ExtractionRecord,
) -> Result<PathBuf, ImageError> {
    let path = dir.join(format!("{stem}.json"));
    let write_err = |detail: String| ImageError::WriteFailed {
        file: file.to_string(),
        path: path.clone(),
        detail,
    };

    let json = to_pretty_json(record).map_err(|e| write_err(e.to_string()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(json.as_bytes())
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(&path).map_err(|e| write_err(e.error.to_string()))?;

    debug!("Saved {}", path.display());
    Ok(path)
}

/// Load every record in `dir` into a [`ResultTable`].
pub fn load_table(dir: &Path) -> Result<ResultTable, RxError> {
    ResultTable::load(dir)
}

// ── Table ────────────────────────────────────────────────────────────────

/// One stored record, flattened to the five searchable fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    /// Source filename, e.g. `rx_01.json`.
    pub file: String,
    /// Field values in schema order; `None` when absent or `null`.
    #[serde(serialize_with = "schema_ordered")]
    pub fields: Vec<(&'static str, Option<Value>)>,
}

/// Serialise field pairs as a JSON object, keeping their order.
fn schema_ordered<S: Serializer>(
    fields: &[(&'static str, Option<Value>)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(fields.iter().map(|(k, v)| (k, v)))
}

impl ResultRow {
    /// Build a row from a parsed JSON object.
    pub fn from_object(file: impl Into<String>, content: &serde_json::Map<String, Value>) -> Self {
        let fields = SearchField::ALL
            .iter()
            .map(|f| {
                let v = content.get(f.as_str()).filter(|v| !v.is_null()).cloned();
                (f.as_str(), v)
            })
            .collect();
        Self {
            file: file.into(),
            fields,
        }
    }

    pub fn get(&self, field: SearchField) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field.as_str())
            .and_then(|(_, v)| v.as_ref())
    }

    /// Case-insensitive substring match on `field`; null never matches.
    ///
    /// Text fields match on their value. `Medications` matches when any
    /// text inside any medication entry contains the needle.
    pub fn matches(&self, field: SearchField, needle: &str) -> bool {
        let Some(value) = self.get(field) else {
            return false;
        };
        let needle = needle.to_lowercase();
        let mut texts = Vec::new();
        collect_text(value, &mut texts);
        texts.iter().any(|t| t.to_lowercase().contains(&needle))
    }

    /// Multi-line rendering of every field, as printed by the query tool.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "File: {}", self.file);
        for f in SearchField::ALL {
            let shown = match self.get(f) {
                None => "null".to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            let _ = writeln!(out, "{}: {}", f.as_str(), shown);
        }
        out
    }
}

/// Gather the string/number/bool leaves of a JSON value.
fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
    }
}

/// In-memory view of every record in a results folder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultTable {
    pub rows: Vec<ResultRow>,
    /// Files that could not be loaded, with the reason.
    #[serde(skip)]
    pub skipped: Vec<(PathBuf, String)>,
}

impl ResultTable {
    /// Load every `*.json` file in `dir`.
    pub fn load(dir: &Path) -> Result<Self, RxError> {
        let mut table = ResultTable::default();

        for path in list_json(dir)? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<Value>(&s).map_err(|e| e.to_string()));

            match parsed {
                Ok(Value::Object(map)) => table.rows.push(ResultRow::from_object(name, &map)),
                Ok(_) => {
                    error!("Error decoding {}: top level is not an object", name);
                    table
                        .skipped
                        .push((path, "top level is not an object".to_string()));
                }
                Err(e) => {
                    error!("Error decoding {}: {}", name, e);
                    table.skipped.push((path, e));
                }
            }
        }

        debug!(
            "Loaded {} records ({} skipped) from {}",
            table.rows.len(),
            table.skipped.len(),
            dir.display()
        );
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows whose `field` contains `needle`, case-insensitively.
    pub fn search(&self, field: SearchField, needle: &str) -> Vec<&ResultRow> {
        self.rows
            .iter()
            .filter(|r| r.matches(field, needle))
            .collect()
    }

    /// Like [`Self::search`] but takes the field by name, rejecting names
    /// outside the schema.
    pub fn search_by_name(&self, field: &str, needle: &str) -> Result<Vec<&ResultRow>, RxError> {
        let field: SearchField = field.parse()?;
        Ok(self.search(field, needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Medication;
    use serde_json::json;

    fn row(file: &str, v: Value) -> ResultRow {
        ResultRow::from_object(file, v.as_object().unwrap())
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let json = to_pretty_json(&ExtractionRecord::default()).unwrap();
        assert!(json.contains("\n    \"Patient Name\": null"), "{json}");
    }

    #[test]
    fn case_insensitive_match_skips_null() {
        let jane = row("a.json", json!({"Patient Name": "Jane Doe"}));
        let nobody = row("b.json", json!({"Patient Name": null}));
        assert!(jane.matches(SearchField::PatientName, "jane"));
        assert!(jane.matches(SearchField::PatientName, "DOE"));
        assert!(!nobody.matches(SearchField::PatientName, "jane"));
        assert!(!nobody.matches(SearchField::PatientName, ""));
    }

    #[test]
    fn medications_match_inner_text() {
        let r = row(
            "m.json",
            json!({"Medications": [{"Name": "Amoxicillin", "Dosage": "500mg"}]}),
        );
        assert!(r.matches(SearchField::Medications, "amoxi"));
        assert!(r.matches(SearchField::Medications, "500MG"));
        assert!(!r.matches(SearchField::Medications, "ibuprofen"));
    }

    #[test]
    fn missing_key_is_null() {
        let r = row("x.json", json!({"Date": "2024-03-01"}));
        assert!(r.get(SearchField::DoctorName).is_none());
        assert_eq!(r.fields.len(), 5);
    }

    #[test]
    fn json_keeps_schema_field_order() {
        let r = row(
            "x.json",
            json!({
                "Special Instructions": "after food",
                "Date": "2024-03-01",
                "Patient Name": "Ann",
            }),
        );
        let text = serde_json::to_string(&r).unwrap();
        let positions: Vec<usize> = SearchField::ALL
            .iter()
            .map(|f| text.find(&format!("\"{}\"", f.as_str())).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{text}");
        assert!(text.starts_with("{\"file\":\"x.json\",\"fields\":{\"Patient Name\""));
    }

    #[test]
    fn render_lists_every_field() {
        let r = row("x.json", json!({"Patient Name": "Jane Doe", "Medications": []}));
        let text = r.render();
        assert!(text.starts_with("File: x.json\n"));
        assert!(text.contains("Patient Name: Jane Doe\n"));
        assert!(text.contains("Doctor Name: null\n"));
        assert!(text.contains("Medications: []\n"));
    }

    #[test]
    fn write_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let record = ExtractionRecord {
            patient_name: Some("Jane Doe".into()),
            doctor_name: Some("Dr. Rao".into()),
            date: Some("2024-05-17".into()),
            medications: Some(vec![Medication {
                name: Some("Paracetamol".into()),
                dosage: Some("650mg".into()),
                frequency: Some("TDS".into()),
                duration: None,
            }]),
            special_instructions: None,
        };
        let path = write_record(dir.path(), "rx_01", "rx_01.jpg", &record).unwrap();
        assert_eq!(path, dir.path().join("rx_01.json"));

        let table = ResultTable::load(dir.path()).unwrap();
        assert_eq!(table.len(), 1);
        let loaded = &table.rows[0];
        let expected = serde_json::to_value(&record).unwrap();
        for f in SearchField::ALL {
            let want = expected.get(f.as_str()).filter(|v| !v.is_null());
            assert_eq!(loaded.get(f), want, "field {f}");
        }
    }

    #[test]
    fn malformed_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.json"), r#"{"Patient Name": "Ann"}"#).unwrap();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("list.json"), "[1, 2]").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let table = ResultTable::load(dir.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].file, "good.json");
        assert_eq!(table.skipped.len(), 2);
    }

    #[test]
    fn search_by_name_rejects_unknown_field() {
        let table = ResultTable::default();
        let err = table.search_by_name("Pharmacy", "x").unwrap_err();
        let msg = err.to_string();
        for name in SearchField::names() {
            assert!(msg.contains(&name), "{msg}");
        }
    }
}
