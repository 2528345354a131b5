//! Locate and parse the JSON object inside a model answer.
//!
//! Even when told to answer with bare JSON, models sometimes prepend
//! "Here is the extracted data:" or wrap the object in a ```json fence.
//! The scan takes the greedy span from the first `{` to the last `}` (dot
//! matches newline) and parses only that.
//!
//! Two failure modes are kept apart because they mean different things:
//! no span at all (the model refused or described the image) versus a span
//! that is not a valid record (truncated or hallucinated syntax).

use crate::record::ExtractionRecord;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_JSON_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Why a model answer did not yield a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// No `{...}` span in the text.
    NoJson,
    /// A span was found but did not parse as a record.
    Malformed(String),
}

/// Return the greedy `{...}` span of `text`, if any.
pub fn locate_json(text: &str) -> Option<&str> {
    RE_JSON_SPAN.find(text).map(|m| m.as_str())
}

/// Locate the JSON span and parse it into an [`ExtractionRecord`].
pub fn parse_record(text: &str) -> Result<ExtractionRecord, ScanError> {
    let span = locate_json(text).ok_or(ScanError::NoJson)?;
    serde_json::from_str(span).map_err(|e| ScanError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_surrounding_prose() {
        let text = "Sure! Here is the JSON:\n{\"Patient Name\": \"Jane\"}\nLet me know if you need more.";
        assert_eq!(locate_json(text), Some("{\"Patient Name\": \"Jane\"}"));
    }

    #[test]
    fn span_crosses_newlines_and_nested_braces() {
        let text = "```json\n{\n  \"Medications\": [\n    {\"Name\": \"Ibuprofen\"}\n  ]\n}\n```";
        let span = locate_json(text).unwrap();
        assert!(span.starts_with('{') && span.ends_with('}'));
        let rec = parse_record(text).unwrap();
        assert_eq!(
            rec.medications.unwrap()[0].name.as_deref(),
            Some("Ibuprofen")
        );
    }

    #[test]
    fn no_braces_is_no_json() {
        assert_eq!(
            parse_record("I cannot read this prescription."),
            Err(ScanError::NoJson)
        );
    }

    #[test]
    fn broken_span_is_malformed() {
        match parse_record("{\"Patient Name\": \"Jane\",, }") {
            Err(ScanError::Malformed(detail)) => assert!(!detail.is_empty()),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn greedy_span_covers_two_objects() {
        // Two objects side by side form one invalid span.
        let text = "{\"Date\": \"2024-01-01\"} and {\"Date\": \"2024-02-02\"}";
        assert!(matches!(parse_record(text), Err(ScanError::Malformed(_))));
    }
}
