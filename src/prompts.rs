//! Instruction prompt for prescription extraction.
//!
//! Kept in one place so prompt changes never touch the retry or parsing
//! logic, and so tests can inspect the prompt without a live model.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::prompt`]; the constant here is used
//! only when no override is provided.

/// Default instruction prompt sent alongside each prescription image.
pub const EXTRACTION_PROMPT: &str = "You are a highly accurate medical document parser.\n\
Analyze the attached prescription image carefully.\n\
Extract the following fields into a valid JSON object:\n\
- Patient Name\n\
- Doctor Name\n\
- Date (format: YYYY-MM-DD if possible)\n\
- Medications: a list of objects, each with Name, Dosage, Frequency, Duration\n\
- Special Instructions\n\
\n\
Strict rules:\n\
- If any field is missing or unreadable, set its value to null.\n\
- DO NOT add any text outside the JSON object.\n\
- DO NOT write explanations.\n\
- Start your output directly with '{' and end with '}'.\n\
- If you understand, proceed.\n";
