//! Error types for the rxparse library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RxError`] (**fatal**): the batch cannot proceed at all (missing
//!   credential, input folder absent, invalid configuration). Returned as
//!   `Err(RxError)` from the top-level batch functions.
//!
//! * [`ImageError`] (**non-fatal**): a single image failed (undecodable
//!   file, retries exhausted, no JSON in the model answer) but the rest of
//!   the batch is fine. Folded into the batch tally so callers can inspect
//!   partial success rather than losing the whole run to one bad scan.
//!
//! [`TransportError`] sits below both: it describes one failed HTTP attempt
//! and is only ever seen by the retry loop.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the rxparse library.
#[derive(Debug, Error)]
pub enum RxError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input folder was not found at the given path.
    #[error("Input folder not found: '{path}'\nCheck the path exists and is a directory.")]
    InputDirNotFound { path: PathBuf },

    /// Could not list or read the input folder.
    #[error("Failed to read folder '{path}': {source}")]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Credential errors ─────────────────────────────────────────────────
    /// The API credential is missing from the process environment.
    #[error("{var} environment variable not set!\nExport it before running: export {var}=...")]
    MissingCredential { var: String },

    // ── OCR errors ────────────────────────────────────────────────────────
    /// The text-recognition backend required for the improvement metric is absent.
    #[error("OCR backend '{backend}' is not available.\n{hint}")]
    OcrUnavailable { backend: String, hint: String },

    // ── Query errors ──────────────────────────────────────────────────────
    /// A search field outside the fixed record schema was requested.
    #[error("Invalid field name '{field}'. Please choose from: {}", .valid.join(", "))]
    InvalidSearchField { field: String, valid: Vec<String> },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create an output folder.
    #[error("Failed to create output folder '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single image.
///
/// The batch continues after any of these; each variant maps to its own
/// counter in [`crate::output::ExtractionTally`].
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// Source bytes could not be decoded as an image.
    #[error("{file}: unable to load image: {detail}")]
    DecodeFailed { file: String, detail: String },

    /// Enhancement or OCR measurement failed after decoding.
    #[error("{file}: processing failed: {detail}")]
    ProcessingFailed { file: String, detail: String },

    /// Every request attempt failed.
    #[error("{file}: all {attempts} attempts failed: {detail}")]
    RetriesExhausted {
        file: String,
        attempts: u32,
        detail: String,
    },

    /// The model answered, but no `{...}` span was present.
    #[error("{file}: no JSON found in model output")]
    NoJsonLocated { file: String },

    /// A `{...}` span was found but it is not a valid record.
    #[error("{file}: JSON parse error: {detail}")]
    MalformedJson { file: String, detail: String },

    /// Output could not be written.
    #[error("{file}: failed to write '{path}': {detail}")]
    WriteFailed {
        file: String,
        path: PathBuf,
        detail: String,
    },
}

impl ImageError {
    /// Filename of the image this error belongs to.
    pub fn file(&self) -> &str {
        match self {
            ImageError::DecodeFailed { file, .. }
            | ImageError::ProcessingFailed { file, .. }
            | ImageError::RetriesExhausted { file, .. }
            | ImageError::NoJsonLocated { file }
            | ImageError::MalformedJson { file, .. }
            | ImageError::WriteFailed { file, .. } => file,
        }
    }
}

/// One failed HTTP attempt against the vision endpoint.
///
/// Every variant is retried; [`TransportError::RateLimited`] is kept apart
/// so the retry loop can log it as such.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// HTTP 429.
    #[error("Too Many Requests (HTTP 429)")]
    RateLimited,

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS or timeout failure.
    #[error("network error: {0}")]
    Network(String),

    /// The response body did not contain `candidates[0].content.parts[0].text`.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
