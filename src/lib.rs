//! # rxparse
//!
//! Turn photographed prescriptions into structured JSON records.
//!
//! ## Why this crate?
//!
//! Handwritten prescriptions photographed on a phone are noisy, unevenly lit
//! and often blurred. Plain OCR produces fragments. Instead this crate cleans
//! each scan with a fixed filter chain, asks a vision model to read it as a
//! pharmacist would, and keeps only answers that parse into a fixed record
//! schema. The records can then be searched field by field.
//!
//! ## Pipeline Overview
//!
//! ```text
//! scans/
//!  │
//!  ├─ 1. Enhance  grayscale, NL-means, CLAHE, sharpen, resize to 800 px
//!  ├─ 2. Encode   image bytes → base64 inline payload
//!  ├─ 3. Extract  Gemini generateContent, retry with doubling backoff
//!  ├─ 4. Scan     greedy {...} span → ExtractionRecord
//!  ├─ 5. Store    <stem>.json, 4-space indent
//!  └─ 6. Query    case-insensitive substring search over one field
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rxparse::{extract_folder, ApiKey, ExtractionClient, ExtractionConfig,
//!               GeminiTransport, NoopProgressCallback, TokioSleeper};
//! use rand::{rngs::StdRng, SeedableRng};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let transport = GeminiTransport::new(ApiKey::from_env()?, &config)?;
//!     let client = ExtractionClient::new(Arc::new(transport), Arc::new(TokioSleeper), config);
//!     let mut rng = StdRng::from_entropy();
//!     let tally = extract_folder(Path::new("enhanced"), &client, &mut rng, &NoopProgressCallback).await?;
//!     println!("{}", tally.summary_line());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `rxparse` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! rxparse = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{enhance_folder, extract_folder, extract_one};
pub use config::{ApiKey, EnhanceConfig, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ImageError, RxError, TransportError};
pub use output::{EnhanceSummary, ExtractionTally};
pub use pipeline::client::{ExtractionClient, GeminiTransport, Transport};
pub use pipeline::ocr::{ImprovementReport, TesseractBackend, TextRecognizer};
pub use pipeline::pacing::{Sleeper, TokioSleeper};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{ExtractionRecord, Medication, SearchField};
pub use store::{load_table, write_record, ResultRow, ResultTable};
