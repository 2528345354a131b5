//! Pipeline stages for prescription extraction.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and can be swapped (another OCR backend, another endpoint) without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ enhance ──▶ encode ──▶ client ──▶ scan ──▶ store
//! (folder)  (filters)   (base64)   (VLM)      (JSON)
//! ```
//!
//! 1. [`input`]: list the scans in a folder
//! 2. [`enhance`]: grayscale, NL-means, CLAHE, sharpen, resize; runs in
//!    `spawn_blocking` because the filters are CPU-bound
//! 3. [`encode`]: base64-wrap the enhanced file for the request body
//! 4. [`client`]: drive the vision call with retry/backoff; the only
//!    stage with network I/O
//! 5. [`scan`]: cut the JSON object out of the model's free text
//!
//! [`ocr`] measures what enhancement did for text recognition and
//! [`pacing`] owns every wait the pipeline performs.

pub mod client;
pub mod encode;
pub mod enhance;
pub mod input;
pub mod ocr;
pub mod pacing;
pub mod scan;
