//! Batch result types.
//!
//! Both batch drivers are folds: every image yields a `Result`, and the
//! accumulator here absorbs it. Nothing in this module performs I/O, so the
//! counting rules are tested directly.

use crate::error::ImageError;
use crate::pipeline::enhance::EnhancedImage;
use crate::pipeline::ocr::ImprovementReport;
use serde::Serialize;
use std::path::PathBuf;

/// Result of an enhancement run over a folder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnhanceSummary {
    /// Images written, in processing order.
    pub processed: Vec<EnhancedImage>,
    /// Images that could not be enhanced.
    pub failures: Vec<ImageError>,
    /// OCR before/after measurement; empty when measurement was off.
    pub report: ImprovementReport,
    pub duration_ms: u64,
}

impl EnhanceSummary {
    pub fn record(&mut self, outcome: Result<EnhancedImage, ImageError>) {
        match outcome {
            Ok(img) => self.processed.push(img),
            Err(e) => self.failures.push(e),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.processed.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Running tally of an extraction run.
///
/// `failed()` is the sum of the per-kind counters, so the breakdown always
/// adds up to the headline number.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionTally {
    pub succeeded: usize,
    pub retries_exhausted: usize,
    pub no_json: usize,
    pub malformed_json: usize,
    /// Unreadable source files and failed writes.
    pub other: usize,
    /// Records written, in processing order.
    pub saved: Vec<PathBuf>,
    pub failures: Vec<ImageError>,
    pub duration_ms: u64,
}

impl ExtractionTally {
    /// Absorb one image's outcome.
    pub fn record(&mut self, outcome: Result<PathBuf, ImageError>) {
        match outcome {
            Ok(path) => {
                self.succeeded += 1;
                self.saved.push(path);
            }
            Err(e) => {
                match &e {
                    ImageError::RetriesExhausted { .. } => self.retries_exhausted += 1,
                    ImageError::NoJsonLocated { .. } => self.no_json += 1,
                    ImageError::MalformedJson { .. } => self.malformed_json += 1,
                    ImageError::DecodeFailed { .. }
                    | ImageError::ProcessingFailed { .. }
                    | ImageError::WriteFailed { .. } => self.other += 1,
                }
                self.failures.push(e);
            }
        }
    }

    /// Fold form of [`Self::record`].
    pub fn with(mut self, outcome: Result<PathBuf, ImageError>) -> Self {
        self.record(outcome);
        self
    }

    pub fn failed(&self) -> usize {
        self.retries_exhausted + self.no_json + self.malformed_json + self.other
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed()
    }

    /// `Finished. Successful: X, Failed: Y`
    pub fn summary_line(&self) -> String {
        format!(
            "Finished. Successful: {}, Failed: {}",
            self.succeeded,
            self.failed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: &str) -> ImageError {
        let file = "rx.jpg".to_string();
        match kind {
            "retry" => ImageError::RetriesExhausted {
                file,
                attempts: 5,
                detail: "429".into(),
            },
            "nojson" => ImageError::NoJsonLocated { file },
            "malformed" => ImageError::MalformedJson {
                file,
                detail: "EOF".into(),
            },
            _ => ImageError::WriteFailed {
                file,
                path: PathBuf::from("out/rx.json"),
                detail: "disk full".into(),
            },
        }
    }

    #[test]
    fn tally_counts_each_kind() {
        let tally = [
            Ok(PathBuf::from("out/a.json")),
            Err(err("retry")),
            Err(err("nojson")),
            Ok(PathBuf::from("out/b.json")),
            Err(err("malformed")),
            Err(err("write")),
            Err(err("nojson")),
        ]
        .into_iter()
        .fold(ExtractionTally::default(), ExtractionTally::with);

        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.retries_exhausted, 1);
        assert_eq!(tally.no_json, 2);
        assert_eq!(tally.malformed_json, 1);
        assert_eq!(tally.other, 1);
        assert_eq!(tally.failed(), 5);
        assert_eq!(tally.total(), 7);
        assert_eq!(tally.failures.len(), 5);
        assert_eq!(tally.saved.len(), 2);
    }

    #[test]
    fn summary_line_format() {
        let mut tally = ExtractionTally::default();
        tally.record(Ok(PathBuf::from("a.json")));
        tally.record(Err(err("retry")));
        assert_eq!(tally.summary_line(), "Finished. Successful: 1, Failed: 1");
    }

    #[test]
    fn enhance_summary_counts() {
        let mut s = EnhanceSummary::default();
        s.record(Ok(EnhancedImage {
            file: "a.png".into(),
            output_path: PathBuf::from("out/a.png"),
            source_width: 1600,
            source_height: 1200,
            width: 800,
            height: 600,
        }));
        s.record(Err(ImageError::DecodeFailed {
            file: "b.png".into(),
            detail: "truncated".into(),
        }));
        assert_eq!(s.succeeded(), 1);
        assert_eq!(s.failed(), 1);
    }
}
