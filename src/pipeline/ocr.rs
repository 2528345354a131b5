//! OCR before/after measurement for the enhancement stage.
//!
//! Runs a text-recognition pass over the original and the enhanced image and
//! records how many more (or fewer) characters were recognised, as a
//! percentage of the original count. This is observability only: nothing
//! downstream depends on it, and any backend implementing
//! [`TextRecognizer`] can be plugged in.
//!
//! The default backend shells out to `tesseract` (`--oem 3 --psm 6`: LSTM
//! engine, one uniform block of text).

use crate::error::{ImageError, RxError};
use image::{DynamicImage, GrayImage, ImageFormat};
use serde::Serialize;
use std::path::Path;
use std::process::Command;
use tracing::warn;

/// A text-recognition engine.
pub trait TextRecognizer: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &str;

    /// Whether the backend can run on this machine.
    fn is_available(&self) -> bool;

    /// Installation hint shown when unavailable.
    fn availability_hint(&self) -> String;

    /// Recognise the text in the image stored at `path`.
    fn recognize_file(&self, path: &Path) -> Result<String, String>;

    /// Recognise the text in an in-memory image.
    ///
    /// The default writes a temporary PNG and calls [`Self::recognize_file`].
    fn recognize(&self, img: &DynamicImage) -> Result<String, String> {
        let tmp = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| e.to_string())?;
        img.save_with_format(tmp.path(), ImageFormat::Png)
            .map_err(|e| e.to_string())?;
        self.recognize_file(tmp.path())
    }
}

/// Fail fast when the backend is missing.
pub fn ensure_available(recognizer: &dyn TextRecognizer) -> Result<(), RxError> {
    if recognizer.is_available() {
        Ok(())
    } else {
        Err(RxError::OcrUnavailable {
            backend: recognizer.name().to_string(),
            hint: recognizer.availability_hint(),
        })
    }
}

// ── Tesseract ────────────────────────────────────────────────────────────

/// Tesseract OCR via its command-line binary.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    binary: String,
    language: String,
}

impl TesseractBackend {
    pub fn new() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for TesseractBackend {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn availability_hint(&self) -> String {
        format!(
            "Tesseract OCR is not installed or '{}' is not in PATH.\n\
             Install with: apt install tesseract-ocr (or brew install tesseract)",
            self.binary
        )
    }

    fn recognize_file(&self, path: &Path) -> Result<String, String> {
        let output = Command::new(&self.binary)
            .arg(path)
            .arg("stdout")
            .args(["-l", &self.language, "--oem", "3", "--psm", "6"])
            .output()
            .map_err(|e| format!("failed to run {}: {e}", self.binary))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

// ── Measurement ──────────────────────────────────────────────────────────

/// Percentage change in recognised characters, or `None` when the original
/// had no text to compare against.
pub fn improvement_percent(original_chars: usize, enhanced_chars: usize) -> Option<f64> {
    if original_chars == 0 {
        return None;
    }
    Some((enhanced_chars as f64 - original_chars as f64) / original_chars as f64 * 100.0)
}

/// Run OCR on both buffers and return the improvement for one image.
///
/// `Ok(None)` means the original yielded no text and the image is left out
/// of the distribution.
pub fn measure_improvement(
    recognizer: &dyn TextRecognizer,
    file: &str,
    original: &DynamicImage,
    enhanced: &GrayImage,
) -> Result<Option<f64>, ImageError> {
    let fail = |detail: String| ImageError::ProcessingFailed {
        file: file.to_string(),
        detail,
    };
    let before = recognizer.recognize(original).map_err(fail)?;
    let after = recognizer
        .recognize(&DynamicImage::ImageLuma8(enhanced.clone()))
        .map_err(fail)?;

    let before_chars = before.trim().chars().count();
    let after_chars = after.trim().chars().count();
    let score = improvement_percent(before_chars, after_chars);
    if score.is_none() {
        warn!("{}: no text detected in original image, skipping", file);
    }
    Ok(score)
}

/// Distribution of OCR improvements across a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImprovementReport {
    /// `(filename, percent)` in processing order.
    pub scores: Vec<(String, f64)>,
}

/// One histogram bucket `[lower, upper)`; the last bucket is closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

impl ImprovementReport {
    pub fn push(&mut self, file: impl Into<String>, percent: f64) {
        self.scores.push((file.into(), percent));
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.iter().map(|(_, s)| s).sum::<f64>() / self.scores.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.scores.iter().map(|(_, s)| *s).reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.scores.iter().map(|(_, s)| *s).reduce(f64::max)
    }

    /// Equal-width histogram over `[min, max]`.
    pub fn histogram(&self, bins: usize) -> Vec<Bucket> {
        let (Some(lo), Some(hi)) = (self.min(), self.max()) else {
            return Vec::new();
        };
        let bins = bins.max(1);
        let width = if hi > lo { (hi - lo) / bins as f64 } else { 1.0 };

        let mut buckets: Vec<Bucket> = (0..bins)
            .map(|i| Bucket {
                lower: lo + i as f64 * width,
                upper: lo + (i + 1) as f64 * width,
                count: 0,
            })
            .collect();

        for (_, s) in &self.scores {
            let idx = (((s - lo) / width) as usize).min(bins - 1);
            buckets[idx].count += 1;
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Canned {
        replies: Mutex<Vec<&'static str>>,
    }

    impl TextRecognizer for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        fn is_available(&self) -> bool {
            true
        }
        fn availability_hint(&self) -> String {
            String::new()
        }
        fn recognize_file(&self, _path: &Path) -> Result<String, String> {
            Ok(self.replies.lock().unwrap().remove(0).to_string())
        }
    }

    struct Missing;

    impl TextRecognizer for Missing {
        fn name(&self) -> &str {
            "missing"
        }
        fn is_available(&self) -> bool {
            false
        }
        fn availability_hint(&self) -> String {
            "install it".into()
        }
        fn recognize_file(&self, _path: &Path) -> Result<String, String> {
            Err("unavailable".into())
        }
    }

    #[test]
    fn improvement_math() {
        assert_eq!(improvement_percent(100, 150), Some(50.0));
        assert_eq!(improvement_percent(200, 100), Some(-50.0));
        assert_eq!(improvement_percent(0, 40), None);
    }

    #[test]
    fn measure_counts_trimmed_chars() {
        let ocr = Canned {
            replies: Mutex::new(vec!["  abcd \n", "abcdef\n\n"]),
        };
        let img = DynamicImage::ImageLuma8(GrayImage::new(4, 4));
        let score = measure_improvement(&ocr, "a.png", &img, &GrayImage::new(4, 4)).unwrap();
        assert_eq!(score, Some(50.0));
    }

    #[test]
    fn measure_skips_blank_original() {
        let ocr = Canned {
            replies: Mutex::new(vec!["   ", "text"]),
        };
        let img = DynamicImage::ImageLuma8(GrayImage::new(2, 2));
        assert_eq!(
            measure_improvement(&ocr, "b.png", &img, &GrayImage::new(2, 2)).unwrap(),
            None
        );
    }

    #[test]
    fn missing_backend_fails_fast() {
        let err = ensure_available(&Missing).unwrap_err();
        assert!(err.to_string().contains("install it"));
    }

    #[test]
    fn report_statistics() {
        let mut r = ImprovementReport::default();
        assert_eq!(r.mean(), None);
        r.push("a", 10.0);
        r.push("b", 30.0);
        r.push("c", -10.0);
        assert_eq!(r.mean(), Some(10.0));
        assert_eq!(r.min(), Some(-10.0));
        assert_eq!(r.max(), Some(30.0));
    }

    #[test]
    fn histogram_places_extremes() {
        let mut r = ImprovementReport::default();
        for (i, s) in [0.0, 5.0, 10.0, 20.0].iter().enumerate() {
            r.push(format!("f{i}"), *s);
        }
        let h = r.histogram(4);
        assert_eq!(h.len(), 4);
        assert_eq!(h.iter().map(|b| b.count).sum::<usize>(), 4);
        assert_eq!(h[0].count, 1);
        assert_eq!(h[1].count, 1);
        assert_eq!(h[2].count, 1);
        assert_eq!(h[3].count, 1);
    }

    #[test]
    fn histogram_single_value() {
        let mut r = ImprovementReport::default();
        r.push("only", 42.0);
        let h = r.histogram(20);
        assert_eq!(h[0].count, 1);
    }
}
