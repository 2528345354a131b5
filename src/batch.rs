//! Folder-level entry points.
//!
//! Both drivers walk a folder one image at a time, in filename order, and
//! fold each image's `Result` into a summary. A failing image is logged and
//! counted; only problems with the folders themselves are returned as
//! [`RxError`].

use crate::config::EnhanceConfig;
use crate::error::{ImageError, RxError};
use crate::output::{EnhanceSummary, ExtractionTally};
use crate::pipeline::client::ExtractionClient;
use crate::pipeline::enhance::{enhance_file, EnhancedImage};
use crate::pipeline::input::{ensure_dir, list_images, record_stem};
use crate::pipeline::ocr::{measure_improvement, TextRecognizer};
use crate::pipeline::pacing::pacing_delay;
use crate::pipeline::scan::{parse_record, ScanError};
use crate::progress::BatchProgressCallback;
use crate::store::write_record;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ── Enhancement ──────────────────────────────────────────────────────────

/// Enhance every image in `input_dir` into `output_dir`, keeping filenames.
///
/// When `recognizer` is given, each image is also OCR'd before and after
/// and the percentage change lands in [`EnhanceSummary::report`]. A failed
/// measurement is logged and does not fail the image.
pub async fn enhance_folder(
    input_dir: &Path,
    output_dir: &Path,
    config: &EnhanceConfig,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    progress: &dyn BatchProgressCallback,
) -> Result<EnhanceSummary, RxError> {
    config.validate()?;
    let start = Instant::now();
    let images = list_images(input_dir)?;
    ensure_dir(output_dir)?;

    let total = images.len();
    info!(
        "Enhancing {} images from {} into {}",
        total,
        input_dir.display(),
        output_dir.display()
    );
    progress.on_batch_start(total);

    let mut summary = EnhanceSummary::default();
    for (i, path) in images.iter().enumerate() {
        let file = file_name(path);
        progress.on_image_start(i + 1, total, &file);

        let outcome = enhance_one(path, output_dir, config, recognizer.clone(), &mut summary).await;
        match &outcome {
            Ok(img) => {
                info!("Processed {} ({}x{})", img.file, img.width, img.height);
                progress.on_image_complete(i + 1, total, &file);
            }
            Err(e) => {
                warn!("{}", e);
                progress.on_image_error(i + 1, total, &file, &e.to_string());
            }
        }
        summary.record(outcome);
    }

    summary.duration_ms = start.elapsed().as_millis() as u64;
    progress.on_batch_complete(summary.succeeded(), summary.failed());
    info!(
        "Enhancement done: {} succeeded, {} failed in {}ms",
        summary.succeeded(),
        summary.failed(),
        summary.duration_ms
    );
    Ok(summary)
}

async fn enhance_one(
    path: &Path,
    output_dir: &Path,
    config: &EnhanceConfig,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    summary: &mut EnhanceSummary,
) -> Result<EnhancedImage, ImageError> {
    let outcome = enhance_file(path, output_dir, config).await?;
    let Some(ocr) = recognizer else {
        return Ok(outcome.image);
    };

    let file = outcome.image.file.clone();
    let original = outcome.original;
    let enhanced = outcome.enhanced;
    let label = file.clone();
    let measured = tokio::task::spawn_blocking(move || {
        measure_improvement(ocr.as_ref(), &label, &original, &enhanced)
    })
    .await
    .map_err(|e| ImageError::ProcessingFailed {
        file: file.clone(),
        detail: format!("OCR task panicked: {e}"),
    })
    .and_then(|r| r);

    match measured {
        Ok(Some(score)) => {
            debug!("{}: OCR improvement {:.2}%", file, score);
            summary.report.push(file, score);
        }
        Ok(None) => {}
        Err(e) => warn!("OCR measurement skipped: {}", e),
    }
    Ok(outcome.image)
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Send every image in `input_dir` to the vision model and save the records
/// into the client's output folder.
///
/// After each image, whatever its outcome, the driver pauses for a duration
/// drawn from the configured pacing window using `rng`.
pub async fn extract_folder<R: Rng + ?Sized>(
    input_dir: &Path,
    client: &ExtractionClient,
    rng: &mut R,
    progress: &dyn BatchProgressCallback,
) -> Result<ExtractionTally, RxError> {
    let start = Instant::now();
    let images = list_images(input_dir)?;
    let config = client.config();
    ensure_dir(&config.output_dir)?;

    let total = images.len();
    info!(
        "Extracting {} images from {} with {}",
        total,
        input_dir.display(),
        config.model
    );
    progress.on_batch_start(total);

    let mut tally = ExtractionTally::default();
    for (i, path) in images.iter().enumerate() {
        let file = file_name(path);
        info!("Processing {} ({}/{})", file, i + 1, total);
        progress.on_image_start(i + 1, total, &file);

        let outcome = extract_one(client, path, &config.output_dir).await;
        match &outcome {
            Ok(saved) => {
                info!("Saved {}", saved.display());
                progress.on_image_complete(i + 1, total, &file);
            }
            Err(e) => {
                warn!("{}", e);
                progress.on_image_error(i + 1, total, &file, &e.to_string());
            }
        }
        tally.record(outcome);

        let pause = pacing_delay(rng, config.pacing_min, config.pacing_max);
        debug!("Pausing {:.1}s", pause.as_secs_f64());
        progress.on_pause(pause.as_secs_f64());
        client.pause(pause).await;
    }

    tally.duration_ms = start.elapsed().as_millis() as u64;
    progress.on_batch_complete(tally.succeeded, tally.failed());
    info!("{}", tally.summary_line());
    Ok(tally)
}

/// Extract one image and write its record; no file is written on failure.
pub async fn extract_one(
    client: &ExtractionClient,
    path: &Path,
    output_dir: &Path,
) -> Result<PathBuf, ImageError> {
    let file = file_name(path);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ImageError::DecodeFailed {
            file: file.clone(),
            detail: e.to_string(),
        })?;

    let answer = client.request_extraction(&file, &bytes).await?;
    let record = parse_record(&answer).map_err(|e| match e {
        ScanError::NoJson => ImageError::NoJsonLocated { file: file.clone() },
        ScanError::Malformed(detail) => ImageError::MalformedJson {
            file: file.clone(),
            detail,
        },
    })?;

    write_record(output_dir, &record_stem(path), &file, &record)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
