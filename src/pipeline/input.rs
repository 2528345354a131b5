//! Input resolution: list the scans in a folder.
//!
//! Only `.png`, `.jpg` and `.jpeg` files (any case) are picked up; anything
//! else in the folder is ignored. The list is sorted by filename so two runs
//! over the same folder visit images in the same order.

use crate::error::RxError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions accepted as source images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Whether `path` has an accepted image extension.
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Filename stem used to key records: everything before the first `.`.
///
/// `scan.v2.jpg` becomes `scan`.
pub fn record_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => name,
    }
}

/// List image files directly inside `dir`, sorted by filename.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, RxError> {
    list_with(dir, is_image)
}

/// List `*.json` files directly inside `dir`, sorted by filename.
pub fn list_json(dir: &Path) -> Result<Vec<PathBuf>, RxError> {
    list_with(dir, |p| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "json")
            .unwrap_or(false)
    })
}

fn list_with(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>, RxError> {
    if !dir.is_dir() {
        return Err(RxError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| RxError::ReadDirFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RxError::ReadDirFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if path.is_file() && keep(&path) {
            files.push(path);
        }
    }
    files.sort();

    debug!("Found {} files in {}", files.len(), dir.display());
    Ok(files)
}

/// Create `dir` (and parents) if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), RxError> {
    std::fs::create_dir_all(dir).map_err(|e| RxError::OutputDirFailed {
        path: dir.to_path_buf(),
        source: e,
    })
}
