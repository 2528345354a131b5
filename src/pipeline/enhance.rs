//! Image enhancement: the fixed filter chain applied to every scan.
//!
//! ```text
//! decode ──▶ grayscale ──▶ NL-means ──▶ CLAHE ──▶ sharpen ──▶ resize
//! ```
//!
//! The order matters: denoising before equalisation keeps CLAHE from
//! amplifying sensor noise, and sharpening after equalisation works on the
//! final contrast. Resizing last keeps every filter operating at source
//! resolution.
//!
//! ## Why spawn_blocking?
//!
//! NL-means scans a 21×21 neighbourhood for every pixel. On a phone photo
//! that is billions of operations, so [`enhance_file`] runs the chain on
//! the blocking pool rather than stalling a Tokio worker.

use crate::config::EnhanceConfig;
use crate::error::ImageError;
use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Luma};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 3×3 sharpening kernel: centre 9, every neighbour −1.
pub const SHARPEN_KERNEL: [[i32; 3]; 3] = [[-1, -1, -1], [-1, 9, -1], [-1, -1, -1]];

/// Metadata about one enhanced image written to disk.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EnhancedImage {
    pub file: String,
    pub output_path: PathBuf,
    pub source_width: u32,
    pub source_height: u32,
    pub width: u32,
    pub height: u32,
}

/// Decoded source plus its enhanced counterpart, kept for OCR measurement.
#[derive(Debug)]
pub struct EnhanceOutcome {
    pub image: EnhancedImage,
    pub original: DynamicImage,
    pub enhanced: GrayImage,
}

/// Single-channel conversion with BT.601 weights (0.299, 0.587, 0.114).
///
/// `to_luma8` would apply Rec.709 weights and shift mid-tones.
pub fn to_gray(img: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = img {
        return gray.clone();
    }
    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let v = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Run the full filter chain on a decoded image.
pub fn enhance(img: &DynamicImage, config: &EnhanceConfig) -> GrayImage {
    let gray = to_gray(img);
    let denoised = nl_means_denoise(
        &gray,
        config.denoise_strength,
        config.denoise_patch,
        config.denoise_search,
    );
    let equalised = clahe(&denoised, config.clahe_clip_limit, config.clahe_grid);
    let sharpened = sharpen(&equalised);
    resize_to_width(&sharpened, config.target_width)
}

/// Height that keeps the aspect ratio at `target_width` (integer floor, at least 1).
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return 1;
    }
    ((target_width as u64 * height as u64) / width as u64).max(1) as u32
}

/// Bilinear resize to `target_width`, height scaled proportionally.
pub fn resize_to_width(img: &GrayImage, target_width: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let target_height = scaled_height(w, h, target_width);
    image::imageops::resize(img, target_width, target_height, FilterType::Triangle)
}

// ── Non-local means ──────────────────────────────────────────────────────

/// Non-local-means denoising of a grayscale image.
///
/// Each output pixel is the weighted mean of the pixels in its
/// `search × search` neighbourhood, weighted by `exp(-d / h²)` where `d` is
/// the mean squared difference between the `patch × patch` windows around
/// the two pixels. Patch distances for one displacement are read off an
/// integral image, so the cost is `O(pixels × search²)`. Borders replicate.
pub fn nl_means_denoise(src: &GrayImage, h: f32, patch: u32, search: u32) -> GrayImage {
    let (w, ht) = src.dimensions();
    if w == 0 || ht == 0 || h <= 0.0 {
        return src.clone();
    }
    let (w, ht) = (w as i64, ht as i64);
    let pr = (patch / 2) as i64;
    let sr = (search / 2) as i64;

    let px = |x: i64, y: i64| -> f32 {
        src.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, ht - 1) as u32).0[0] as f32
    };

    // Squared differences are taken over the image grown by `pr` on each side.
    let dw = w + 2 * pr;
    let dh = ht + 2 * pr;
    let stride = (dw + 1) as usize;
    let mut integral = vec![0f64; stride * (dh + 1) as usize];

    let n = (w * ht) as usize;
    let mut num = vec![0f32; n];
    let mut den = vec![0f32; n];
    let area = ((2 * pr + 1) * (2 * pr + 1)) as f64;
    let h2 = (h as f64) * (h as f64);

    for dy in -sr..=sr {
        for dx in -sr..=sr {
            for j in 0..dh {
                let mut row = 0f64;
                for i in 0..dw {
                    let (x, y) = (i - pr, j - pr);
                    let d = px(x, y) - px(x + dx, y + dy);
                    row += (d * d) as f64;
                    let above = integral[j as usize * stride + i as usize + 1];
                    integral[(j as usize + 1) * stride + i as usize + 1] = above + row;
                }
            }

            let span = (2 * pr + 1) as usize;
            for y in 0..ht {
                for x in 0..w {
                    let (x0, y0) = (x as usize, y as usize);
                    let (x1, y1) = (x0 + span, y0 + span);
                    let sum = integral[y1 * stride + x1] - integral[y0 * stride + x1]
                        - integral[y1 * stride + x0]
                        + integral[y0 * stride + x0];
                    let dist = (sum / area).max(0.0);
                    let weight = (-dist / h2).exp() as f32;
                    let idx = (y * w + x) as usize;
                    num[idx] += weight * px(x + dx, y + dy);
                    den[idx] += weight;
                }
            }
        }
    }

    GrayImage::from_fn(w as u32, ht as u32, |x, y| {
        let idx = (y as i64 * w + x as i64) as usize;
        let v = if den[idx] > 0.0 {
            num[idx] / den[idx]
        } else {
            px(x as i64, y as i64)
        };
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

// ── CLAHE ────────────────────────────────────────────────────────────────

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into a `grid × grid` tile layout. When a side is not a
/// multiple of the grid, tiles read past the edge through a reflected border
/// (`dcb|abcd|cba`), so the grid is never reduced. Each tile's histogram is
/// clipped at `clip_limit × tile_area / 256`, the excess spread evenly over all bins,
/// and the resulting CDF becomes that tile's mapping. Pixels blend the
/// mappings of the four nearest tile centres bilinearly.
pub fn clahe(src: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let (tile_w, tile_h, tiles_x, tiles_y) = tile_layout(w, h, grid);
    let area = tile_w * tile_h;

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let mut hist = [0u32; 256];
            for y in ty * tile_h..(ty + 1) * tile_h {
                for x in tx * tile_w..(tx + 1) * tile_w {
                    let p = src.get_pixel(reflect_101(x, w), reflect_101(y, h));
                    hist[p.0[0] as usize] += 1;
                }
            }
            luts.push(tile_mapping(&mut hist, area, clip_limit));
        }
    }

    let lut = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];

    GrayImage::from_fn(w, h, |x, y| {
        let v = src.get_pixel(x, y).0[0] as usize;

        let tyf = y as f32 / tile_h as f32 - 0.5;
        let ty1f = tyf.floor();
        let ya = tyf - ty1f;
        let ty1 = (ty1f.max(0.0) as u32).min(tiles_y - 1);
        let ty2 = ((ty1f + 1.0).max(0.0) as u32).min(tiles_y - 1);

        let txf = x as f32 / tile_w as f32 - 0.5;
        let tx1f = txf.floor();
        let xa = txf - tx1f;
        let tx1 = (tx1f.max(0.0) as u32).min(tiles_x - 1);
        let tx2 = ((tx1f + 1.0).max(0.0) as u32).min(tiles_x - 1);

        let top = (1.0 - xa) * lut(tx1, ty1)[v] as f32 + xa * lut(tx2, ty1)[v] as f32;
        let bottom = (1.0 - xa) * lut(tx1, ty2)[v] as f32 + xa * lut(tx2, ty2)[v] as f32;
        let out = (1.0 - ya) * top + ya * bottom;
        Luma([out.round().clamp(0.0, 255.0) as u8])
    })
}

/// `(tile_w, tile_h, tiles_x, tiles_y)` for a `grid × grid` CLAHE layout.
pub fn tile_layout(w: u32, h: u32, grid: u32) -> (u32, u32, u32, u32) {
    let grid = grid.max(1);
    (w.div_ceil(grid), h.div_ceil(grid), grid, grid)
}

/// Mirror `i` into `0..n` without repeating the edge pixel.
fn reflect_101(i: u32, n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let m = i % period;
    if m < n {
        m
    } else {
        period - m
    }
}

/// Clip a tile histogram, redistribute the excess and return its CDF mapping.
fn tile_mapping(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let mut residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / area.max(1) as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cdf += bin;
        lut[i] = (cdf as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

// ── Sharpen ──────────────────────────────────────────────────────────────

/// Convolve with [`SHARPEN_KERNEL`], replicating border pixels.
pub fn sharpen(src: &GrayImage) -> GrayImage {
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let at = |x: i64, y: i64| -> i32 {
        src.get_pixel(
            x.clamp(0, w as i64 - 1) as u32,
            y.clamp(0, h as i64 - 1) as u32,
        )
        .0[0] as i32
    };
    GrayImage::from_fn(w, h, |x, y| {
        let mut acc = 0i32;
        for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
            for (kx, k) in row.iter().enumerate() {
                acc += k * at(x as i64 + kx as i64 - 1, y as i64 + ky as i64 - 1);
            }
        }
        Luma([acc.clamp(0, 255) as u8])
    })
}

// ── File I/O ─────────────────────────────────────────────────────────────

/// Decode a source image from disk, upright.
pub fn load_source(path: &Path) -> Result<DynamicImage, ImageError> {
    let file = file_label(path);
    let decode_err = |detail: String| ImageError::DecodeFailed {
        file: file.clone(),
        detail,
    };
    let bytes = std::fs::read(path).map_err(|e| decode_err(e.to_string()))?;
    decode_oriented(&bytes).map_err(|e| decode_err(e.to_string()))
}

/// Decode `bytes` and apply the EXIF Orientation tag, if any.
///
/// Phone cameras store pixels in sensor order and record the rotation in
/// EXIF; without this a portrait scan comes out lying on its side.
pub fn decode_oriented(bytes: &[u8]) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Encode `img` in the format implied by `path`'s extension and write it
/// atomically (temp file in the same folder, then rename).
pub fn save_image(img: &GrayImage, path: &Path) -> Result<(), ImageError> {
    let file = file_label(path);
    let write_err = |detail: String| ImageError::WriteFailed {
        file: file.clone(),
        path: path.to_path_buf(),
        detail,
    };

    let format = ImageFormat::from_path(path).map_err(|e| write_err(e.to_string()))?;
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| write_err(e.to_string()))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(&buf).map_err(|e| write_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
    Ok(())
}

/// Load, enhance and save one image under `output_dir` with the same filename.
///
/// No output is written when decoding fails.
pub async fn enhance_file(
    source: &Path,
    output_dir: &Path,
    config: &EnhanceConfig,
) -> Result<EnhanceOutcome, ImageError> {
    let file = file_label(source);
    let source = source.to_path_buf();
    let output_path = output_dir.join(&file);
    let cfg = config.clone();

    let (original, enhanced) = tokio::task::spawn_blocking(move || {
        let original = load_source(&source)?;
        let enhanced = enhance(&original, &cfg);
        Ok::<_, ImageError>((original, enhanced))
    })
    .await
    .map_err(|e| ImageError::ProcessingFailed {
        file: file.clone(),
        detail: format!("enhance task panicked: {e}"),
    })??;

    save_image(&enhanced, &output_path)?;

    debug!(
        "Enhanced {} {}x{} → {}x{}",
        file,
        original.width(),
        original.height(),
        enhanced.width(),
        enhanced.height()
    );

    Ok(EnhanceOutcome {
        image: EnhancedImage {
            file,
            output_path,
            source_width: original.width(),
            source_height: original.height(),
            width: enhanced.width(),
            height: enhanced.height(),
        },
        original,
        enhanced,
    })
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
