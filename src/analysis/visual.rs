//! Reference-image comparison.
//!
//! Similarity is a weighted fusion of two signals computed on grayscale:
//! - windowed structural similarity (weight 0.7), robust for dynamic content
//! - histogram correlation (weight 0.3), comparing tonal distribution
//!
//! MSE/PSNR are carried along as reference metrics only. When the two
//! images disagree on dimensions, the smaller one (by pixel count) is
//! upscaled to the larger's dimensions — never cropped, so no comparable
//! content is lost.

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::surface::{Locator, UiSurface};

/// SSIM stabilization constants for 8-bit dynamic range
const SSIM_C1: f64 = 6.5025; // (0.01 * 255)^2
const SSIM_C2: f64 = 58.5225; // (0.03 * 255)^2

/// SSIM window edge in pixels
const SSIM_WINDOW: u32 = 8;

/// Detailed breakdown of one image comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityDetail {
    /// Structural similarity in [-1, 1]
    pub ssim: f64,

    /// Histogram correlation in [-1, 1]
    pub histogram_correlation: f64,

    /// Mean squared error (reference metric)
    pub mse: f64,

    /// Peak signal-to-noise ratio in dB (reference metric)
    pub psnr: f64,

    /// Whether one image was upscaled to match the other
    pub resized: bool,
}

/// Outcome of comparing the live surface against one reference image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceOutcome {
    /// Reference image file name
    pub reference_image: String,

    /// Whether the similarity met the threshold
    pub matched: bool,

    /// Fused similarity score in [0, 1]
    pub similarity: f64,

    /// Human-readable summary
    pub message: String,
}

/// Overall status of a stage comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Every reference image matched
    Passed,
    /// At least one reference image missed the threshold
    Failed,
    /// No reference material available; not a failure
    Skipped,
}

/// Result of comparing a stage against its full reference-image set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageComparison {
    pub status: StageStatus,

    /// Per-reference outcomes (empty when skipped)
    pub results: Vec<ReferenceOutcome>,

    pub total_images: usize,
    pub matched_images: usize,

    /// Why the stage was skipped, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageComparison {
    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            results: Vec::new(),
            total_images: 0,
            matched_images: 0,
            skip_reason: Some(reason.into()),
        }
    }

    /// A skipped stage counts as passing — comparison is optional
    /// infrastructure and its absence must not fail a test run.
    pub fn passed(&self) -> bool {
        !matches!(self.status, StageStatus::Failed)
    }
}

/// A crop region applied to both images before comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compare two images and return the fused similarity score with detail.
///
/// Degenerate (zero-pixel) input scores 0.0.
pub fn compare_images(reference: &DynamicImage, candidate: &DynamicImage) -> (f64, SimilarityDetail) {
    let mut detail = SimilarityDetail::default();

    let mut a = reference.to_luma8();
    let mut b = candidate.to_luma8();

    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        warn!("[VisualComparator] empty image, similarity is 0");
        return (0.0, detail);
    }

    if a.dimensions() != b.dimensions() {
        detail.resized = true;
        let a_pixels = (a.width() as u64) * (a.height() as u64);
        let b_pixels = (b.width() as u64) * (b.height() as u64);
        if a_pixels < b_pixels {
            a = image::imageops::resize(&a, b.width(), b.height(), FilterType::Lanczos3);
        } else {
            b = image::imageops::resize(&b, a.width(), a.height(), FilterType::Lanczos3);
        }
    }

    detail.ssim = block_ssim(&a, &b);
    detail.histogram_correlation = histogram_correlation(&a, &b);

    detail.mse = mean_squared_error(&a, &b);
    detail.psnr = if detail.mse > 0.0 {
        20.0 * (255.0 / detail.mse.sqrt()).log10()
    } else {
        f64::INFINITY
    };

    // SSIM lives in [-1, 1]; map to [0, 1]. Negative histogram correlation
    // carries no extra signal, clamp it at zero.
    let ssim_normalized = (detail.ssim + 1.0) / 2.0;
    let hist_normalized = detail.histogram_correlation.max(0.0);
    let similarity = ssim_normalized * 0.7 + hist_normalized * 0.3;

    debug!(
        "[VisualComparator] ssim={:.4} hist={:.4} combined={:.4}",
        detail.ssim, detail.histogram_correlation, similarity
    );
    (similarity, detail)
}

/// Mean-of-windows structural similarity over `SSIM_WINDOW` tiles.
fn block_ssim(a: &GrayImage, b: &GrayImage) -> f64 {
    let (width, height) = a.dimensions();
    let mut total = 0.0;
    let mut windows = 0usize;

    let mut y = 0;
    while y < height {
        let wh = SSIM_WINDOW.min(height - y);
        let mut x = 0;
        while x < width {
            let ww = SSIM_WINDOW.min(width - x);
            total += window_ssim(a, b, x, y, ww, wh);
            windows += 1;
            x += SSIM_WINDOW;
        }
        y += SSIM_WINDOW;
    }

    if windows == 0 { 0.0 } else { total / windows as f64 }
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = (w * h) as f64;
    let (mut sum_a, mut sum_b) = (0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            sum_a += a.get_pixel(x, y)[0] as f64;
            sum_b += b.get_pixel(x, y)[0] as f64;
        }
    }
    let mu_a = sum_a / n;
    let mu_b = sum_b / n;

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let da = a.get_pixel(x, y)[0] as f64 - mu_a;
            let db = b.get_pixel(x, y)[0] as f64 - mu_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    ((2.0 * mu_a * mu_b + SSIM_C1) * (2.0 * cov + SSIM_C2))
        / ((mu_a * mu_a + mu_b * mu_b + SSIM_C1) * (var_a + var_b + SSIM_C2))
}

/// Pearson correlation of the two 256-bin grayscale histograms.
fn histogram_correlation(a: &GrayImage, b: &GrayImage) -> f64 {
    let ha = histogram(a);
    let hb = histogram(b);

    let mean_a: f64 = ha.iter().sum::<f64>() / 256.0;
    let mean_b: f64 = hb.iter().sum::<f64>() / 256.0;

    let (mut num, mut den_a, mut den_b) = (0.0, 0.0, 0.0);
    for i in 0..256 {
        let da = ha[i] - mean_a;
        let db = hb[i] - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }

    let denominator = (den_a * den_b).sqrt();
    if denominator == 0.0 {
        // Both histograms flat: identical distributions.
        if den_a == 0.0 && den_b == 0.0 { 1.0 } else { 0.0 }
    } else {
        num / denominator
    }
}

fn histogram(img: &GrayImage) -> [f64; 256] {
    let mut bins = [0.0f64; 256];
    for pixel in img.pixels() {
        bins[pixel[0] as usize] += 1.0;
    }
    bins
}

fn mean_squared_error(a: &GrayImage, b: &GrayImage) -> f64 {
    let n = (a.width() * a.height()) as f64;
    let mut total = 0.0;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let d = pa[0] as f64 - pb[0] as f64;
        total += d * d;
    }
    total / n
}

fn crop_clamped(img: &DynamicImage, region: &Region) -> DynamicImage {
    let (w, h) = (img.width(), img.height());
    let x = region.x.min(w.saturating_sub(1));
    let y = region.y.min(h.saturating_sub(1));
    let cw = region.width.min(w - x).max(1);
    let ch = region.height.min(h - y).max(1);
    img.crop_imm(x, y, cw, ch)
}

/// Compare the live surface against one reference image on disk.
///
/// Failures (missing reference, element not found, decode errors) are
/// absorbed into a non-matching outcome — this runs inside test steps where
/// a comparison problem must not abort the flow.
pub fn compare_with_reference(
    surface: &mut dyn UiSurface,
    reference_path: &Path,
    locator: Option<&Locator>,
    threshold: f64,
    region: Option<&Region>,
) -> ReferenceOutcome {
    let name = reference_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| reference_path.display().to_string());

    let failed = |message: String| ReferenceOutcome {
        reference_image: name.clone(),
        matched: false,
        similarity: 0.0,
        message,
    };

    if !reference_path.exists() {
        return failed(format!("reference image not found: {}", reference_path.display()));
    }

    let reference = match image::open(reference_path) {
        Ok(img) => img,
        Err(err) => return failed(format!("cannot read reference image: {}", err)),
    };

    let screenshot = match locator {
        Some(locator) => match surface.locate(locator) {
            Some(element) => surface.screenshot_element(element),
            None => return failed(format!("element not found: {}", locator)),
        },
        None => surface.screenshot_page(),
    };
    let screenshot = match screenshot {
        Ok(bytes) => bytes,
        Err(err) => return failed(format!("screenshot failed: {}", err)),
    };

    let candidate = match image::load_from_memory(&screenshot) {
        Ok(img) => img,
        Err(err) => return failed(format!("cannot decode screenshot: {}", err)),
    };

    let (reference, candidate) = match region {
        Some(region) => (crop_clamped(&reference, region), crop_clamped(&candidate, region)),
        None => (reference, candidate),
    };

    let (similarity, detail) = compare_images(&reference, &candidate);
    let matched = similarity >= threshold;

    ReferenceOutcome {
        reference_image: name,
        matched,
        similarity,
        message: format!(
            "similarity {:.2}% ({}, threshold {:.2}%) | ssim {:.4}, histogram {:.4}",
            similarity * 100.0,
            if matched { "match" } else { "no match" },
            threshold * 100.0,
            detail.ssim,
            detail.histogram_correlation,
        ),
    }
}

/// Compare a stage against its reference-image set.
///
/// The stage passes only if every reference image individually passes. A
/// missing reference directory (or one with no images) is an automatic
/// pass-with-skip.
pub fn compare_stage(
    surface: &mut dyn UiSurface,
    stage_name: &str,
    reference_root: &Path,
    config: &serde_json::Value,
) -> StageComparison {
    let stage_dir = reference_root.join(stage_name);

    if !stage_dir.exists() {
        warn!(
            "[VisualComparator] no reference directory for stage {}: {}",
            stage_name,
            stage_dir.display()
        );
        return StageComparison::skipped("reference directory missing");
    }

    let threshold = config
        .get("threshold")
        .or_else(|| config.get("similarity_threshold"))
        .and_then(|v| v.as_f64())
        .unwrap_or(crate::config::get().analysis.similarity_threshold);
    let locator = config
        .get("selector")
        .and_then(|v| v.as_str())
        .map(Locator::new);
    let region: Option<Region> = config
        .get("region")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok());

    // A configured image list restricts the set; otherwise every image in
    // the stage directory is a reference.
    let named: Vec<String> = config
        .get("images")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let mut references: Vec<std::path::PathBuf> = if named.is_empty() {
        match std::fs::read_dir(&stage_dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
                        Some(ref ext) if ext == "png" || ext == "jpg" || ext == "jpeg"
                    )
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    } else {
        named
            .iter()
            .map(|n| stage_dir.join(n))
            .filter(|p| p.exists())
            .collect()
    };
    references.sort();

    if references.is_empty() {
        warn!("[VisualComparator] stage {} has no reference images", stage_name);
        return StageComparison::skipped("no reference images");
    }

    let mut results = Vec::with_capacity(references.len());
    let mut all_match = true;

    for reference in &references {
        let outcome =
            compare_with_reference(surface, reference, locator.as_ref(), threshold, region.as_ref());
        if outcome.matched {
            info!(
                "[VisualComparator] stage {} matched {}: {}",
                stage_name, outcome.reference_image, outcome.message
            );
        } else {
            all_match = false;
            warn!(
                "[VisualComparator] stage {} missed {}: {}",
                stage_name, outcome.reference_image, outcome.message
            );
        }
        results.push(outcome);
    }

    let matched_images = results.iter().filter(|r| r.matched).count();
    StageComparison {
        status: if all_match { StageStatus::Passed } else { StageStatus::Failed },
        total_images: results.len(),
        matched_images,
        results,
        skip_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn gradient_image(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = gradient_image(64, 64);
        let (score, detail) = compare_images(&img, &img);
        assert!(score > 0.99, "identical images scored {}", score);
        assert!((detail.ssim - 1.0).abs() < 1e-9);
        assert!(!detail.resized);
        assert_eq!(detail.mse, 0.0);
    }

    #[test]
    fn test_solid_color_scores_much_lower() {
        let structured = gradient_image(64, 64);
        let solid = solid_image(64, 64, [255, 255, 255]);
        let (identical, _) = compare_images(&structured, &structured);
        let (different, _) = compare_images(&structured, &solid);
        assert!(
            identical - different > 0.3,
            "identical {} vs solid {}",
            identical,
            different
        );
    }

    #[test]
    fn test_smaller_image_is_upscaled() {
        let large = gradient_image(64, 64);
        let small = gradient_image(32, 32);
        let (_, detail) = compare_images(&large, &small);
        assert!(detail.resized);
    }

    #[test]
    fn test_similar_solid_colors_correlate() {
        let a = solid_image(32, 32, [100, 100, 100]);
        let b = solid_image(32, 32, [100, 100, 100]);
        let (score, _) = compare_images(&a, &b);
        assert!(score > 0.99);
    }

    #[test]
    fn test_region_crop_clamps_to_bounds() {
        let img = gradient_image(40, 40);
        let region = Region { x: 30, y: 30, width: 100, height: 100 };
        let cropped = crop_clamped(&img, &region);
        assert_eq!(cropped.width(), 10);
        assert_eq!(cropped.height(), 10);
    }

    #[test]
    fn test_stage_missing_directory_is_pass_with_skip() {
        let dir = tempfile::tempdir().unwrap();
        let mut surface = crate::surface::MockSurface::new().starting_in_game();
        let comparison = compare_stage(
            &mut surface,
            "entry",
            &dir.path().join("reference_images"),
            &serde_json::json!({"enabled": true}),
        );
        assert_eq!(comparison.status, StageStatus::Skipped);
        assert!(comparison.passed());
    }

    #[test]
    fn test_stage_set_requires_every_reference_to_pass() {
        let dir = tempfile::tempdir().unwrap();
        let stage_dir = dir.path().join("entry");
        std::fs::create_dir_all(&stage_dir).unwrap();

        // MockSurface screenshots are solid [40, 90, 140] at 200x150.
        let matching = solid_image(200, 150, [40, 90, 140]);
        let clashing = solid_image(200, 150, [250, 250, 250]);
        matching.save(stage_dir.join("a_match.png")).unwrap();
        clashing.save(stage_dir.join("b_clash.png")).unwrap();

        let mut surface = crate::surface::MockSurface::new().starting_in_game();
        let comparison = compare_stage(
            &mut surface,
            "entry",
            dir.path(),
            &serde_json::json!({"enabled": true, "threshold": 0.9}),
        );
        assert_eq!(comparison.status, StageStatus::Failed);
        assert_eq!(comparison.total_images, 2);
        assert_eq!(comparison.matched_images, 1);
        assert!(!comparison.passed());
    }
}
