//! Video/canvas frame-health check.
//!
//! Catches the three ways a game canvas renders "nothing": a black frame,
//! a transparent frame, and a monochrome frame (asset load failure leaves a
//! flat fill). Operates on a PNG screenshot of the canvas/video element.

use image::GenericImageView;
use serde::{Deserialize, Serialize};

/// Detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoThresholds {
    /// Mean RGB below this is a black frame
    #[serde(default = "default_black")]
    pub black: f64,
    /// Mean alpha below this is a transparent frame
    #[serde(default = "default_transparent")]
    pub transparent: f64,
    /// RGB standard deviation below this is a monochrome frame
    #[serde(default = "default_monochrome")]
    pub monochrome: f64,
}

impl Default for VideoThresholds {
    fn default() -> Self {
        Self {
            black: default_black(),
            transparent: default_transparent(),
            monochrome: default_monochrome(),
        }
    }
}

fn default_black() -> f64 {
    10.0
}
fn default_transparent() -> f64 {
    10.0
}
fn default_monochrome() -> f64 {
    5.0
}

impl VideoThresholds {
    /// Read thresholds from a step/profile config value, e.g.
    /// `{"threshold": {"black": 12.0}}`; missing keys keep defaults.
    pub fn from_config(config: &serde_json::Value) -> Self {
        config
            .get("threshold")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Check one captured frame. Returns `(healthy, message)`.
pub fn check_frame(png_bytes: &[u8], thresholds: &VideoThresholds) -> (bool, String) {
    let img = match image::load_from_memory(png_bytes) {
        Ok(img) => img,
        Err(err) => return (false, format!("cannot decode frame: {}", err)),
    };

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return (false, "empty frame".to_string());
    }

    let rgba = img.to_rgba8();
    let pixel_count = (width * height) as f64;

    let mut rgb_sum = 0.0;
    let mut alpha_sum = 0.0;
    for pixel in rgba.pixels() {
        rgb_sum += (pixel[0] as f64 + pixel[1] as f64 + pixel[2] as f64) / 3.0;
        alpha_sum += pixel[3] as f64;
    }
    let rgb_mean = rgb_sum / pixel_count;
    let alpha_mean = alpha_sum / pixel_count;

    if rgb_mean < thresholds.black {
        return (false, format!("black frame (mean luminance {:.2})", rgb_mean));
    }

    if alpha_mean < thresholds.transparent {
        return (false, format!("transparent frame (mean alpha {:.2})", alpha_mean));
    }

    // Standard deviation over every RGB channel value.
    let channel_count = pixel_count * 3.0;
    let mut channel_sum = 0.0;
    for pixel in rgba.pixels() {
        channel_sum += pixel[0] as f64 + pixel[1] as f64 + pixel[2] as f64;
    }
    let channel_mean = channel_sum / channel_count;
    let mut variance = 0.0;
    for pixel in rgba.pixels() {
        for c in 0..3 {
            let d = pixel[c] as f64 - channel_mean;
            variance += d * d;
        }
    }
    let std = (variance / channel_count).sqrt();

    if std < thresholds.monochrome {
        return (
            false,
            format!("monochrome frame, likely unloaded (stddev {:.2})", std),
        );
    }

    (true, "video frame looks healthy".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_of(img: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_black_frame_detected() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([2, 2, 2])));
        let (ok, msg) = check_frame(&png_of(img), &VideoThresholds::default());
        assert!(!ok);
        assert!(msg.contains("black"));
    }

    #[test]
    fn test_transparent_frame_detected() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 32, Rgba([120, 120, 120, 0])));
        let (ok, msg) = check_frame(&png_of(img), &VideoThresholds::default());
        assert!(!ok);
        assert!(msg.contains("transparent"));
    }

    #[test]
    fn test_monochrome_frame_detected() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([120, 120, 120])));
        let (ok, msg) = check_frame(&png_of(img), &VideoThresholds::default());
        assert!(!ok);
        assert!(msg.contains("monochrome"));
    }

    #[test]
    fn test_structured_frame_passes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, y| {
            Rgb([(x * 8) as u8, (y * 8) as u8, 128])
        }));
        let (ok, _) = check_frame(&png_of(img), &VideoThresholds::default());
        assert!(ok);
    }

    #[test]
    fn test_thresholds_from_config() {
        let config = serde_json::json!({"threshold": {"black": 20.0}});
        let thresholds = VideoThresholds::from_config(&config);
        assert_eq!(thresholds.black, 20.0);
        assert_eq!(thresholds.monochrome, 5.0);
    }
}
