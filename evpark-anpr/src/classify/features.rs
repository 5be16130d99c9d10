//! Plate crop preprocessing and colour histogram features
//!
//! Pipeline: clamp-crop the plate box, resize to the target size, rotate by
//! the plate angle about the centre (zero fill), convert to 8-bit HSV
//! (H in 0..180, S and V in 0..=255), then count a 256-bin histogram per
//! channel. The three histograms concatenated give the 768-value vector the
//! scorers were trained on.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::ClassifyError;
use crate::recognition::PlateArea;

pub const HISTOGRAM_BINS: usize = 256;
pub const FEATURE_LEN: usize = HISTOGRAM_BINS * 3;

/// Pixels in H, S, V channel order
pub type HsvImage = RgbImage;

/// Crop, resize, rotate and convert one plate region
pub fn preprocess(frame: &RgbImage, area: &PlateArea, target: (u32, u32)) -> Result<HsvImage, ClassifyError> {
    let cropped = crop_clamped(frame, area)?;
    let resized = imageops::resize(&cropped, target.0, target.1, FilterType::Triangle);
    let rotated = if area.angle != 0.0 {
        rotate_about_center(&resized, area.angle)
    } else {
        resized
    };
    Ok(to_hsv(&rotated))
}

/// Crop the plate box, clamped to the frame bounds
pub fn crop_clamped(frame: &RgbImage, area: &PlateArea) -> Result<RgbImage, ClassifyError> {
    let (img_w, img_h) = (frame.width() as i64, frame.height() as i64);
    let (x, y) = (area.x as i64, area.y as i64);
    let (w, h) = (area.width as i64, area.height as i64);

    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = x.saturating_add(w).min(img_w);
    let y2 = y.saturating_add(h).min(img_h);

    if x2 <= x1 || y2 <= y1 {
        return Err(ClassifyError::Preprocess(format!(
            "empty crop after clamping box ({x}, {y}, {w}, {h}) to {img_w}x{img_h}"
        )));
    }

    Ok(imageops::crop_imm(frame, x1 as u32, y1 as u32, (x2 - x1) as u32, (y2 - y1) as u32).to_image())
}

/// Rotate counter-clockwise by `angle_deg` about the integer centre,
/// keeping the size; uncovered pixels are black
pub fn rotate_about_center(image: &RgbImage, angle_deg: f64) -> RgbImage {
    let (w, h) = image.dimensions();
    let cx = (w / 2) as f64;
    let cy = (h / 2) as f64;
    let (sin, cos) = angle_deg.to_radians().sin_cos();

    let mut out = RgbImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        // inverse mapping: destination pixel back into the source
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        *pixel = sample_bilinear(image, sx, sy);
    }
    out
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    if x < -1.0 || y < -1.0 || x >= w as f64 || y >= h as f64 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |xi: f64, yi: f64| -> [f64; 3] {
        if xi < 0.0 || yi < 0.0 || xi >= w as f64 || yi >= h as f64 {
            [0.0; 3]
        } else {
            let p = image.get_pixel(xi as u32, yi as u32).0;
            [p[0] as f64, p[1] as f64, p[2] as f64]
        }
    };

    let p00 = fetch(x0, y0);
    let p10 = fetch(x0 + 1.0, y0);
    let p01 = fetch(x0, y0 + 1.0);
    let p11 = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// 8-bit HSV with hue halved into 0..180
pub fn to_hsv(image: &RgbImage) -> HsvImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (src, dst) in image.pixels().zip(out.pixels_mut()) {
        *dst = Rgb(rgb_to_hsv(src.0));
    }
    out
}

pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v > 0.0 { diff * 255.0 / v } else { 0.0 };

    let mut hue = if diff == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / diff
    } else if v == g {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    let h = (hue / 2.0).round();
    // 359.x degrees rounds up to a full turn
    let h = if h >= 180.0 { 0.0 } else { h };

    [h as u8, s.round() as u8, v as u8]
}

/// Concatenated raw-count histograms of H, S, V
pub fn extract_features(hsv: &HsvImage) -> Vec<f32> {
    let mut features = vec![0f32; FEATURE_LEN];
    for pixel in hsv.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            features[channel * HISTOGRAM_BINS + *value as usize] += 1.0;
        }
    }
    features
}
