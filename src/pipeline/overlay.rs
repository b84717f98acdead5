//! Heatmap colorization and compositing over the source image.

use image::{imageops::FilterType, DynamicImage, GrayImage, Rgb, RgbImage};

use super::gradcam::Heatmap;

/// Default blend factor for the colorized heatmap.
pub const DEFAULT_ALPHA: f32 = 0.4;

/// Blend a jet-colorized heatmap over the original image.
///
/// The heatmap is upsampled bilinearly to the ORIGINAL image's resolution —
/// not the 128x128 model input — so the highlighted regions line up with
/// what the user actually uploaded. Output pixel =
/// `(1 - alpha) * original + alpha * heatmap_color`. Inputs are never
/// mutated.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn overlay(original: &DynamicImage, heatmap: &Heatmap, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let rgb = original.to_rgb8();
    let (width, height) = rgb.dimensions();

    let upsampled = resize_heatmap(heatmap, width, height);

    let mut out = RgbImage::new(width, height);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = f32::from(upsampled.get_pixel(x, y)[0]) / 255.0;
        let [hr, hg, hb] = jet(value);
        let src = rgb.get_pixel(x, y);

        let blend = |orig: u8, heat: f32| -> u8 {
            let v = (1.0 - alpha) * f32::from(orig) + alpha * heat * 255.0;
            v.round().clamp(0.0, 255.0) as u8
        };

        *pixel = Rgb([blend(src[0], hr), blend(src[1], hg), blend(src[2], hb)]);
    }

    out
}

/// Quantize the heatmap to 8 bits and upsample it bilinearly.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn resize_heatmap(heatmap: &Heatmap, width: u32, height: u32) -> GrayImage {
    let (rows, cols) = heatmap.dim();

    let mut gray = GrayImage::new(cols as u32, rows as u32);
    for (x, y, pixel) in gray.enumerate_pixels_mut() {
        let v = heatmap[[y as usize, x as usize]].clamp(0.0, 1.0);
        *pixel = image::Luma([(v * 255.0).round() as u8]);
    }

    image::imageops::resize(&gray, width, height, FilterType::Triangle)
}

/// Jet-style color ramp: blue (low) through cyan, green, yellow to red
/// (high). Returns RGB components in [0, 1].
fn jet(v: f32) -> [f32; 3] {
    let v = v.clamp(0.0, 1.0);
    let r = (1.5 - (4.0 * v - 3.0).abs()).clamp(0.0, 1.0);
    let g = (1.5 - (4.0 * v - 2.0).abs()).clamp(0.0, 1.0);
    let b = (1.5 - (4.0 * v - 1.0).abs()).clamp(0.0, 1.0);
    [r, g, b]
}
