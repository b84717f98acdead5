//! Image acquisition and preprocessing.

use std::path::Path;
use std::time::Duration;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{PreprocessedTensor, IMG_SIZE, RGB_CHANNELS};

/// Timeout for URL-sourced images.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Load an image from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();

    image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Fetch an image over HTTP and decode it.
///
/// # Errors
///
/// Returns an error if the request fails, the server responds with a
/// non-success status, or the body is not a decodable image.
pub fn fetch_image(url: &str) -> Result<DynamicImage> {
    let fetch_err = |source| Error::ImageFetch {
        url: url.to_string(),
        source,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(fetch_err)?;

    let bytes = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .and_then(|resp| resp.bytes())
        .map_err(fetch_err)?;

    image::load_from_memory(&bytes).map_err(|source| Error::ImageDecode { source })
}

/// Normalize a decoded image into the tensor shape the classifier expects.
///
/// The image is:
/// 1. Converted to RGB (grayscale, palette, and alpha modes are expanded)
/// 2. Resized to exactly 128x128 using Lanczos3 to avoid aliasing artifacts
/// 3. Scaled from [0, 255] to [0, 1]
/// 4. Returned as a fresh NHWC tensor (1, 128, 128, 3)
///
/// The caller's image is never mutated; the tensor owns its own buffer.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn preprocess(img: &DynamicImage) -> PreprocessedTensor {
    // resize_exact matches the source model's training pipeline, which did
    // not preserve aspect ratio.
    let resized = img.resize_exact(IMG_SIZE, IMG_SIZE, FilterType::Lanczos3);
    let rgb = resized.to_rgb8();

    let size = IMG_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, RGB_CHANNELS));

    for y in 0..size {
        for x in 0..size {
            // Safe: x and y are bounded by IMG_SIZE (128) which fits in u32
            let pixel = rgb.get_pixel(x as u32, y as u32);
            for c in 0..RGB_CHANNELS {
                tensor[[0, y, x, c]] = f32::from(pixel[c]) / 255.0;
            }
        }
    }

    tensor
}
