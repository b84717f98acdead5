//! Image saving utilities.

use std::path::Path;

use image::RgbImage;

use crate::error::{Error, Result};

/// Save an overlay image to disk, format inferred from the extension.
///
/// # Arguments
///
/// * `overlay` - RGB image, already at the original input's resolution
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_overlay<P: AsRef<Path>>(overlay: &RgbImage, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            overlay
                .write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            overlay.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_png_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = RgbImage::from_pixel(16, 12, image::Rgb([200, 40, 40]));

        for name in ["out.png", "out.jpg"] {
            let path = dir.path().join(name);
            save_overlay(&overlay, &path, 95).unwrap();

            let reloaded = image::open(&path).unwrap();
            assert_eq!(reloaded.width(), 16);
            assert_eq!(reloaded.height(), 12);
        }
    }
}
