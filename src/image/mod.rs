//! Image loading, preprocessing, and saving utilities.

mod load;
mod save;

pub use load::{fetch_image, load_image, preprocess};
pub use save::save_overlay;

use ndarray::Array4;

/// Preprocessed image tensor in NHWC format (batch, height, width, channels).
/// Values are normalized to [0, 1], matching what the classifier was trained on.
pub type PreprocessedTensor = Array4<f32>;

/// Input edge length expected by the classifier.
pub const IMG_SIZE: u32 = 128;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
