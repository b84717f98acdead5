//! # synthscan
//!
//! A library for detecting AI-generated images with a pre-trained
//! convolutional classifier, and for explaining each decision with a
//! Grad-CAM heatmap blended over the original image.
//!
//! The classifier produces a sigmoid score in `[0, 1]`: scores below 0.5 mean
//! "AI generated", scores at or above 0.5 mean "real photo". Explanation is
//! best-effort — when the model has no convolutional layer or the gradient
//! computation fails, the prediction is still delivered and the overlay is
//! simply absent.
//!
//! ## Example
//!
//! ```no_run
//! use synthscan::{Analyzer, Config};
//!
//! # fn main() -> synthscan::Result<()> {
//! let model = synthscan::model::load_model("models/basic_cnn")?;
//! let analyzer = Analyzer::new(model, Config::default())?;
//!
//! let img = synthscan::image::load_image("photo.jpg")?;
//! let analysis = analyzer.analyze(&img)?;
//!
//! println!(
//!     "{} ({:.1}% confidence)",
//!     analysis.prediction.label, analysis.prediction.confidence
//! );
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{Analysis, Analyzer, Config, Label, Prediction};
