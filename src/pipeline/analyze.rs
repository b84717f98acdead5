//! Analysis orchestration: preprocess, classify, then best-effort explain.

use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};
use crate::image::preprocess;
use crate::model::Model;

use super::classify::{self, Prediction};
use super::gradcam::{self, TargetClass};
use super::overlay::{self, DEFAULT_ALPHA};

/// Configuration for the analysis pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Blend factor for the Grad-CAM overlay (0.0-1.0).
    pub alpha: f32,

    /// Whether to attempt Grad-CAM at all.
    pub gradcam: bool,

    /// Force the explained class instead of using the predicted one.
    pub target_class: Option<TargetClass>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            gradcam: true,
            target_class: None,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(Error::InvalidParameter {
                name: "alpha".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }

        Ok(())
    }
}

/// Everything produced for one analyzed image.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// The classification outcome. Always present.
    pub prediction: Prediction,

    /// Grad-CAM overlay at the original image's resolution, or `None` when
    /// no explanation is available. Never required for correct operation.
    pub overlay: Option<RgbImage>,

    /// Width and height of the original input image.
    pub dimensions: (u32, u32),
}

/// The externally facing entry point: wraps a loaded model and turns decoded
/// images into [`Analysis`] records.
///
/// Stateless per call. The model is read-only, so one `Analyzer` (behind an
/// `Arc`) serves concurrent callers without any internal locking.
pub struct Analyzer {
    model: Model,
    config: Config,
}

impl Analyzer {
    /// Create an analyzer around a loaded model.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(model: Model, config: Config) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            "Analyzer ready: model {} with {} layers",
            model.name(),
            model.layers().len()
        );

        Ok(Self { model, config })
    }

    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Classify one image and, when possible, explain the decision.
    ///
    /// Classification failure fails this call; explanation failure only
    /// leaves `overlay` empty — the prediction is delivered regardless.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass fails.
    pub fn analyze(&self, img: &DynamicImage) -> Result<Analysis> {
        let dimensions = (img.width(), img.height());

        let tensor = preprocess(img);
        let prediction = classify::predict(&self.model, &tensor)?;

        tracing::debug!(
            "Classified {}x{} image: {} at {:.1}% (raw {:.4})",
            dimensions.0,
            dimensions.1,
            prediction.label,
            prediction.confidence,
            prediction.raw_score
        );

        let overlay = if self.config.gradcam {
            gradcam::explain(&self.model, &tensor, self.config.target_class)
                .map(|heatmap| overlay::overlay(img, &heatmap, self.config.alpha))
        } else {
            None
        };

        Ok(Analysis {
            prediction,
            overlay,
            dimensions,
        })
    }
}
