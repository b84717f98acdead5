//! Score interpretation: sigmoid output to label + confidence.

use serde::Serialize;

use crate::error::Result;
use crate::image::PreprocessedTensor;
use crate::model::Model;

/// Classification outcome for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    AiGenerated,
    Real,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AiGenerated => write!(f, "AI Generated"),
            Self::Real => write!(f, "Real Image"),
        }
    }
}

/// Coarse confidence band, as surfaced next to the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Certainty {
    High,
    Medium,
    Low,
}

/// Immutable result of one inference call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub label: Label,
    /// Raw sigmoid score in [0, 1]; probability of the "real photo" class.
    pub raw_score: f32,
    /// Distance from the decision boundary rescaled to [50, 100] percent.
    pub confidence: f32,
}

impl Prediction {
    /// Interpret a sigmoid score. The 0.5 boundary belongs to [`Label::Real`],
    /// matching the model this crate was built around; a score of exactly 0.5
    /// is the minimum-confidence point (50%).
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score < 0.5 {
            Self {
                label: Label::AiGenerated,
                raw_score: score,
                confidence: (1.0 - score) * 100.0,
            }
        } else {
            Self {
                label: Label::Real,
                raw_score: score,
                confidence: score * 100.0,
            }
        }
    }

    #[must_use]
    pub const fn is_ai(&self) -> bool {
        matches!(self.label, Label::AiGenerated)
    }

    #[must_use]
    pub fn certainty(&self) -> Certainty {
        if self.confidence > 80.0 {
            Certainty::High
        } else if self.confidence > 60.0 {
            Certainty::Medium
        } else {
            Certainty::Low
        }
    }
}

/// Run a single forward pass and interpret the score.
///
/// Pure function of model + tensor; repeated calls with the same inputs
/// return bit-identical scores.
///
/// # Errors
///
/// Propagates forward-pass failures ([`crate::Error::Inference`] or
/// [`crate::Error::ShapeMismatch`]); fatal to this call only.
pub fn predict(model: &Model, tensor: &PreprocessedTensor) -> Result<Prediction> {
    let score = model.forward(tensor)?;
    Ok(Prediction::from_score(score))
}
