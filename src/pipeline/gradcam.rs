//! Gradient-weighted class activation mapping.
//!
//! Explains which regions of the input pushed the classifier toward a class:
//! the gradient of the class output with respect to the last convolutional
//! activation is pooled into per-channel weights, the weighted channel sum
//! is rectified, and the map is normalized to [0, 1].
//!
//! Explanation is best-effort. Every failure mode — no conv layer, a forward
//! error, a degenerate map — collapses to `None`; it must never take the
//! prediction down with it.

use ndarray::{Array2, Axis};

use crate::error::{Error, Result};
use crate::image::PreprocessedTensor;
use crate::model::{Feature, Model};

/// Class-discriminative saliency map at the conv layer's spatial resolution,
/// values in [0, 1].
pub type Heatmap = Array2<f32>;

/// Matches the Keras backend epsilon used when the source model's heatmaps
/// were normalized.
const NORM_EPSILON: f32 = 1e-7;

/// Class whose evidence the heatmap should highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    /// Class 0: the image is AI generated; class output is `1 - score`.
    Ai,
    /// Class 1: the image is a real photo; class output is the raw score.
    Real,
}

/// Compute a Grad-CAM heatmap for the predicted (or given) class.
///
/// Returns `None` when the model has no convolutional layer or any step of
/// the computation fails; callers treat that as "no explanation available"
/// and carry on with the prediction alone.
#[must_use]
pub fn explain(
    model: &Model,
    tensor: &PreprocessedTensor,
    target: Option<TargetClass>,
) -> Option<Heatmap> {
    let Some(conv_idx) = model.last_conv_index() else {
        tracing::debug!("Grad-CAM unavailable: model {} has no conv layer", model.name());
        return None;
    };

    match compute(model, tensor, target, conv_idx) {
        Ok(heatmap) => Some(heatmap),
        Err(err) => {
            tracing::debug!("Grad-CAM unavailable: {err}");
            None
        }
    }
}

fn compute(
    model: &Model,
    tensor: &PreprocessedTensor,
    target: Option<TargetClass>,
    conv_idx: usize,
) -> Result<Heatmap> {
    // One shared forward pass provides both the conv activation and the score.
    let trace = model.forward_trace(tensor)?;

    let target = target.unwrap_or(if trace.score >= 0.5 {
        TargetClass::Real
    } else {
        TargetClass::Ai
    });

    // d(class_output)/d(score): class output is the score itself for Real,
    // 1 - score for Ai.
    let seed = match target {
        TargetClass::Real => 1.0,
        TargetClass::Ai => -1.0,
    };

    let mut grad = Feature::Flat(ndarray::arr1(&[seed]));
    for i in ((conv_idx + 1)..model.layers().len()).rev() {
        let input = &trace.activations[i - 1];
        let output = &trace.activations[i];
        grad = model.layers()[i].backward(input, output, &grad);
    }

    let Feature::Map(grad_map) = grad else {
        return Err(Error::Inference {
            reason: "gradient at conv layer is not spatial".to_string(),
        });
    };
    let Feature::Map(ref conv_out) = trace.activations[conv_idx] else {
        return Err(Error::Inference {
            reason: "conv activation is not spatial".to_string(),
        });
    };

    // Average the gradient over both spatial axes: one weight per channel.
    let weights = grad_map.mean_axis(Axis(0)).and_then(|m| m.mean_axis(Axis(0)));
    let Some(weights) = weights else {
        return Err(Error::Inference {
            reason: "empty gradient map".to_string(),
        });
    };

    let (h, w, channels) = conv_out.dim();
    let mut heatmap = Array2::<f32>::zeros((h, w));
    for i in 0..h {
        for j in 0..w {
            let mut acc = 0.0;
            for c in 0..channels {
                acc += conv_out[[i, j, c]] * weights[c];
            }
            // Only positive evidence for the target class matters
            heatmap[[i, j]] = acc.max(0.0);
        }
    }

    let max = heatmap.iter().copied().fold(0.0_f32, f32::max);
    if !max.is_finite() {
        return Err(Error::Inference {
            reason: "non-finite activation map".to_string(),
        });
    }
    heatmap.mapv_inplace(|v| v / (max + NORM_EPSILON));

    Ok(heatmap)
}
