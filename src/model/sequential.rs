//! Sequential model: an ordered layer list over batch-size-1 tensors.

use ndarray::Array3;

use crate::error::{Error, Result};
use crate::image::{PreprocessedTensor, IMG_SIZE, RGB_CHANNELS};

use super::layers::{Feature, Layer};

/// A loaded sequential CNN. Read-only after construction; safe to share
/// across threads for concurrent inference.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    layers: Vec<Layer>,
}

/// Every layer output from one forward pass, plus the final score.
///
/// Grad-CAM needs both the last conv activation and the prediction from the
/// same pass; caching the whole trace gives an intermediate-activation tap
/// without re-running the network.
pub struct ForwardTrace {
    pub activations: Vec<Feature>,
    pub score: f32,
}

impl Model {
    #[must_use]
    pub fn new(name: impl Into<String>, layers: Vec<Layer>) -> Self {
        Self {
            name: name.into(),
            layers,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Index of the last convolutional layer, scanning from the output
    /// backward. `None` for conv-free models.
    #[must_use]
    pub fn last_conv_index(&self) -> Option<usize> {
        self.layers.iter().rposition(Layer::is_conv)
    }

    /// Single forward pass producing the sigmoid score.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensor is not (1, 128, 128, 3) or a layer
    /// rejects its input shape.
    pub fn forward(&self, tensor: &PreprocessedTensor) -> Result<f32> {
        self.forward_trace(tensor).map(|trace| trace.score)
    }

    /// Forward pass that keeps every layer's output.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Model::forward`].
    pub fn forward_trace(&self, tensor: &PreprocessedTensor) -> Result<ForwardTrace> {
        let mut feature = Feature::Map(validate_input(tensor)?);
        let mut activations = Vec::with_capacity(self.layers.len());

        for layer in &self.layers {
            feature = layer.forward(&feature)?;
            activations.push(feature.clone());
        }

        let score = match activations.last() {
            Some(Feature::Flat(v)) if v.len() == 1 => v[0],
            Some(other) => {
                return Err(Error::Inference {
                    reason: format!(
                        "model {} produced {} instead of a scalar",
                        self.name,
                        match other {
                            Feature::Map(m) => format!("a {:?} map", m.dim()),
                            Feature::Flat(v) => format!("a length-{} vector", v.len()),
                        }
                    ),
                })
            }
            None => {
                return Err(Error::Inference {
                    reason: format!("model {} has no layers", self.name),
                })
            }
        };

        Ok(ForwardTrace { activations, score })
    }
}

/// Check the tensor shape and squeeze the batch dimension.
fn validate_input(tensor: &PreprocessedTensor) -> Result<Array3<f32>> {
    let expected = [1, IMG_SIZE as usize, IMG_SIZE as usize, RGB_CHANNELS];

    if tensor.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{:?}", tensor.shape()),
        });
    }

    Ok(tensor
        .index_axis(ndarray::Axis(0), 0)
        .to_owned())
}
