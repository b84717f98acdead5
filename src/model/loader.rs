//! Model loading from a manifest + weights directory.
//!
//! A model directory holds `model.json`, the ordered layer sequence with
//! per-layer type tags, and `weights.npz` with one `<name>_kernel` /
//! `<name>_bias` entry pair per parameterized layer. Tensor layouts are the
//! Keras ones — conv kernels (kh, kw, cin, cout), dense kernels (in, out) —
//! so weights exported from the source model load unchanged.

use std::fs::File;
use std::path::Path;

use ndarray::{Array, Array1, Array2, Array4, Dimension};
use ndarray_npy::NpzReader;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::layers::{Activation, Layer, Padding};
use super::sequential::Model;

/// Manifest filename inside a model directory.
pub const MANIFEST_FILE: &str = "model.json";

/// Weights filename inside a model directory.
pub const WEIGHTS_FILE: &str = "weights.npz";

#[derive(Debug, Deserialize)]
struct Manifest {
    name: String,
    layers: Vec<LayerSpec>,
}

/// One layer entry of the manifest. Hyperparameters live here; the tensors
/// live in the npz archive under the layer's name.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LayerSpec {
    Conv2d {
        name: String,
        #[serde(default)]
        padding: Padding,
        #[serde(default = "default_stride")]
        strides: usize,
        #[serde(default)]
        activation: Activation,
    },
    MaxPool2d {
        name: String,
        #[serde(default = "default_pool")]
        pool_size: usize,
    },
    Flatten {
        name: String,
    },
    Dense {
        name: String,
        #[serde(default)]
        activation: Activation,
    },
    Dropout {
        name: String,
    },
}

const fn default_stride() -> usize {
    1
}

const fn default_pool() -> usize {
    2
}

/// Load a model from a directory containing `model.json` and `weights.npz`.
///
/// # Errors
///
/// Returns [`Error::ModelLoad`] if either file is missing or malformed, a
/// weight entry is absent, or a stored tensor's shape contradicts the
/// manifest.
pub fn load_model<P: AsRef<Path>>(dir: P) -> Result<Model> {
    let dir = dir.as_ref();
    let model_name = dir.display().to_string();

    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest_file = File::open(&manifest_path).map_err(|e| Error::ModelLoad {
        name: model_name.clone(),
        reason: format!("{}: {e}", manifest_path.display()),
    })?;
    let manifest: Manifest =
        serde_json::from_reader(manifest_file).map_err(|e| Error::ModelLoad {
            name: model_name.clone(),
            reason: format!("invalid manifest: {e}"),
        })?;

    let weights_path = dir.join(WEIGHTS_FILE);
    let weights_file = File::open(&weights_path).map_err(|e| Error::ModelLoad {
        name: model_name.clone(),
        reason: format!("{}: {e}", weights_path.display()),
    })?;
    let mut npz = NpzReader::new(weights_file).map_err(|e| Error::ModelLoad {
        name: model_name.clone(),
        reason: format!("invalid weights archive: {e}"),
    })?;
    let entries = npz.names().map_err(|e| Error::ModelLoad {
        name: model_name.clone(),
        reason: format!("unreadable weights archive: {e}"),
    })?;

    let mut layers = Vec::with_capacity(manifest.layers.len());

    for spec in manifest.layers {
        let layer = match spec {
            LayerSpec::Conv2d {
                name,
                padding,
                strides,
                activation,
            } => {
                if strides == 0 {
                    return Err(Error::ModelLoad {
                        name: manifest.name,
                        reason: format!("layer {name}: stride must be nonzero"),
                    });
                }
                let kernel: Array4<f32> =
                    read_weight(&mut npz, &entries, &name, "kernel", &manifest.name)?;
                let bias: Array1<f32> =
                    read_weight(&mut npz, &entries, &name, "bias", &manifest.name)?;
                let cout = kernel.dim().3;
                if bias.len() != cout {
                    return Err(Error::ModelLoad {
                        name: manifest.name,
                        reason: format!(
                            "layer {name}: kernel has {cout} filters but bias has {} entries",
                            bias.len()
                        ),
                    });
                }
                Layer::Conv2D {
                    name,
                    kernel,
                    bias,
                    stride: strides,
                    padding,
                    activation,
                }
            }
            LayerSpec::MaxPool2d { name, pool_size } => {
                if pool_size == 0 {
                    return Err(Error::ModelLoad {
                        name: manifest.name,
                        reason: format!("layer {name}: pool size must be nonzero"),
                    });
                }
                Layer::MaxPool2D {
                    name,
                    pool: pool_size,
                }
            }
            LayerSpec::Flatten { name } => Layer::Flatten { name },
            LayerSpec::Dense { name, activation } => {
                let kernel: Array2<f32> =
                    read_weight(&mut npz, &entries, &name, "kernel", &manifest.name)?;
                let bias: Array1<f32> =
                    read_weight(&mut npz, &entries, &name, "bias", &manifest.name)?;
                let units = kernel.dim().1;
                if bias.len() != units {
                    return Err(Error::ModelLoad {
                        name: manifest.name,
                        reason: format!(
                            "layer {name}: kernel has {units} units but bias has {} entries",
                            bias.len()
                        ),
                    });
                }
                Layer::Dense {
                    name,
                    kernel,
                    bias,
                    activation,
                }
            }
            LayerSpec::Dropout { name } => Layer::Dropout { name },
        };
        layers.push(layer);
    }

    if layers.is_empty() {
        return Err(Error::ModelLoad {
            name: manifest.name,
            reason: "manifest declares no layers".to_string(),
        });
    }

    tracing::info!(
        "Loaded model {} ({} layers) from {}",
        manifest.name,
        layers.len(),
        dir.display()
    );

    Ok(Model::new(manifest.name, layers))
}

/// Read `<layer>_<part>` from the archive, tolerating the `.npy` suffix
/// numpy's savez appends to entry names.
fn read_weight<D: Dimension>(
    npz: &mut NpzReader<File>,
    entries: &[String],
    layer: &str,
    part: &str,
    model: &str,
) -> Result<Array<f32, D>> {
    let key = format!("{layer}_{part}");
    let entry = entries
        .iter()
        .find(|e| e.as_str() == key || e.strip_suffix(".npy") == Some(&key))
        .ok_or_else(|| Error::ModelLoad {
            name: model.to_string(),
            reason: format!("missing weight entry {key}"),
        })?;

    npz.by_name(entry).map_err(|e| Error::ModelLoad {
        name: model.to_string(),
        reason: format!("weight {key}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::NpzWriter;

    fn write_model(dir: &Path, manifest: &str) {
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();

        let mut npz = NpzWriter::new(File::create(dir.join(WEIGHTS_FILE)).unwrap());
        let kernel = Array4::<f32>::from_elem((1, 1, 3, 1), 0.5);
        let bias = Array1::<f32>::zeros(1);
        npz.add_array("conv2d_kernel", &kernel).unwrap();
        npz.add_array("conv2d_bias", &bias).unwrap();

        let dense_kernel = Array2::<f32>::from_elem((64 * 64, 1), 0.001);
        let dense_bias = Array1::<f32>::zeros(1);
        npz.add_array("dense_kernel", &dense_kernel).unwrap();
        npz.add_array("dense_bias", &dense_bias).unwrap();
        npz.finish().unwrap();
    }

    const MANIFEST: &str = r#"{
        "name": "basic_cnn",
        "layers": [
            {"type": "conv2d", "name": "conv2d", "activation": "relu"},
            {"type": "max_pool2d", "name": "max_pooling2d", "pool_size": 2},
            {"type": "flatten", "name": "flatten"},
            {"type": "dropout", "name": "dropout"},
            {"type": "dense", "name": "dense", "activation": "sigmoid"}
        ]
    }"#;

    #[test]
    fn test_load_model_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), MANIFEST);

        let model = load_model(dir.path()).unwrap();
        assert_eq!(model.name(), "basic_cnn");
        assert_eq!(model.layers().len(), 5);
        assert_eq!(model.last_conv_index(), Some(0));

        // 1x1 conv keeps 128x128, pool halves it, dense expects 64*64*1
        let tensor = ndarray::Array4::from_elem((1, 128, 128, 3), 0.5);
        let score = model.forward(&tensor).unwrap();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_missing_weight_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), MANIFEST).unwrap();

        let mut npz = NpzWriter::new(File::create(dir.path().join(WEIGHTS_FILE)).unwrap());
        npz.add_array("conv2d_kernel", &Array4::<f32>::zeros((1, 1, 3, 1)))
            .unwrap();
        npz.finish().unwrap();

        let err = load_model(dir.path()).unwrap_err();
        assert!(err.to_string().contains("conv2d_bias"));
    }

    #[test]
    fn test_bias_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "m", "layers": [{"type": "conv2d", "name": "conv2d"}]}"#,
        )
        .unwrap();

        let mut npz = NpzWriter::new(File::create(dir.path().join(WEIGHTS_FILE)).unwrap());
        npz.add_array("conv2d_kernel", &Array4::<f32>::zeros((3, 3, 3, 8)))
            .unwrap();
        npz.add_array("conv2d_bias", &Array1::<f32>::zeros(4)).unwrap();
        npz.finish().unwrap();

        assert!(load_model(dir.path()).is_err());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_model(dir.path()),
            Err(Error::ModelLoad { .. })
        ));
    }

    #[test]
    fn test_empty_layer_list_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "empty", "layers": []}"#,
        )
        .unwrap();
        let mut npz = NpzWriter::new(File::create(dir.path().join(WEIGHTS_FILE)).unwrap());
        npz.add_array("unused", &Array1::<f32>::zeros(1)).unwrap();
        npz.finish().unwrap();

        assert!(load_model(dir.path()).is_err());
    }
}
