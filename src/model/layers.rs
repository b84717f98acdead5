//! Layer definitions and per-layer forward/backward passes.
//!
//! Layers operate on batch-squeezed features: spatial maps are HWC
//! `Array3`, flattened features are `Array1`. Kernel layouts match the
//! weights exported from the source Keras model: conv kernels are
//! (kh, kw, cin, cout), dense kernels are (in, out).

use ndarray::{Array1, Array2, Array3, Array4};

use crate::error::{Error, Result};

/// Elementwise activation fused into a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply(self, v: f32) -> f32 {
        match self {
            Self::Linear => v,
            Self::Relu => v.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-v).exp()),
        }
    }

    /// Derivative expressed in terms of the activation's output.
    fn derivative_from_output(self, out: f32) -> f32 {
        match self {
            Self::Linear => 1.0,
            Self::Relu => {
                if out > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => out * (1.0 - out),
        }
    }
}

/// Spatial padding scheme, following Keras semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    #[default]
    Valid,
    Same,
}

impl Padding {
    /// Output extent and leading pad for one spatial dimension.
    fn output_dim(self, input: usize, kernel: usize, stride: usize) -> (usize, usize) {
        match self {
            Self::Valid => {
                let out = if input >= kernel {
                    (input - kernel) / stride + 1
                } else {
                    0
                };
                (out, 0)
            }
            Self::Same => {
                let out = input.div_ceil(stride);
                let total = ((out - 1) * stride + kernel).saturating_sub(input);
                (out, total / 2)
            }
        }
    }
}

/// Batch-squeezed feature flowing between layers.
#[derive(Debug, Clone)]
pub enum Feature {
    /// Spatial map, HWC.
    Map(Array3<f32>),
    /// Flattened vector.
    Flat(Array1<f32>),
}

impl Feature {
    fn shape_string(&self) -> String {
        match self {
            Self::Map(m) => format!("{:?}", m.dim()),
            Self::Flat(v) => format!("({},)", v.len()),
        }
    }
}

/// One layer of a sequential network, tagged by kind.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2D {
        name: String,
        /// (kh, kw, cin, cout)
        kernel: Array4<f32>,
        bias: Array1<f32>,
        stride: usize,
        padding: Padding,
        activation: Activation,
    },
    MaxPool2D {
        name: String,
        pool: usize,
    },
    Flatten {
        name: String,
    },
    Dense {
        name: String,
        /// (in, out)
        kernel: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    },
    /// Identity at inference. There is no training path in this crate, so
    /// inference-only behavior is structural rather than a mode flag.
    Dropout {
        name: String,
    },
}

impl Layer {
    pub fn name(&self) -> &str {
        match self {
            Self::Conv2D { name, .. }
            | Self::MaxPool2D { name, .. }
            | Self::Flatten { name }
            | Self::Dense { name, .. }
            | Self::Dropout { name } => name,
        }
    }

    pub const fn is_conv(&self) -> bool {
        matches!(self, Self::Conv2D { .. })
    }

    /// Run the layer on one feature.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the feature kind or extent does not match
    /// what the layer expects.
    pub fn forward(&self, input: &Feature) -> Result<Feature> {
        match (self, input) {
            (
                Self::Conv2D {
                    kernel,
                    bias,
                    stride,
                    padding,
                    activation,
                    ..
                },
                Feature::Map(map),
            ) => conv2d_forward(map, kernel, bias, *stride, *padding, *activation).map(Feature::Map),
            (Self::MaxPool2D { pool, .. }, Feature::Map(map)) => {
                max_pool_forward(map, *pool).map(Feature::Map)
            }
            (Self::Flatten { .. }, Feature::Map(map)) => {
                Ok(Feature::Flat(Array1::from_iter(map.iter().copied())))
            }
            (
                Self::Dense {
                    kernel,
                    bias,
                    activation,
                    ..
                },
                Feature::Flat(v),
            ) => dense_forward(v, kernel, bias, *activation).map(Feature::Flat),
            (Self::Dropout { .. }, _) => Ok(input.clone()),
            _ => Err(Error::ShapeMismatch {
                expected: format!("feature kind accepted by layer {}", self.name()),
                actual: input.shape_string(),
            }),
        }
    }

    /// Gradient of a scalar loss with respect to this layer's input, given
    /// the gradient with respect to its output.
    ///
    /// `input` and `output` must be the cached features from the forward
    /// pass that produced `grad_out`; shapes are trusted on that basis.
    pub fn backward(&self, input: &Feature, output: &Feature, grad_out: &Feature) -> Feature {
        match (self, input, output, grad_out) {
            (
                Self::Conv2D {
                    kernel,
                    stride,
                    padding,
                    activation,
                    ..
                },
                Feature::Map(x),
                Feature::Map(y),
                Feature::Map(g),
            ) => Feature::Map(conv2d_backward(x, y, g, kernel, *stride, *padding, *activation)),
            (Self::MaxPool2D { pool, .. }, Feature::Map(x), _, Feature::Map(g)) => {
                Feature::Map(max_pool_backward(x, g, *pool))
            }
            (Self::Flatten { .. }, Feature::Map(x), _, Feature::Flat(g)) => {
                let unflattened = Array3::from_shape_vec(x.dim(), g.to_vec())
                    .unwrap_or_else(|_| Array3::zeros(x.dim()));
                Feature::Map(unflattened)
            }
            (
                Self::Dense {
                    kernel, activation, ..
                },
                _,
                Feature::Flat(y),
                Feature::Flat(g),
            ) => {
                let dpre =
                    Array1::from_iter(y.iter().zip(g).map(|(&o, &g)| {
                        g * activation.derivative_from_output(o)
                    }));
                Feature::Flat(kernel.dot(&dpre))
            }
            (Self::Dropout { .. }, ..) => grad_out.clone(),
            // Mismatched cache; treat as zero sensitivity.
            _ => match input {
                Feature::Map(x) => Feature::Map(Array3::zeros(x.dim())),
                Feature::Flat(v) => Feature::Flat(Array1::zeros(v.len())),
            },
        }
    }
}

fn conv2d_forward(
    input: &Array3<f32>,
    kernel: &Array4<f32>,
    bias: &Array1<f32>,
    stride: usize,
    padding: Padding,
    activation: Activation,
) -> Result<Array3<f32>> {
    let (h, w, cin) = input.dim();
    let (kh, kw, kc, cout) = kernel.dim();

    if kc != cin {
        return Err(Error::ShapeMismatch {
            expected: format!("input with {kc} channels"),
            actual: format!("{cin} channels"),
        });
    }

    let (oh, pad_top) = padding.output_dim(h, kh, stride);
    let (ow, pad_left) = padding.output_dim(w, kw, stride);

    if oh == 0 || ow == 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("spatial extent of at least {kh}x{kw}"),
            actual: format!("{h}x{w}"),
        });
    }

    let mut out = Array3::<f32>::zeros((oh, ow, cout));

    for i in 0..oh {
        for j in 0..ow {
            for co in 0..cout {
                let mut acc = bias[co];
                for ki in 0..kh {
                    let Some(p) = (i * stride + ki).checked_sub(pad_top) else {
                        continue;
                    };
                    if p >= h {
                        continue;
                    }
                    for kj in 0..kw {
                        let Some(q) = (j * stride + kj).checked_sub(pad_left) else {
                            continue;
                        };
                        if q >= w {
                            continue;
                        }
                        for ci in 0..cin {
                            acc += input[[p, q, ci]] * kernel[[ki, kj, ci, co]];
                        }
                    }
                }
                out[[i, j, co]] = activation.apply(acc);
            }
        }
    }

    Ok(out)
}

fn conv2d_backward(
    input: &Array3<f32>,
    output: &Array3<f32>,
    grad_out: &Array3<f32>,
    kernel: &Array4<f32>,
    stride: usize,
    padding: Padding,
    activation: Activation,
) -> Array3<f32> {
    let (h, w, cin) = input.dim();
    let (kh, kw, _, cout) = kernel.dim();
    let (oh, ow, _) = grad_out.dim();

    let (_, pad_top) = padding.output_dim(h, kh, stride);
    let (_, pad_left) = padding.output_dim(w, kw, stride);

    let mut grad_in = Array3::<f32>::zeros((h, w, cin));

    for i in 0..oh {
        for j in 0..ow {
            for co in 0..cout {
                let g = grad_out[[i, j, co]]
                    * activation.derivative_from_output(output[[i, j, co]]);
                if g == 0.0 {
                    continue;
                }
                for ki in 0..kh {
                    let Some(p) = (i * stride + ki).checked_sub(pad_top) else {
                        continue;
                    };
                    if p >= h {
                        continue;
                    }
                    for kj in 0..kw {
                        let Some(q) = (j * stride + kj).checked_sub(pad_left) else {
                            continue;
                        };
                        if q >= w {
                            continue;
                        }
                        for ci in 0..cin {
                            grad_in[[p, q, ci]] += g * kernel[[ki, kj, ci, co]];
                        }
                    }
                }
            }
        }
    }

    grad_in
}

fn max_pool_forward(input: &Array3<f32>, pool: usize) -> Result<Array3<f32>> {
    let (h, w, c) = input.dim();
    let (oh, ow) = (h / pool, w / pool);

    if oh == 0 || ow == 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("spatial extent of at least {pool}x{pool}"),
            actual: format!("{h}x{w}"),
        });
    }

    let mut out = Array3::<f32>::zeros((oh, ow, c));

    for i in 0..oh {
        for j in 0..ow {
            for ch in 0..c {
                let mut best = f32::NEG_INFINITY;
                for pi in 0..pool {
                    for pj in 0..pool {
                        best = best.max(input[[i * pool + pi, j * pool + pj, ch]]);
                    }
                }
                out[[i, j, ch]] = best;
            }
        }
    }

    Ok(out)
}

fn max_pool_backward(input: &Array3<f32>, grad_out: &Array3<f32>, pool: usize) -> Array3<f32> {
    let (h, w, c) = input.dim();
    let (oh, ow, _) = grad_out.dim();

    let mut grad_in = Array3::<f32>::zeros((h, w, c));

    for i in 0..oh {
        for j in 0..ow {
            for ch in 0..c {
                // Route the gradient to the window's argmax, ties to the
                // first occurrence in scan order.
                let (mut bi, mut bj) = (i * pool, j * pool);
                let mut best = input[[bi, bj, ch]];
                for pi in 0..pool {
                    for pj in 0..pool {
                        let v = input[[i * pool + pi, j * pool + pj, ch]];
                        if v > best {
                            best = v;
                            bi = i * pool + pi;
                            bj = j * pool + pj;
                        }
                    }
                }
                grad_in[[bi, bj, ch]] += grad_out[[i, j, ch]];
            }
        }
    }

    grad_in
}

fn dense_forward(
    input: &Array1<f32>,
    kernel: &Array2<f32>,
    bias: &Array1<f32>,
    activation: Activation,
) -> Result<Array1<f32>> {
    let (k_in, _) = kernel.dim();

    if input.len() != k_in {
        return Err(Error::ShapeMismatch {
            expected: format!("flat feature of length {k_in}"),
            actual: format!("length {}", input.len()),
        });
    }

    let mut out = input.dot(kernel) + bias;
    out.mapv_inplace(|v| activation.apply(v));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array3, Array4};

    fn identity_conv() -> Layer {
        // 1x1 kernel, single channel in/out, weight 1, no bias
        Layer::Conv2D {
            name: "conv".into(),
            kernel: Array4::from_shape_vec((1, 1, 1, 1), vec![1.0]).unwrap(),
            bias: arr1(&[0.0]),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::Linear,
        }
    }

    #[test]
    fn test_conv_valid_shrinks_spatial_dims() {
        let layer = Layer::Conv2D {
            name: "conv".into(),
            kernel: Array4::from_elem((3, 3, 1, 2), 1.0),
            bias: arr1(&[0.0, 0.5]),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::Linear,
        };
        let input = Feature::Map(Array3::from_elem((8, 8, 1), 1.0));

        let Feature::Map(out) = layer.forward(&input).unwrap() else {
            panic!("conv must produce a map");
        };
        assert_eq!(out.dim(), (6, 6, 2));
        // 3x3 window of ones: sum 9; second filter adds its bias
        assert!((out[[0, 0, 0]] - 9.0).abs() < 1e-6);
        assert!((out[[0, 0, 1]] - 9.5).abs() < 1e-6);
    }

    #[test]
    fn test_conv_same_preserves_spatial_dims() {
        let layer = Layer::Conv2D {
            name: "conv".into(),
            kernel: Array4::from_elem((3, 3, 1, 1), 1.0),
            bias: arr1(&[0.0]),
            stride: 1,
            padding: Padding::Same,
            activation: Activation::Linear,
        };
        let input = Feature::Map(Array3::from_elem((8, 8, 1), 1.0));

        let Feature::Map(out) = layer.forward(&input).unwrap() else {
            panic!("conv must produce a map");
        };
        assert_eq!(out.dim(), (8, 8, 1));
        // Interior sees the full window, the corner only 2x2 of it
        assert!((out[[4, 4, 0]] - 9.0).abs() < 1e-6);
        assert!((out[[0, 0, 0]] - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_conv_relu_clips_negative() {
        let layer = Layer::Conv2D {
            name: "conv".into(),
            kernel: Array4::from_shape_vec((1, 1, 1, 1), vec![-1.0]).unwrap(),
            bias: arr1(&[0.0]),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::Relu,
        };
        let input = Feature::Map(Array3::from_elem((2, 2, 1), 3.0));

        let Feature::Map(out) = layer.forward(&input).unwrap() else {
            panic!("conv must produce a map");
        };
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_conv_channel_mismatch_is_error() {
        let input = Feature::Map(Array3::from_elem((4, 4, 3), 1.0));
        let err = identity_conv().forward(&input).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_max_pool_forward_and_backward() {
        let mut map = Array3::<f32>::zeros((4, 4, 1));
        map[[0, 1, 0]] = 5.0;
        map[[3, 3, 0]] = 2.0;
        let layer = Layer::MaxPool2D {
            name: "pool".into(),
            pool: 2,
        };

        let input = Feature::Map(map.clone());
        let Feature::Map(out) = layer.forward(&input).unwrap() else {
            panic!("pool must produce a map");
        };
        assert_eq!(out.dim(), (2, 2, 1));
        assert_eq!(out[[0, 0, 0]], 5.0);
        assert_eq!(out[[1, 1, 0]], 2.0);

        // Gradient routes only to the argmax cells
        let grad = Feature::Map(Array3::from_elem((2, 2, 1), 1.0));
        let Feature::Map(gin) = layer.backward(&input, &Feature::Map(out), &grad) else {
            panic!("pool gradient must be a map");
        };
        assert_eq!(gin[[0, 1, 0]], 1.0);
        assert_eq!(gin[[3, 3, 0]], 1.0);
        assert_eq!(gin[[1, 1, 0]], 0.0);
    }

    #[test]
    fn test_flatten_round_trip() {
        let map = Array3::from_shape_vec((2, 2, 2), (0..8).map(|v| v as f32).collect()).unwrap();
        let layer = Layer::Flatten {
            name: "flatten".into(),
        };

        let input = Feature::Map(map);
        let out = layer.forward(&input).unwrap();
        let Feature::Flat(ref flat) = out else {
            panic!("flatten must produce a flat feature");
        };
        // Row-major HWC order, as Keras flattens NHWC
        assert_eq!(flat.to_vec(), (0..8).map(|v| v as f32).collect::<Vec<_>>());

        let grad = Feature::Flat(flat.clone());
        let Feature::Map(gin) = layer.backward(&input, &out, &grad) else {
            panic!("flatten gradient must be a map");
        };
        assert_eq!(gin[[1, 1, 1]], 7.0);
    }

    #[test]
    fn test_dense_forward_known_values() {
        let layer = Layer::Dense {
            name: "dense".into(),
            kernel: arr2(&[[1.0, 0.0], [0.0, 2.0], [1.0, 1.0]]),
            bias: arr1(&[0.5, -0.5]),
            activation: Activation::Linear,
        };
        let input = Feature::Flat(arr1(&[1.0, 2.0, 3.0]));

        let Feature::Flat(out) = layer.forward(&input).unwrap() else {
            panic!("dense must produce a flat feature");
        };
        assert!((out[0] - 4.5).abs() < 1e-6);
        assert!((out[1] - 6.5).abs() < 1e-6);
    }

    #[test]
    fn test_dense_sigmoid_range_and_gradient() {
        let layer = Layer::Dense {
            name: "dense".into(),
            kernel: arr2(&[[2.0], [-1.0]]),
            bias: arr1(&[0.0]),
            activation: Activation::Sigmoid,
        };
        let input = Feature::Flat(arr1(&[1.0, 1.0]));

        let out = layer.forward(&input).unwrap();
        let Feature::Flat(ref y) = out else {
            panic!("dense must produce a flat feature");
        };
        let s = y[0];
        assert!((0.0..=1.0).contains(&s));

        // dx = W * s(1-s)
        let grad = Feature::Flat(arr1(&[1.0]));
        let Feature::Flat(gin) = layer.backward(&input, &out, &grad) else {
            panic!("dense gradient must be flat");
        };
        let ds = s * (1.0 - s);
        assert!((gin[0] - 2.0 * ds).abs() < 1e-6);
        assert!((gin[1] + ds).abs() < 1e-6);
    }

    #[test]
    fn test_dense_length_mismatch_is_error() {
        let layer = Layer::Dense {
            name: "dense".into(),
            kernel: arr2(&[[1.0], [1.0]]),
            bias: arr1(&[0.0]),
            activation: Activation::Linear,
        };
        let input = Feature::Flat(arr1(&[1.0, 2.0, 3.0]));
        assert!(layer.forward(&input).is_err());
    }

    #[test]
    fn test_dropout_is_identity() {
        let layer = Layer::Dropout {
            name: "dropout".into(),
        };
        let input = Feature::Flat(arr1(&[1.0, -2.0, 3.0]));

        let Feature::Flat(out) = layer.forward(&input).unwrap() else {
            panic!("dropout must pass features through");
        };
        assert_eq!(out.to_vec(), vec![1.0, -2.0, 3.0]);
    }

    #[test]
    fn test_conv_backward_finite_difference() {
        // Numerical check of the conv input gradient on a small map
        let kernel = Array4::from_shape_vec(
            (2, 2, 1, 1),
            vec![0.5, -0.25, 1.0, 0.75],
        )
        .unwrap();
        let layer = Layer::Conv2D {
            name: "conv".into(),
            kernel,
            bias: arr1(&[0.1]),
            stride: 1,
            padding: Padding::Valid,
            activation: Activation::Relu,
        };

        let x = Array3::from_shape_vec(
            (3, 3, 1),
            vec![0.2, 0.8, -0.1, 0.5, 0.3, 0.9, -0.4, 0.6, 0.7],
        )
        .unwrap();
        let input = Feature::Map(x.clone());
        let output = layer.forward(&input).unwrap();

        // Loss = sum of outputs; analytic gradient
        let Feature::Map(ref out_map) = output else {
            panic!()
        };
        let ones = Feature::Map(Array3::from_elem(out_map.dim(), 1.0));
        let Feature::Map(analytic) = layer.backward(&input, &output, &ones) else {
            panic!()
        };

        let eps = 1e-3;
        for p in 0..3 {
            for q in 0..3 {
                let mut bumped = x.clone();
                bumped[[p, q, 0]] += eps;
                let Feature::Map(out_plus) =
                    layer.forward(&Feature::Map(bumped.clone())).unwrap()
                else {
                    panic!()
                };
                bumped[[p, q, 0]] -= 2.0 * eps;
                let Feature::Map(out_minus) = layer.forward(&Feature::Map(bumped)).unwrap() else {
                    panic!()
                };
                let numeric =
                    (out_plus.sum() - out_minus.sum()) / (2.0 * eps);
                assert!(
                    (analytic[[p, q, 0]] - numeric).abs() < 1e-2,
                    "gradient mismatch at ({p},{q}): analytic {} numeric {numeric}",
                    analytic[[p, q, 0]],
                );
            }
        }
    }
}
