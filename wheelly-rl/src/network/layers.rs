//! Layer variants: forward evaluation and per-step backward with
//! eligibility traces.
//!
//! Forward works on batches (one row per step); backward works on single
//! rows because the TD update feeds a different scalar delta to every
//! step. Trainable parameters follow
//! `e = lambda * e + dL/dtheta; theta = theta + delta * e`
//! with the learning rates already folded into the output gradients.

use crate::error::{Error, Result};
use crate::rng::SeedRng;
use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};

/// A named network layer.
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub inputs: Vec<String>,
    pub kind: LayerKind,
}

/// The fixed set of layer types.
#[derive(Clone, Debug)]
pub enum LayerKind {
    Dense {
        w: Array2<f32>,
        b: Array2<f32>,
        e_w: Array2<f32>,
        e_b: Array2<f32>,
    },
    Tanh,
    Relu,
    Linear {
        w: f32,
        b: f32,
    },
    Softmax {
        temperature: f32,
    },
    Sum,
    Concat,
}

impl LayerKind {
    /// Creates a dense layer with Glorot-style initial weights.
    pub fn dense(input_size: usize, output_size: usize, rng: &mut SeedRng) -> Self {
        let scale = (2.0 / (input_size + output_size) as f32).sqrt();
        let w = Array2::from_shape_fn((input_size, output_size), |_| rng.normal() * scale);
        LayerKind::Dense {
            w,
            b: Array2::zeros((1, output_size)),
            e_w: Array2::zeros((input_size, output_size)),
            e_b: Array2::zeros((1, output_size)),
        }
    }
}

impl Layer {
    /// Output size given the input sizes.
    pub fn output_size(&self, input_sizes: &[usize]) -> Result<usize> {
        match &self.kind {
            LayerKind::Dense { w, .. } => {
                if input_sizes != [w.nrows()] {
                    return Err(Error::Shape(format!(
                        "layer {:?} expects input size {}, got {:?}",
                        self.name,
                        w.nrows(),
                        input_sizes
                    )));
                }
                Ok(w.ncols())
            }
            LayerKind::Sum => {
                let first = input_sizes
                    .first()
                    .copied()
                    .ok_or_else(|| Error::Shape(format!("layer {:?} has no inputs", self.name)))?;
                if input_sizes.iter().any(|&s| s != first) {
                    return Err(Error::Shape(format!(
                        "layer {:?} sums inputs of different sizes {:?}",
                        self.name, input_sizes
                    )));
                }
                Ok(first)
            }
            LayerKind::Concat => Ok(input_sizes.iter().sum()),
            _ => {
                if input_sizes.len() != 1 {
                    return Err(Error::Shape(format!(
                        "layer {:?} expects a single input",
                        self.name
                    )));
                }
                Ok(input_sizes[0])
            }
        }
    }

    /// Evaluates the layer on a batch, one row per step.
    pub fn forward(&self, inputs: &[ArrayView2<f32>]) -> Result<Array2<f32>> {
        match &self.kind {
            LayerKind::Dense { w, b, .. } => Ok(inputs[0].dot(w) + b),
            LayerKind::Tanh => Ok(inputs[0].mapv(f32::tanh)),
            LayerKind::Relu => Ok(inputs[0].mapv(|x| x.max(0.0))),
            LayerKind::Linear { w, b } => Ok(inputs[0].mapv(|x| x * w + b)),
            LayerKind::Softmax { temperature } => Ok(softmax_rows(inputs[0], *temperature)),
            LayerKind::Sum => {
                let mut out = inputs[0].to_owned();
                for input in &inputs[1..] {
                    out += input;
                }
                Ok(out)
            }
            LayerKind::Concat => concatenate(Axis(1), inputs)
                .map_err(|e| Error::Shape(format!("layer {:?}: {}", self.name, e))),
        }
    }

    /// Backpropagates one step, updating traces and parameters in place.
    ///
    /// `grad` is the gradient of the loss with respect to the layer
    /// output; `delta` the TD error of the step. Returns the gradients
    /// with respect to every input.
    pub fn backward(
        &mut self,
        inputs: &[ArrayView1<f32>],
        output: ArrayView1<f32>,
        grad: ArrayView1<f32>,
        delta: f32,
        lambda: f32,
    ) -> Result<Vec<Array1<f32>>> {
        match &mut self.kind {
            LayerKind::Dense { w, b, e_w, e_b } => {
                let dx = grad.dot(&w.t());
                let x = inputs[0];
                let outer = x
                    .insert_axis(Axis(1))
                    .dot(&grad.insert_axis(Axis(0)));
                // e = lambda e + dL/dtheta; theta += delta e
                e_w.zip_mut_with(&outer, |e, &g| *e = lambda * *e + g);
                e_b.zip_mut_with(&grad.insert_axis(Axis(0)), |e, &g| *e = lambda * *e + g);
                w.zip_mut_with(e_w, |wv, &e| *wv += delta * e);
                b.zip_mut_with(e_b, |bv, &e| *bv += delta * e);
                Ok(vec![dx])
            }
            LayerKind::Tanh => {
                let dx = grad
                    .iter()
                    .zip(output.iter())
                    .map(|(&g, &y)| g * (1.0 - y * y))
                    .collect();
                Ok(vec![Array1::from_vec(dx)])
            }
            LayerKind::Relu => {
                let dx = grad
                    .iter()
                    .zip(inputs[0].iter())
                    .map(|(&g, &x)| if x > 0.0 { g } else { 0.0 })
                    .collect();
                Ok(vec![Array1::from_vec(dx)])
            }
            LayerKind::Linear { w, .. } => Ok(vec![grad.mapv(|g| g * *w)]),
            LayerKind::Softmax { temperature } => {
                // dx = g1 - y * sum(g1) with g1 = grad * y / T
                let g1: Array1<f32> = grad
                    .iter()
                    .zip(output.iter())
                    .map(|(&g, &y)| g * y / *temperature)
                    .collect();
                let total = g1.sum();
                let dx = g1
                    .iter()
                    .zip(output.iter())
                    .map(|(&g, &y)| g - y * total)
                    .collect();
                Ok(vec![Array1::from_vec(dx)])
            }
            LayerKind::Sum => Ok(inputs.iter().map(|_| grad.to_owned()).collect()),
            LayerKind::Concat => {
                let mut parts = Vec::with_capacity(inputs.len());
                let mut offset = 0;
                for input in inputs {
                    let len = input.len();
                    parts.push(grad.slice(ndarray::s![offset..offset + len]).to_owned());
                    offset += len;
                }
                Ok(parts)
            }
        }
    }

    /// Zeroes the eligibility traces.
    pub fn reset_traces(&mut self) {
        if let LayerKind::Dense { e_w, e_b, .. } = &mut self.kind {
            e_w.fill(0.0);
            e_b.fill(0.0);
        }
    }
}

/// Row-wise softmax with temperature.
fn softmax_rows(x: ArrayView2<f32>, temperature: f32) -> Array2<f32> {
    let mut out = x.mapv(|v| v / temperature);
    for mut row in out.rows_mut() {
        let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row.mapv_inplace(|v| v / total);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn single(name: &str, kind: LayerKind) -> Layer {
        Layer {
            name: name.to_string(),
            inputs: vec!["input".to_string()],
            kind,
        }
    }

    #[test]
    fn test_softmax_temperature_1() {
        let layer = single("out", LayerKind::Softmax { temperature: 1.0 });
        let y = layer.forward(&[array![[1.0, 0.0, 0.0]].view()]).unwrap();
        assert!((y[[0, 0]] - 0.5761).abs() < 1e-4);
        assert!((y[[0, 1]] - 0.2119).abs() < 1e-4);
        assert!((y[[0, 2]] - 0.2119).abs() < 1e-4);
        assert!((y.row(0).sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_softmax_temperature_half() {
        let layer = single("out", LayerKind::Softmax { temperature: 0.5 });
        let y = layer.forward(&[array![[1.0, 0.0, 0.0]].view()]).unwrap();
        assert!((y[[0, 0]] - 0.7866).abs() < 1e-4);
        assert!((y[[0, 1]] - 0.1065).abs() < 1e-4);
        assert!((y[[0, 2]] - 0.1065).abs() < 1e-4);
    }

    #[test]
    fn test_dense_forward() {
        let layer = single(
            "dense",
            LayerKind::Dense {
                w: array![[1.0, 2.0], [3.0, 4.0]],
                b: array![[0.5, -0.5]],
                e_w: Array2::zeros((2, 2)),
                e_b: Array2::zeros((1, 2)),
            },
        );
        let y = layer.forward(&[array![[1.0, 1.0]].view()]).unwrap();
        assert_eq!(y, array![[4.5, 5.5]]);
    }

    #[test]
    fn test_dense_backward_updates_params() {
        let mut layer = single(
            "dense",
            LayerKind::Dense {
                w: array![[1.0], [0.0]],
                b: array![[0.0]],
                e_w: Array2::zeros((2, 1)),
                e_b: Array2::zeros((1, 1)),
            },
        );
        let x = array![2.0, 3.0];
        let y = array![2.0];
        let grad = array![1.0];
        let dx = layer
            .backward(&[x.view()], y.view(), grad.view(), 0.5, 0.0)
            .unwrap();
        // dx uses the pre-update weights
        let LayerKind::Dense { w, b, e_w, e_b } = &layer.kind else {
            unreachable!()
        };
        // e = x^T grad, theta += delta e
        assert_eq!(*e_w, array![[2.0], [3.0]]);
        assert_eq!(*e_b, array![[1.0]]);
        assert_eq!(*w, array![[2.0], [1.5]]);
        assert_eq!(*b, array![[0.5]]);
        assert_eq!(dx[0], array![1.0, 0.0]);
    }

    #[test]
    fn test_dense_trace_decay() {
        let mut layer = single(
            "dense",
            LayerKind::Dense {
                w: array![[0.0]],
                b: array![[0.0]],
                e_w: Array2::zeros((1, 1)),
                e_b: Array2::zeros((1, 1)),
            },
        );
        let x = array![1.0];
        let y = array![0.0];
        let grad = array![1.0];
        layer
            .backward(&[x.view()], y.view(), grad.view(), 0.0, 0.5)
            .unwrap();
        layer
            .backward(&[x.view()], y.view(), grad.view(), 0.0, 0.5)
            .unwrap();
        let LayerKind::Dense { e_w, .. } = &layer.kind else {
            unreachable!()
        };
        // e = 0.5 * 1 + 1 after the second step
        assert_eq!(e_w[[0, 0]], 1.5);
    }

    #[test]
    fn test_tanh_backward() {
        let mut layer = single("tanh", LayerKind::Tanh);
        let x = array![0.5];
        let y = x.mapv(f32::tanh);
        let grad = array![2.0];
        let dx = layer
            .backward(&[x.view()], y.view(), grad.view(), 0.0, 0.0)
            .unwrap();
        assert!((dx[0][0] - 2.0 * (1.0 - y[0] * y[0])).abs() < 1e-6);
    }

    #[test]
    fn test_relu_backward() {
        let mut layer = single("relu", LayerKind::Relu);
        let x = array![1.0, -1.0];
        let y = array![1.0, 0.0];
        let grad = array![3.0, 3.0];
        let dx = layer
            .backward(&[x.view()], y.view(), grad.view(), 0.0, 0.0)
            .unwrap();
        assert_eq!(dx[0], array![3.0, 0.0]);
    }

    #[test]
    fn test_concat_split() {
        let mut layer = Layer {
            name: "concat".to_string(),
            inputs: vec!["a".to_string(), "b".to_string()],
            kind: LayerKind::Concat,
        };
        let a = array![[1.0, 2.0]];
        let b = array![[3.0]];
        let y = layer.forward(&[a.view(), b.view()]).unwrap();
        assert_eq!(y, array![[1.0, 2.0, 3.0]]);

        let grad = array![4.0, 5.0, 6.0];
        let dx = layer
            .backward(
                &[a.row(0), b.row(0)],
                y.row(0),
                grad.view(),
                0.0,
                0.0,
            )
            .unwrap();
        assert_eq!(dx[0], array![4.0, 5.0]);
        assert_eq!(dx[1], array![6.0]);
    }

    #[test]
    fn test_sum_backward() {
        let mut layer = Layer {
            name: "sum".to_string(),
            inputs: vec!["a".to_string(), "b".to_string()],
            kind: LayerKind::Sum,
        };
        let a = array![[1.0, 2.0]];
        let b = array![[3.0, 4.0]];
        let y = layer.forward(&[a.view(), b.view()]).unwrap();
        assert_eq!(y, array![[4.0, 6.0]]);
        let grad = array![1.0, -1.0];
        let dx = layer
            .backward(&[a.row(0), b.row(0)], y.row(0), grad.view(), 0.0, 0.0)
            .unwrap();
        assert_eq!(dx[0], grad);
        assert_eq!(dx[1], grad);
    }

    #[test]
    fn test_softmax_backward_balances() {
        // With a uniform output the gradient is orthogonal to the ones
        // vector: the components sum to zero
        let mut layer = single("out", LayerKind::Softmax { temperature: 1.0 });
        let x = array![0.0, 0.0, 0.0];
        let y = array![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0];
        let grad = array![3.0, 0.0, 0.0];
        let dx = layer
            .backward(&[x.view()], y.view(), grad.view(), 0.0, 0.0)
            .unwrap();
        assert!(dx[0].sum().abs() < 1e-6);
        assert!(dx[0][0] > 0.0);
    }
}
