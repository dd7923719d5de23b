//! Named DAG of layers with TD(lambda) training.
//!
//! Layers are held in an arena addressed by name; the cycle-free
//! evaluation order is computed once at build time. The forward pass
//! stashes every layer value so that the backward pass can replay the
//! per-step gradients with a shared scalar delta.

mod layers;

pub use layers::{Layer, LayerKind};

use crate::error::{Error, Result};
use crate::rng::SeedRng;
use crate::spec::Signals;
use crate::store::Props;
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declarative layer specification parsed from the agent configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LayerSpec {
    #[serde(rename_all = "camelCase")]
    Dense {
        inputs: Vec<String>,
        input_size: usize,
        output_size: usize,
    },
    Tanh {
        inputs: Vec<String>,
    },
    Relu {
        inputs: Vec<String>,
    },
    Linear {
        inputs: Vec<String>,
        w: f32,
        b: f32,
    },
    Softmax {
        inputs: Vec<String>,
        temperature: f32,
    },
    Sum {
        inputs: Vec<String>,
    },
    Concat {
        inputs: Vec<String>,
    },
}

impl LayerSpec {
    pub fn inputs(&self) -> &[String] {
        match self {
            LayerSpec::Dense { inputs, .. }
            | LayerSpec::Tanh { inputs }
            | LayerSpec::Relu { inputs }
            | LayerSpec::Linear { inputs, .. }
            | LayerSpec::Softmax { inputs, .. }
            | LayerSpec::Sum { inputs }
            | LayerSpec::Concat { inputs } => inputs,
        }
    }
}

/// Network specification: layer name to layer spec.
pub type NetworkSpec = BTreeMap<String, LayerSpec>;

/// Values stashed by a forward pass: source signals and layer outputs by
/// name, one row per step.
#[derive(Clone, Debug)]
pub struct NetworkState {
    pub values: BTreeMap<String, Array2<f32>>,
}

/// The computation-graph network.
#[derive(Clone, Debug)]
pub struct TDNetwork {
    spec: NetworkSpec,
    layers: BTreeMap<String, Layer>,
    forward_order: Vec<String>,
    sizes: BTreeMap<String, usize>,
}

impl TDNetwork {
    /// Builds the network from its spec.
    ///
    /// `source_sizes` gives the width of every external input signal.
    /// When `props` is given, trainable parameters are restored from it,
    /// otherwise they are initialized from the random source.
    pub fn build(
        spec: NetworkSpec,
        source_sizes: &BTreeMap<String, usize>,
        props: Option<&Props>,
        rng: &mut SeedRng,
    ) -> Result<Self> {
        let forward_order = topological_order(&spec, source_sizes)?;

        let mut sizes: BTreeMap<String, usize> = source_sizes.clone();
        let mut layers = BTreeMap::new();
        for name in &forward_order {
            let layer_spec = &spec[name];
            let mut layer = create_layer(name, layer_spec, rng)?;
            let input_sizes: Vec<usize> = layer
                .inputs
                .iter()
                .map(|n| {
                    sizes.get(n).copied().ok_or_else(|| {
                        Error::Shape(format!("layer {:?} has unknown input {:?}", name, n))
                    })
                })
                .collect::<Result<_>>()?;
            let output_size = layer.output_size(&input_sizes)?;
            sizes.insert(name.clone(), output_size);
            if let Some(props) = props {
                restore_params(&mut layer, props)?;
            }
            layers.insert(name.clone(), layer);
        }

        Ok(Self {
            spec,
            layers,
            forward_order,
            sizes,
        })
    }

    pub fn spec(&self) -> &NetworkSpec {
        &self.spec
    }

    /// Width of a source or layer output.
    pub fn size_of(&self, name: &str) -> Option<usize> {
        self.sizes.get(name).copied()
    }

    /// Evaluates the network over a batch of input signals.
    pub fn forward(&self, inputs: &Signals) -> Result<NetworkState> {
        let mut values: BTreeMap<String, Array2<f32>> = inputs.clone();
        for name in &self.forward_order {
            let layer = &self.layers[name];
            let output = {
                let views: Vec<ArrayView2<f32>> = layer
                    .inputs
                    .iter()
                    .map(|n| {
                        values.get(n).map(|v| v.view()).ok_or_else(|| {
                            Error::Shape(format!("missing input {:?} for layer {:?}", n, name))
                        })
                    })
                    .collect::<Result<_>>()?;
                layer.forward(&views)?
            };
            values.insert(name.clone(), output);
        }
        Ok(NetworkState { values })
    }

    /// Trains the network over a batch of steps.
    ///
    /// `state` is the forward state of the same steps; `output_grads`
    /// holds the loss gradients per output layer (learning rates folded
    /// in); `deltas` the TD error per step. Traces and parameters are
    /// updated in place, step by step.
    pub fn train(
        &mut self,
        state: &NetworkState,
        output_grads: &BTreeMap<String, Array2<f32>>,
        deltas: &[f32],
        lambda: f32,
    ) -> Result<()> {
        let order: Vec<String> = self.forward_order.iter().rev().cloned().collect();
        for (i, &delta) in deltas.iter().enumerate() {
            if !delta.is_finite() {
                return Err(Error::Numeric(format!("delta[{}] = {}", i, delta)));
            }
            let mut grads: BTreeMap<String, Array1<f32>> = output_grads
                .iter()
                .map(|(name, g)| (name.clone(), g.row(i).to_owned()))
                .collect();
            for name in &order {
                let Some(grad) = grads.remove(name) else {
                    continue;
                };
                if !grad.iter().all(|v| v.is_finite()) {
                    return Err(Error::Numeric(format!(
                        "gradient of {:?} at step {} is not finite",
                        name, i
                    )));
                }
                let layer = self
                    .layers
                    .get_mut(name)
                    .ok_or_else(|| Error::Shape(format!("unknown output layer {:?}", name)))?;
                let input_rows = layer
                    .inputs
                    .iter()
                    .map(|n| {
                        state.values.get(n).map(|v| v.row(i)).ok_or_else(|| {
                            Error::Shape(format!("missing state of {:?} for layer {:?}", n, name))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let output_row = state
                    .values
                    .get(name)
                    .map(|v| v.row(i))
                    .ok_or_else(|| Error::Shape(format!("missing state of layer {:?}", name)))?;
                let input_grads =
                    layer.backward(&input_rows, output_row, grad.view(), delta, lambda)?;
                for (input_name, dx) in layer.inputs.clone().iter().zip(input_grads) {
                    grads
                        .entry(input_name.clone())
                        .and_modify(|g| *g += &dx)
                        .or_insert(dx);
                }
            }
        }
        Ok(())
    }

    /// Zeroes every eligibility trace.
    pub fn reset_traces(&mut self) {
        for layer in self.layers.values_mut() {
            layer.reset_traces();
        }
    }

    /// Collects the trainable parameters and traces for persistence.
    pub fn props(&self) -> Props {
        let mut props = Props::new();
        for (name, layer) in &self.layers {
            if let LayerKind::Dense { w, b, e_w, e_b } = &layer.kind {
                props.insert(format!("{}.W", name), w.clone().into_dyn());
                props.insert(format!("{}.b", name), b.clone().into_dyn());
                props.insert(format!("{}.eW", name), e_w.clone().into_dyn());
                props.insert(format!("{}.eb", name), e_b.clone().into_dyn());
            }
        }
        props
    }
}

fn create_layer(name: &str, spec: &LayerSpec, rng: &mut SeedRng) -> Result<Layer> {
    let kind = match spec {
        LayerSpec::Dense {
            input_size,
            output_size,
            ..
        } => LayerKind::dense(*input_size, *output_size, rng),
        LayerSpec::Tanh { .. } => LayerKind::Tanh,
        LayerSpec::Relu { .. } => LayerKind::Relu,
        LayerSpec::Linear { w, b, .. } => LayerKind::Linear { w: *w, b: *b },
        LayerSpec::Softmax { temperature, .. } => {
            if *temperature <= 0.0 {
                return Err(Error::Spec(format!(
                    "layer {:?} has non-positive temperature",
                    name
                )));
            }
            LayerKind::Softmax {
                temperature: *temperature,
            }
        }
        LayerSpec::Sum { .. } => LayerKind::Sum,
        LayerSpec::Concat { .. } => LayerKind::Concat,
    };
    Ok(Layer {
        name: name.to_string(),
        inputs: spec.inputs().to_vec(),
        kind,
    })
}

/// Restores dense parameters from a property map.
fn restore_params(layer: &mut Layer, props: &Props) -> Result<()> {
    let LayerKind::Dense { w, b, e_w, e_b } = &mut layer.kind else {
        return Ok(());
    };
    let name = &layer.name;
    for (suffix, target, required) in [
        ("W", &mut *w, true),
        ("b", &mut *b, true),
        ("eW", &mut *e_w, false),
        ("eb", &mut *e_b, false),
    ] {
        let key = format!("{}.{}", name, suffix);
        match props.get(&key) {
            Some(value) => {
                let value = value
                    .clone()
                    .into_dimensionality::<ndarray::Ix2>()
                    .map_err(|_| Error::ModelCorrupt(format!("{} is not a matrix", key)))?;
                if value.dim() != target.dim() {
                    return Err(Error::ModelCorrupt(format!(
                        "{} has shape {:?}, expected {:?}",
                        key,
                        value.dim(),
                        target.dim()
                    )));
                }
                *target = value;
            }
            None if required => {
                return Err(Error::ModelCorrupt(format!("missing property {}", key)));
            }
            None => {}
        }
    }
    Ok(())
}

/// Kahn topological sort over the layer graph.
fn topological_order(
    spec: &NetworkSpec,
    source_sizes: &BTreeMap<String, usize>,
) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, layer) in spec {
        if source_sizes.contains_key(name) {
            return Err(Error::Shape(format!(
                "layer {:?} shadows an input signal",
                name
            )));
        }
        let mut count = 0;
        for input in layer.inputs() {
            if spec.contains_key(input.as_str()) {
                dependents
                    .entry(input.as_str())
                    .or_default()
                    .push(name.as_str());
                count += 1;
            }
        }
        pending.insert(name.as_str(), count);
    }

    let mut ready: Vec<&str> = pending
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&name, _)| name)
        .collect();
    let mut order = Vec::with_capacity(spec.len());
    while let Some(name) = ready.pop() {
        order.push(name.to_string());
        for &dependent in dependents.get(name).into_iter().flatten() {
            let count = pending.get_mut(dependent).unwrap();
            *count -= 1;
            if *count == 0 {
                ready.push(dependent);
            }
        }
    }
    if order.len() != spec.len() {
        return Err(Error::Shape("network graph has a cycle".to_string()));
    }
    Ok(order)
}

/// Slices the first `n` rows of every signal.
pub fn slice_rows(signals: &Signals, start: usize, end: usize) -> Signals {
    signals
        .iter()
        .map(|(k, v)| (k.clone(), v.slice(ndarray::s![start..end, ..]).to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn source_sizes(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|&(k, v)| (k.to_string(), v)).collect()
    }

    fn simple_spec() -> NetworkSpec {
        let mut spec = NetworkSpec::new();
        spec.insert(
            "hidden".to_string(),
            LayerSpec::Dense {
                inputs: vec!["input".to_string()],
                input_size: 2,
                output_size: 3,
            },
        );
        spec.insert(
            "hidden.act".to_string(),
            LayerSpec::Tanh {
                inputs: vec!["hidden".to_string()],
            },
        );
        spec.insert(
            "output".to_string(),
            LayerSpec::Softmax {
                inputs: vec!["hidden.act".to_string()],
                temperature: 1.0,
            },
        );
        spec
    }

    #[test]
    fn test_build_and_forward() {
        let mut rng = SeedRng::new(1234);
        let net = TDNetwork::build(simple_spec(), &source_sizes(&[("input", 2)]), None, &mut rng)
            .unwrap();
        assert_eq!(net.size_of("output"), Some(3));

        let mut inputs = Signals::new();
        inputs.insert("input".to_string(), array![[0.5, -0.5], [1.0, 0.0]]);
        let state = net.forward(&inputs).unwrap();
        let out = &state.values["output"];
        assert_eq!(out.dim(), (2, 3));
        for row in out.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_cycle_detected() {
        let mut spec = NetworkSpec::new();
        spec.insert(
            "a".to_string(),
            LayerSpec::Tanh {
                inputs: vec!["b".to_string()],
            },
        );
        spec.insert(
            "b".to_string(),
            LayerSpec::Tanh {
                inputs: vec!["a".to_string()],
            },
        );
        let mut rng = SeedRng::new(1);
        let err = TDNetwork::build(spec, &source_sizes(&[]), None, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_dense_size_mismatch() {
        let mut spec = NetworkSpec::new();
        spec.insert(
            "dense".to_string(),
            LayerSpec::Dense {
                inputs: vec!["input".to_string()],
                input_size: 4,
                output_size: 2,
            },
        );
        let mut rng = SeedRng::new(1);
        let err =
            TDNetwork::build(spec, &source_sizes(&[("input", 2)]), None, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_unknown_input() {
        let mut spec = NetworkSpec::new();
        spec.insert(
            "dense".to_string(),
            LayerSpec::Tanh {
                inputs: vec!["nope".to_string()],
            },
        );
        let mut rng = SeedRng::new(1);
        let err = TDNetwork::build(spec, &source_sizes(&[("input", 2)]), None, &mut rng)
            .unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn test_props_round_trip_rebuild() {
        let mut rng = SeedRng::new(1234);
        let net = TDNetwork::build(simple_spec(), &source_sizes(&[("input", 2)]), None, &mut rng)
            .unwrap();
        let props = net.props();

        let mut rng2 = SeedRng::new(999);
        let net2 = TDNetwork::build(
            simple_spec(),
            &source_sizes(&[("input", 2)]),
            Some(&props),
            &mut rng2,
        )
        .unwrap();

        let mut inputs = Signals::new();
        inputs.insert("input".to_string(), array![[0.25, 0.75]]);
        let a = net.forward(&inputs).unwrap();
        let b = net2.forward(&inputs).unwrap();
        assert_eq!(a.values["output"], b.values["output"]);
    }

    #[test]
    fn test_train_moves_critic_toward_delta() {
        // critic = dense(1 -> 1): training with positive delta and unit
        // gradient must increase the critic output
        let mut spec = NetworkSpec::new();
        spec.insert(
            "critic".to_string(),
            LayerSpec::Dense {
                inputs: vec!["input".to_string()],
                input_size: 1,
                output_size: 1,
            },
        );
        let mut rng = SeedRng::new(1234);
        let mut net =
            TDNetwork::build(spec, &source_sizes(&[("input", 1)]), None, &mut rng).unwrap();

        let mut inputs = Signals::new();
        inputs.insert("input".to_string(), array![[1.0]]);
        let before = net.forward(&inputs).unwrap().values["critic"][[0, 0]];

        let state = net.forward(&inputs).unwrap();
        let mut grads = BTreeMap::new();
        grads.insert("critic".to_string(), array![[1.0]]);
        net.train(&state, &grads, &[0.5], 0.0).unwrap();

        let after = net.forward(&inputs).unwrap().values["critic"][[0, 0]];
        assert!(after > before);
    }

    #[test]
    fn test_train_rejects_nan_delta() {
        let mut spec = NetworkSpec::new();
        spec.insert(
            "critic".to_string(),
            LayerSpec::Dense {
                inputs: vec!["input".to_string()],
                input_size: 1,
                output_size: 1,
            },
        );
        let mut rng = SeedRng::new(1);
        let mut net =
            TDNetwork::build(spec, &source_sizes(&[("input", 1)]), None, &mut rng).unwrap();
        let mut inputs = Signals::new();
        inputs.insert("input".to_string(), array![[1.0]]);
        let state = net.forward(&inputs).unwrap();
        let mut grads = BTreeMap::new();
        grads.insert("critic".to_string(), array![[1.0]]);
        let err = net.train(&state, &grads, &[f32::NAN], 0.0).unwrap_err();
        assert!(matches!(err, Error::Numeric(_)));
    }

    #[test]
    fn test_shared_trunk_accumulates_gradients() {
        // Two heads on one trunk: gradients of both flow into the trunk
        let mut spec = NetworkSpec::new();
        spec.insert(
            "trunk".to_string(),
            LayerSpec::Dense {
                inputs: vec!["input".to_string()],
                input_size: 2,
                output_size: 2,
            },
        );
        spec.insert(
            "critic".to_string(),
            LayerSpec::Dense {
                inputs: vec!["trunk".to_string()],
                input_size: 2,
                output_size: 1,
            },
        );
        spec.insert(
            "policy".to_string(),
            LayerSpec::Softmax {
                inputs: vec!["trunk".to_string()],
                temperature: 1.0,
            },
        );
        let mut rng = SeedRng::new(1234);
        let mut net =
            TDNetwork::build(spec, &source_sizes(&[("input", 2)]), None, &mut rng).unwrap();
        let mut inputs = Signals::new();
        inputs.insert("input".to_string(), array![[1.0, -1.0]]);
        let state = net.forward(&inputs).unwrap();
        let mut grads = BTreeMap::new();
        grads.insert("critic".to_string(), array![[1.0]]);
        grads.insert("policy".to_string(), array![[2.0, 0.0]]);
        net.train(&state, &grads, &[0.1], 0.5).unwrap();

        let LayerKind::Dense { e_w, .. } = &net.layers["trunk"].kind else {
            unreachable!()
        };
        assert!(e_w.iter().any(|&v| v != 0.0));
    }
}
