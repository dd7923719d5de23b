//! Signal specifications shared between environments and agents.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named signal values, one row vector per signal.
///
/// Keys are ordered so that every traversal of a signal map is
/// deterministic.
pub type Signals = BTreeMap<String, Array2<f32>>;

/// Specification of a single signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalSpec {
    /// Categorical signal with values in [0, num_values).
    #[serde(rename_all = "camelCase")]
    Int { shape: Vec<usize>, num_values: usize },
    /// Continuous signal bounded to [min_value, max_value].
    #[serde(rename_all = "camelCase")]
    Float {
        shape: Vec<usize>,
        min_value: f32,
        max_value: f32,
    },
}

impl SignalSpec {
    /// Number of scalar elements in the signal.
    pub fn size(&self) -> usize {
        let shape = match self {
            SignalSpec::Int { shape, .. } => shape,
            SignalSpec::Float { shape, .. } => shape,
        };
        shape.iter().product::<usize>().max(1)
    }

    /// Number of classes of a categorical signal, 0 otherwise.
    pub fn num_values(&self) -> usize {
        match self {
            SignalSpec::Int { num_values, .. } => *num_values,
            SignalSpec::Float { .. } => 0,
        }
    }
}

/// Sizes of the signals in a spec map.
pub fn signal_sizes(spec: &BTreeMap<String, SignalSpec>) -> BTreeMap<String, usize> {
    spec.iter().map(|(k, v)| (k.clone(), v.size())).collect()
}
