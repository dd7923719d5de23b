//! Input processors: deterministic transforms applied to the raw
//! observation before it reaches the network.
//!
//! A pipeline is described in the agent spec and persisted with it, so a
//! reloaded agent reprocesses observations identically.

use crate::error::{Error, Result};
use crate::spec::{SignalSpec, Signals};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Specification of a single processor stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessorSpec {
    /// Tiles a bounded float signal into one-hot partitions.
    #[serde(rename_all = "camelCase")]
    Partition {
        /// Name of the produced signal.
        name: String,
        /// Name of the consumed signal.
        input: String,
        /// Number of tiles per element.
        num_tiles: usize,
    },
}

/// A pipeline of processor stages.
#[derive(Clone, Debug)]
pub struct InputProcessor {
    specs: Vec<ProcessorSpec>,
    stages: Vec<Stage>,
    output_spec: BTreeMap<String, SignalSpec>,
}

#[derive(Clone, Debug)]
enum Stage {
    Partition {
        name: String,
        input: String,
        num_tiles: usize,
        min_value: f32,
        max_value: f32,
        size: usize,
    },
}

impl InputProcessor {
    /// Builds the pipeline, validating each stage against the evolving
    /// signal spec.
    pub fn create(
        specs: Vec<ProcessorSpec>,
        input_spec: &BTreeMap<String, SignalSpec>,
    ) -> Result<Self> {
        if specs.is_empty() {
            return Err(Error::Spec("empty processor pipeline".to_string()));
        }
        let mut spec_map = input_spec.clone();
        let mut stages = Vec::with_capacity(specs.len());
        for spec in &specs {
            match spec {
                ProcessorSpec::Partition {
                    name,
                    input,
                    num_tiles,
                } => {
                    if *num_tiles < 2 {
                        return Err(Error::Spec(format!(
                            "partition {:?} needs at least 2 tiles",
                            name
                        )));
                    }
                    let source = spec_map.get(input).ok_or_else(|| {
                        Error::Spec(format!("partition {:?} has unknown input {:?}", name, input))
                    })?;
                    let SignalSpec::Float {
                        shape,
                        min_value,
                        max_value,
                    } = source
                    else {
                        return Err(Error::Spec(format!(
                            "partition {:?} needs a float input",
                            name
                        )));
                    };
                    let size = shape.iter().product::<usize>().max(1);
                    stages.push(Stage::Partition {
                        name: name.clone(),
                        input: input.clone(),
                        num_tiles: *num_tiles,
                        min_value: *min_value,
                        max_value: *max_value,
                        size,
                    });
                    spec_map.insert(
                        name.clone(),
                        SignalSpec::Float {
                            shape: vec![size * num_tiles],
                            min_value: 0.0,
                            max_value: 1.0,
                        },
                    );
                }
            }
        }
        Ok(Self {
            specs,
            stages,
            output_spec: spec_map,
        })
    }

    /// The persisted stage specifications.
    pub fn specs(&self) -> &[ProcessorSpec] {
        &self.specs
    }

    /// The signal spec after the whole pipeline.
    pub fn spec(&self) -> &BTreeMap<String, SignalSpec> {
        &self.output_spec
    }

    /// Applies the pipeline to a set of signals.
    pub fn process(&self, signals: &Signals) -> Signals {
        let mut out = signals.clone();
        for stage in &self.stages {
            match stage {
                Stage::Partition {
                    name,
                    input,
                    num_tiles,
                    min_value,
                    max_value,
                    size,
                } => {
                    let Some(source) = out.get(input) else {
                        continue;
                    };
                    let rows = source.nrows();
                    let mut tiled = Array2::zeros((rows, size * num_tiles));
                    for (i, row) in source.rows().into_iter().enumerate() {
                        for (j, &value) in row.iter().enumerate() {
                            let span = max_value - min_value;
                            let tile = if span > 0.0 {
                                (((value - min_value) / span) * *num_tiles as f32).floor() as isize
                            } else {
                                0
                            };
                            let tile = tile.clamp(0, *num_tiles as isize - 1) as usize;
                            tiled[[i, j * num_tiles + tile]] = 1.0;
                        }
                    }
                    out.insert(name.clone(), tiled);
                }
            }
        }
        out
    }
}
