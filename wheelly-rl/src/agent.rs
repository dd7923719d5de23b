//! Temporal-difference actor-critic agent with a single network.
//!
//! The agent samples one class per categorical action head, accumulates a
//! fixed-length trajectory and trains the network by epochs of mini
//! batches over a differential-reward advantage signal. The model is
//! self-describing on disk: `agent.yml` holds the spec, `agent.bin` the
//! binary property map.

use crate::error::{Error, Result};
use crate::kpi::{KpiRecord, KpiSender};
use crate::network::{slice_rows, NetworkSpec, NetworkState, TDNetwork};
use crate::processors::{InputProcessor, ProcessorSpec};
use crate::rng::SeedRng;
use crate::spec::{signal_sizes, SignalSpec, Signals};
use crate::store::{self, Props};
use ndarray::{array, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Schema id of the persisted agent spec.
pub const SPEC_SCHEMA: &str = "https://wheelly.org/schemas/td-agent-spec-0.4";

pub const DEFAULT_NUM_STEPS: usize = 2048;
pub const DEFAULT_NUM_EPOCHS: usize = 1;
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Name of the critic output layer.
pub const CRITIC: &str = "critic";

fn default_schema() -> String {
    SPEC_SCHEMA.to_string()
}

fn default_num_steps() -> usize {
    DEFAULT_NUM_STEPS
}

fn default_num_epochs() -> usize {
    DEFAULT_NUM_EPOCHS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Self-describing agent specification, persisted as `agent.yml`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "$schema", default = "default_schema")]
    pub schema: String,
    pub state: BTreeMap<String, SignalSpec>,
    pub actions: BTreeMap<String, SignalSpec>,
    pub reward_alpha: f32,
    /// Per-output learning rates, including the critic.
    pub alphas: BTreeMap<String, f32>,
    pub lambda: f32,
    #[serde(default = "default_num_steps")]
    pub num_steps: usize,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    pub network: NetworkSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_process: Option<Vec<ProcessorSpec>>,
}

/// One environment transition.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub state: Signals,
    pub actions: BTreeMap<String, usize>,
    pub reward: f32,
    pub next_state: Signals,
}

/// The TD actor-critic agent.
#[derive(Debug)]
pub struct TDAgent {
    spec: AgentSpec,
    avg_reward: f32,
    network: TDNetwork,
    processor: Option<InputProcessor>,
    trajectory: Vec<ExecutionResult>,
    rng: SeedRng,
    model_path: PathBuf,
    saving_interval_steps: usize,
    saving_step_counter: usize,
    backed_up: bool,
    kpis: Option<KpiSender>,
}

impl TDAgent {
    /// Creates the agent from a spec, optionally restoring the training
    /// state from a property map.
    pub fn create(
        spec: AgentSpec,
        props: Option<&Props>,
        mut rng: SeedRng,
        model_path: &Path,
        saving_interval_steps: usize,
    ) -> Result<Self> {
        if !spec.schema.starts_with("https://wheelly.org/schemas/td-agent-spec") {
            return Err(Error::Spec(format!("unknown schema {:?}", spec.schema)));
        }
        // Every action head and the critic need a learning rate
        let missing: Vec<&str> = spec
            .actions
            .keys()
            .map(String::as_str)
            .chain(std::iter::once(CRITIC))
            .filter(|key| !spec.alphas.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Spec(format!(
                "missing alphas for {}",
                missing.join(", ")
            )));
        }

        let processor = match &spec.input_process {
            Some(specs) => Some(InputProcessor::create(specs.clone(), &spec.state)?),
            None => None,
        };
        let source_spec = processor
            .as_ref()
            .map(|p| p.spec().clone())
            .unwrap_or_else(|| spec.state.clone());
        let network = TDNetwork::build(
            spec.network.clone(),
            &signal_sizes(&source_spec),
            props,
            &mut rng,
        )?;

        // The network must expose the critic and one head per action
        if network.size_of(CRITIC) != Some(1) {
            return Err(Error::Shape(
                "network has no scalar critic output".to_string(),
            ));
        }
        for (name, action) in &spec.actions {
            let num_values = action.num_values();
            if num_values < 2 {
                return Err(Error::Spec(format!(
                    "action {:?} is not a categorical head",
                    name
                )));
            }
            if network.size_of(name) != Some(num_values) {
                return Err(Error::Shape(format!(
                    "network output {:?} does not match the {} action values",
                    name, num_values
                )));
            }
        }

        let avg_reward = props.and_then(|p| store::scalar(p, "avgReward")).unwrap_or(0.0);
        Ok(Self {
            spec,
            avg_reward,
            network,
            processor,
            trajectory: Vec::new(),
            rng,
            model_path: model_path.to_path_buf(),
            saving_interval_steps: saving_interval_steps.max(1),
            saving_step_counter: 0,
            backed_up: false,
            kpis: None,
        })
    }

    /// Loads the agent from `model_path/agent.yml` + `model_path/agent.bin`.
    pub fn load(model_path: &Path, saving_interval_steps: usize, rng: SeedRng) -> Result<Self> {
        let spec: AgentSpec = serde_yaml::from_reader(File::open(model_path.join("agent.yml"))?)?;
        let props = store::load_props(&model_path.join("agent.bin"))?;
        Self::create(spec, Some(&props), rng, model_path, saving_interval_steps)
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn network(&self) -> &TDNetwork {
        &self.network
    }

    pub fn avg_reward(&self) -> f32 {
        self.avg_reward
    }

    pub fn trajectory_len(&self) -> usize {
        self.trajectory.len()
    }

    /// Attaches the KPI channel.
    pub fn set_kpis(&mut self, sender: KpiSender) {
        self.kpis = Some(sender);
    }

    fn process(&self, state: &Signals) -> Signals {
        match &self.processor {
            Some(processor) => processor.process(state),
            None => state.clone(),
        }
    }

    /// Picks one class per action head by sampling the policy.
    pub fn act(&mut self, state: &Signals) -> Result<BTreeMap<String, usize>> {
        let processed = self.process(state);
        let net_state = self.network.forward(&processed)?;
        let mut actions = BTreeMap::new();
        for name in self.spec.actions.keys() {
            let pi = net_state
                .values
                .get(name)
                .ok_or_else(|| Error::Shape(format!("missing policy output {:?}", name)))?;
            actions.insert(name.clone(), self.rng.choose(pi.row(0)));
        }
        Ok(actions)
    }

    /// Records a transition; trains and clears when the trajectory is
    /// full. Returns true when a training pass ran.
    pub fn observe(&mut self, result: ExecutionResult) -> Result<bool> {
        self.trajectory.push(result);
        if self.trajectory.len() < self.spec.num_steps {
            return Ok(false);
        }
        let (states, masks, rewards) = self.trajectory_tensors()?;
        self.trajectory.clear();
        self.train_batch(&states, &masks, &rewards)?;
        Ok(true)
    }

    /// Stacks the trajectory into training tensors: `n + 1` states, `n`
    /// action masks and `n` rewards.
    fn trajectory_tensors(&self) -> Result<(Signals, BTreeMap<String, Array2<f32>>, Array2<f32>)> {
        let n = self.trajectory.len();
        let mut processed: Vec<Signals> = Vec::with_capacity(n + 1);
        for step in &self.trajectory {
            processed.push(self.process(&step.state));
        }
        processed.push(self.process(&self.trajectory[n - 1].next_state));

        let mut states = Signals::new();
        for key in processed[0].keys() {
            let width = processed[0][key].ncols();
            let mut stacked = Array2::zeros((n + 1, width));
            for (i, signals) in processed.iter().enumerate() {
                let row = signals
                    .get(key)
                    .ok_or_else(|| Error::Spec(format!("missing signal {:?}", key)))?;
                stacked.row_mut(i).assign(&row.row(0));
            }
            states.insert(key.clone(), stacked);
        }

        let mut masks = BTreeMap::new();
        for (name, action) in &self.spec.actions {
            let num_values = action.num_values();
            let mut mask = Array2::zeros((n, num_values));
            for (i, step) in self.trajectory.iter().enumerate() {
                let &chosen = step
                    .actions
                    .get(name)
                    .ok_or_else(|| Error::Spec(format!("missing action {:?}", name)))?;
                if chosen >= num_values {
                    return Err(Error::Spec(format!(
                        "action {:?} value {} out of range",
                        name, chosen
                    )));
                }
                mask[[i, chosen]] = 1.0;
            }
            masks.insert(name.clone(), mask);
        }

        let rewards =
            Array2::from_shape_fn((n, 1), |(i, _)| self.trajectory[i].reward);
        Ok((states, masks, rewards))
    }

    /// Trains over a full trajectory: `num_epochs` passes of mini-batches.
    ///
    /// `states` has one row more than `masks` and `rewards`.
    pub fn train_batch(
        &mut self,
        states: &Signals,
        masks: &BTreeMap<String, Array2<f32>>,
        rewards: &Array2<f32>,
    ) -> Result<()> {
        for epoch in 0..self.spec.num_epochs {
            self.train_epoch(epoch, states, masks, rewards)?;
            self.saving_step_counter += 1;
            if self.saving_step_counter >= self.saving_interval_steps {
                self.saving_step_counter = 0;
                self.autosave();
            }
        }
        Ok(())
    }

    fn train_epoch(
        &mut self,
        epoch: usize,
        states: &Signals,
        masks: &BTreeMap<String, Array2<f32>>,
        rewards: &Array2<f32>,
    ) -> Result<()> {
        let n = rewards.nrows();
        let batch_size = self.spec.batch_size.max(1);
        if batch_size >= n {
            return self.train_mini_batch(epoch, 0, n, states, masks, rewards);
        }
        let mut start = 0;
        while start < n {
            let m = batch_size.min(n - start);
            let batch_states = slice_rows(states, start, start + m + 1);
            let batch_masks: BTreeMap<String, Array2<f32>> = masks
                .iter()
                .map(|(k, v)| (k.clone(), v.slice(ndarray::s![start..start + m, ..]).to_owned()))
                .collect();
            let batch_rewards = rewards
                .slice(ndarray::s![start..start + m, ..])
                .to_owned();
            self.train_mini_batch(epoch, start, n, &batch_states, &batch_masks, &batch_rewards)?;
            start += m;
        }
        Ok(())
    }

    /// Trains one mini-batch of `m` steps (states carry `m + 1` rows).
    fn train_mini_batch(
        &mut self,
        epoch: usize,
        start_step: usize,
        total_steps: usize,
        states: &Signals,
        masks: &BTreeMap<String, Array2<f32>>,
        rewards: &Array2<f32>,
    ) -> Result<()> {
        let m = rewards.nrows();

        // Critic values over the m + 1 states
        let values_state = self.network.forward(states)?;
        let critic = &values_state.values[CRITIC];

        // Sequential deltas with the running average reward
        let mut deltas = Vec::with_capacity(m);
        let mut avg_rewards = Vec::with_capacity(m);
        let mut avg_reward = self.avg_reward;
        for i in 0..m {
            avg_rewards.push(avg_reward);
            let delta = rewards[[i, 0]] - avg_reward + critic[[i + 1, 0]] - critic[[i, 0]];
            deltas.push(delta);
            avg_reward += delta * self.spec.reward_alpha;
        }
        if deltas.iter().any(|d| !d.is_finite()) {
            log::error!("non-finite delta, mini-batch aborted");
            return Ok(());
        }

        // Forward pass over the first m states for training
        let s0 = slice_rows(states, 0, m);
        let training_state = self.network.forward(&s0)?;

        // Output gradients: mask / pi scaled by the head alphas, plus the
        // constant critic gradient
        let mut grads: BTreeMap<String, Array2<f32>> = BTreeMap::new();
        for name in self.spec.actions.keys() {
            let pi = &training_state.values[name];
            let alpha = self.spec.alphas[name];
            grads.insert(name.clone(), masks[name].clone() / pi * alpha);
        }
        grads.insert(
            CRITIC.to_string(),
            Array2::from_elem((m, 1), self.spec.alphas[CRITIC]),
        );

        match self
            .network
            .train(&training_state, &grads, &deltas, self.spec.lambda)
        {
            Ok(()) => {}
            Err(Error::Numeric(reason)) => {
                log::error!("{}, mini-batch aborted", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.avg_reward = avg_reward;

        if let Some(kpis) = &self.kpis {
            let record = self.kpi_record(
                epoch,
                start_step,
                total_steps,
                &training_state,
                masks,
                &grads,
                &deltas,
                &avg_rewards,
                &s0,
            )?;
            kpis.send(record);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn kpi_record(
        &self,
        epoch: usize,
        start_step: usize,
        total_steps: usize,
        training_state: &NetworkState,
        masks: &BTreeMap<String, Array2<f32>>,
        grads: &BTreeMap<String, Array2<f32>>,
        deltas: &[f32],
        avg_rewards: &[f32],
        s0: &Signals,
    ) -> Result<KpiRecord> {
        let m = deltas.len();
        let mut record = KpiRecord::new();
        record.insert(
            "delta".to_string(),
            Array2::from_shape_fn((m, 1), |(i, _)| deltas[i]),
        );
        record.insert(
            "avgReward".to_string(),
            Array2::from_shape_fn((m, 1), |(i, _)| avg_rewards[i]),
        );
        for (name, value) in &training_state.values {
            record.insert(format!("trainingLayers.{}", name), value.clone());
        }
        for (name, mask) in masks {
            record.insert(format!("actionMasks.{}", name), mask.clone());
        }
        for (name, grad) in grads {
            record.insert(format!("grads.{}", name), grad.clone());
            let scaled = Array2::from_shape_fn(grad.dim(), |(i, j)| grad[[i, j]] * deltas[i]);
            record.insert(format!("deltaGrads.{}", name), scaled);
        }
        record.insert(
            "counters".to_string(),
            array![[
                epoch as f32,
                self.spec.num_epochs as f32,
                start_step as f32,
                total_steps as f32
            ]],
        );
        // Layer values after the update
        let trained = self.network.forward(s0)?;
        for (name, value) in &trained.values {
            record.insert(format!("trainedLayers.{}", name), value.clone());
        }
        Ok(record)
    }

    /// Writes the model, backing up the previous binary once per run.
    pub fn save(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.model_path)?;
        serde_yaml::to_writer(
            File::create(self.model_path.join("agent.yml"))?,
            &self.spec,
        )?;
        let bin_path = self.model_path.join("agent.bin");
        if bin_path.exists() && !self.backed_up {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            std::fs::copy(&bin_path, self.model_path.join(format!("agent-{}.bin", stamp)))?;
            self.backed_up = true;
        }
        let mut props = self.network.props();
        props.insert("avgReward".to_string(), array![self.avg_reward].into_dyn());
        store::save_props(&bin_path, &props)?;
        log::info!("agent saved to {:?}", self.model_path);
        Ok(())
    }

    /// Saves, keeping the session alive on failure.
    pub fn autosave(&mut self) {
        if let Err(e) = self.save() {
            log::error!("agent save failed: {}, previous backup kept", e);
        }
    }
}
