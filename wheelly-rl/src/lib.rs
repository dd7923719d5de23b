//! Temporal-difference actor-critic learner with a single neural network.
//!
//! The crate provides:
//!
//! - signal specifications shared between environments and agents
//! - a small computation-graph network with TD(lambda) training and
//!   eligibility traces
//! - the TD agent: policy sampling, trajectory collection, epoch and
//!   mini-batch training, model persistence with autosave
//! - input processors transforming raw observations
//! - pluggable KPI sinks (CSV and binary) fed by a writer thread

pub mod agent;
pub mod error;
pub mod kpi;
pub mod network;
pub mod processors;
pub mod rng;
pub mod spec;
pub mod store;

pub use agent::{AgentSpec, ExecutionResult, TDAgent};
pub use error::{Error, Result};
pub use network::{LayerSpec, NetworkSpec, TDNetwork};
pub use rng::SeedRng;
pub use spec::{SignalSpec, Signals};
