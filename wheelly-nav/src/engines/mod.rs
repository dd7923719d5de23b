//! Scripted state-machine agent.
//!
//! The behavior is described entirely by configuration: named states with
//! `onInit`/`onEntry`/`onExit` setter programs and per-state transitions
//! keyed by well-known exit tokens. Built-in states cover halting, point
//! navigation and exploration, all with an optional triangular-wave
//! sensor auto-scan.

mod states;

pub use states::{AutoScanSpec, StateNode, StateSpec};

use crate::error::{NavError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use wheelly_io::RobotStatus;
use wheelly_map::RadarMap;

/// Exit tokens of a state step.
pub const TIMEOUT_EXIT: &str = "timeout";
pub const COMPLETED_EXIT: &str = "completed";
pub const BLOCKED_EXIT: &str = "blocked";
pub const FRONT_BLOCKED_EXIT: &str = "frontBlocked";
pub const REAR_BLOCKED_EXIT: &str = "rearBlocked";
pub const NONE_EXIT: &str = "none";

/// A value stored in the processor context.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CtxValue {
    Int(i64),
    Num(f64),
    Str(String),
}

/// Key/value store shared by the states, holding the current robot view.
#[derive(Clone, Debug, Default)]
pub struct ProcessorContext {
    values: BTreeMap<String, CtxValue>,
    status: RobotStatus,
    radar: Option<RadarMap>,
}

impl ProcessorContext {
    pub fn status(&self) -> &RobotStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: RobotStatus) {
        self.status = status;
    }

    pub fn radar(&self) -> Option<&RadarMap> {
        self.radar.as_ref()
    }

    pub fn set_radar(&mut self, radar: RadarMap) {
        self.radar = Some(radar);
    }

    pub fn put(&mut self, key: impl Into<String>, value: CtxValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&CtxValue> {
        self.values.get(key)
    }

    /// Integer value of a key, 0 when absent.
    pub fn get_long(&self, key: &str) -> i64 {
        match self.values.get(key) {
            Some(CtxValue::Int(v)) => *v,
            Some(CtxValue::Num(v)) => *v as i64,
            _ => 0,
        }
    }

    /// Float value of a key, 0 when absent.
    pub fn get_num(&self, key: &str) -> f64 {
        match self.values.get(key) {
            Some(CtxValue::Int(v)) => *v as f64,
            Some(CtxValue::Num(v)) => *v,
            _ => 0.0,
        }
    }
}

/// Commands issued by one state step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RobotCommands {
    pub halt: bool,
    /// Absolute direction (DEG) and speed (pulses/s).
    pub drive: Option<(i32, f32)>,
    /// Sensor direction (DEG).
    pub scan: Option<i32>,
}

impl RobotCommands {
    pub fn halt_command() -> Self {
        Self {
            halt: true,
            ..Self::default()
        }
    }

    /// Merges the scan of another command set into this one.
    fn merge_scan(mut self, other: Option<i32>) -> Self {
        if self.scan.is_none() {
            self.scan = other;
        }
        self
    }
}

/// The scripted agent.
pub struct StateMachineAgent {
    states: BTreeMap<String, StateNode>,
    current: String,
    context: ProcessorContext,
}

impl StateMachineAgent {
    /// Builds the agent, validating the entry state and every transition
    /// target.
    pub fn create(entry: &str, specs: &BTreeMap<String, StateSpec>) -> Result<Self> {
        let states: BTreeMap<String, StateNode> = specs
            .iter()
            .map(|(id, spec)| (id.clone(), StateNode::new(id.clone(), spec.clone())))
            .collect();
        if !states.contains_key(entry) {
            return Err(NavError::Config(format!("unknown entry state {:?}", entry)));
        }
        for (id, node) in &states {
            for target in node.transition_targets() {
                if !states.contains_key(target) {
                    return Err(NavError::Config(format!(
                        "state {:?} transitions to unknown state {:?}",
                        id, target
                    )));
                }
            }
        }
        Ok(Self {
            states,
            current: entry.to_string(),
            context: ProcessorContext::default(),
        })
    }

    pub fn current_state(&self) -> &str {
        &self.current
    }

    /// Initializes every state and enters the entry state.
    pub fn init(&mut self, status: RobotStatus) {
        self.context.set_status(status);
        for node in self.states.values() {
            node.init(&mut self.context);
        }
        self.states[&self.current.clone()].entry(&mut self.context);
    }

    /// Steps the current state and applies any transition.
    pub fn step(&mut self, status: RobotStatus, radar: RadarMap) -> RobotCommands {
        self.context.set_status(status);
        self.context.set_radar(radar);
        let (exit, commands) = self.states[&self.current].step(&mut self.context);
        if exit != NONE_EXIT {
            match self.states[&self.current].transition(&exit) {
                Some(target) => {
                    let target = target.to_string();
                    log::info!("{} --{}--> {}", self.current, exit, target);
                    self.states[&self.current].exit(&mut self.context);
                    self.current = target;
                    self.states[&self.current].entry(&mut self.context);
                }
                None => {
                    log::warn!("state {:?} has no transition for {:?}", self.current, exit);
                }
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(yaml: &str) -> BTreeMap<String, StateSpec> {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_entry_validated() {
        let states = specs(
            r#"
start:
  type: halt
"#,
        );
        assert!(StateMachineAgent::create("start", &states).is_ok());
        assert!(StateMachineAgent::create("nope", &states).is_err());
    }

    #[test]
    fn test_transition_target_validated() {
        let states = specs(
            r#"
start:
  type: halt
  timeout: 1000
  transitions:
    timeout: nowhere
"#,
        );
        assert!(StateMachineAgent::create("start", &states).is_err());
    }

    #[test]
    fn test_timeout_transition() {
        let states = specs(
            r#"
start:
  type: halt
  timeout: 1000
  transitions:
    timeout: next
next:
  type: halt
"#,
        );
        let mut agent = StateMachineAgent::create("start", &states).unwrap();
        let status = RobotStatus::default();
        agent.init(status.clone());
        let radar = RadarMap::new(3, 3, wheelly_map::Point2::ZERO, 0.2, 0.1, 1000);

        let commands = agent.step(status.clone(), radar.clone());
        assert!(commands.halt);
        assert_eq!(agent.current_state(), "start");

        // Advance the robot clock past the timeout
        let late = timed_status(2000);
        agent.step(late, radar);
        assert_eq!(agent.current_state(), "next");
    }

    fn timed_status(time: i64) -> RobotStatus {
        use wheelly_io::protocol::messages::MotionMessage;
        RobotStatus::default().with_motion(&MotionMessage {
            local_time: time,
            simulation_time: time,
            remote_time: time,
            x_pulses: 0.0,
            y_pulses: 0.0,
            direction: 0,
            left_pps: 0.0,
            right_pps: 0.0,
            imu_failure: 0,
            halted: true,
            left_target_pps: 0,
            right_target_pps: 0,
            left_power: 0,
            right_power: 0,
        })
    }
}
