//! RL environment over the robot controller.
//!
//! The environment exposes the observation and action signal specs,
//! decodes discrete actions into robot commands and produces one
//! `(state, action, reward, next_state)` transition per reaction
//! interval.

use crate::config::EnvConfig;
use crate::controller::{PendingCommand, RobotController};
use crate::error::Result;
use crate::objectives::Objective;
use ndarray::array;
use std::collections::BTreeMap;
use wheelly_io::status::MAX_PPS;
use wheelly_map::geometry::{linear, normalize_deg_i};
use wheelly_rl::{ExecutionResult, SignalSpec, Signals};

pub const MIN_DISTANCE: f32 = 0.0;
pub const MAX_DISTANCE: f32 = 10.0;
pub const NUM_CONTACT_VALUES: usize = 16;
pub const MIN_DIRECTION_ACTION: f32 = -180.0;
pub const MAX_DIRECTION_ACTION: f32 = 180.0;
pub const MIN_SENSOR_DIR: f32 = -90.0;
pub const MAX_SENSOR_DIR: f32 = 90.0;

/// The robot environment.
pub struct RobotEnv {
    controller: RobotController,
    objective: Box<dyn Objective>,
    reaction_interval: i64,
    num_direction_values: usize,
    num_sensor_values: usize,
    num_speed_values: usize,
    state_spec: BTreeMap<String, SignalSpec>,
    action_spec: BTreeMap<String, SignalSpec>,
}

impl RobotEnv {
    pub fn new(controller: RobotController, config: &EnvConfig) -> Self {
        let mut state_spec = BTreeMap::new();
        state_spec.insert(
            "sensor".to_string(),
            SignalSpec::Float {
                shape: vec![1],
                min_value: MIN_SENSOR_DIR,
                max_value: MAX_SENSOR_DIR,
            },
        );
        state_spec.insert(
            "distance".to_string(),
            SignalSpec::Float {
                shape: vec![1],
                min_value: MIN_DISTANCE,
                max_value: MAX_DISTANCE,
            },
        );
        state_spec.insert(
            "canMoveForward".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: 2,
            },
        );
        state_spec.insert(
            "canMoveBackward".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: 2,
            },
        );
        state_spec.insert(
            "contacts".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: NUM_CONTACT_VALUES,
            },
        );

        let mut action_spec = BTreeMap::new();
        action_spec.insert(
            "halt".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: 2,
            },
        );
        action_spec.insert(
            "direction".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: config.num_direction_values,
            },
        );
        action_spec.insert(
            "speed".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: config.num_speed_values,
            },
        );
        action_spec.insert(
            "sensorAction".to_string(),
            SignalSpec::Int {
                shape: vec![1],
                num_values: config.num_sensor_values,
            },
        );

        Self {
            controller,
            objective: config.objective.build(),
            reaction_interval: config.reaction_interval,
            num_direction_values: config.num_direction_values,
            num_sensor_values: config.num_sensor_values,
            num_speed_values: config.num_speed_values,
            state_spec,
            action_spec,
        }
    }

    pub fn state_spec(&self) -> &BTreeMap<String, SignalSpec> {
        &self.state_spec
    }

    pub fn action_spec(&self) -> &BTreeMap<String, SignalSpec> {
        &self.action_spec
    }

    pub fn controller(&self) -> &RobotController {
        &self.controller
    }

    pub fn is_closed(&self) -> bool {
        self.controller.is_closed()
    }

    /// Starts the session and returns the first observation.
    pub fn reset(&mut self) -> Result<Signals> {
        self.controller.start()?;
        Ok(self.observation())
    }

    /// Applies the actions, waits one reaction interval and returns the
    /// transition.
    pub fn execute(&mut self, actions: &BTreeMap<String, usize>) -> Result<ExecutionResult> {
        let state = self.observation();
        self.controller.set_command(self.decode_actions(actions)?);
        let status = self.controller.read_status(self.reaction_interval)?;
        let reward = self.objective.reward(&status);
        let next_state = self.observation();
        Ok(ExecutionResult {
            state,
            actions: actions.clone(),
            reward,
            next_state,
        })
    }

    /// Flushes a final halt and closes the robot link.
    pub fn shutdown(&mut self) {
        self.controller.shutdown();
    }

    /// Encodes the current status as the observation signals.
    fn observation(&self) -> Signals {
        let status = self.controller.status();
        let mut signals = Signals::new();
        signals.insert(
            "sensor".to_string(),
            array![[status.sensor_direction() as f32]],
        );
        signals.insert(
            "distance".to_string(),
            array![[if status.echo_distance() > 0.0 {
                status.echo_distance()
            } else {
                MAX_DISTANCE
            }]],
        );
        signals.insert(
            "canMoveForward".to_string(),
            array![[f32::from(u8::from(status.can_move_forward()))]],
        );
        signals.insert(
            "canMoveBackward".to_string(),
            array![[f32::from(u8::from(status.can_move_backward()))]],
        );
        signals.insert("contacts".to_string(), array![[status.contacts() as f32]]);
        signals
    }

    /// Decodes the discrete action map into a robot command set.
    fn decode_actions(&self, actions: &BTreeMap<String, usize>) -> Result<PendingCommand> {
        let halt = self.action_value(actions, "halt")? == 1;
        let delta_dir = linear(
            self.action_value(actions, "direction")? as f32,
            0.0,
            (self.num_direction_values - 1) as f32,
            MIN_DIRECTION_ACTION,
            MAX_DIRECTION_ACTION,
        )
        .round() as i32;
        let speed_norm = linear(
            self.action_value(actions, "speed")? as f32,
            0.0,
            (self.num_speed_values - 1) as f32,
            -1.0,
            1.0,
        );
        // Quantize to tenths like the firmware speed scale
        let speed = (speed_norm * 10.0).round() / 10.0 * MAX_PPS;
        let sensor = linear(
            self.action_value(actions, "sensorAction")? as f32,
            0.0,
            (self.num_sensor_values - 1) as f32,
            MIN_SENSOR_DIR,
            MAX_SENSOR_DIR,
        )
        .round() as i32;
        let direction = normalize_deg_i(self.controller.status().direction() + delta_dir);
        Ok(PendingCommand {
            halt,
            direction,
            speed,
            sensor,
        })
    }

    fn action_value(&self, actions: &BTreeMap<String, usize>, name: &str) -> Result<usize> {
        actions.get(name).copied().ok_or_else(|| {
            crate::error::NavError::Config(format!("missing action {:?}", name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use wheelly_io::sim::NoiseGenerator;
    use wheelly_io::SimRobot;
    use wheelly_map::ObstacleMap;

    fn env() -> RobotEnv {
        let map = ObstacleMap::new(Vec::new(), wheelly_io::status::OBSTACLE_SIZE);
        let robot = SimRobot::new(
            map,
            NoiseGenerator::new(1234),
            0.0,
            0.0,
            15.0,
            5.0,
            500,
            500,
        );
        let controller_config: ControllerConfig = serde_yaml::from_str("interval: 10").unwrap();
        let env_config: EnvConfig = serde_yaml::from_str(
            r#"
objective:
  type: explore
reactionInterval: 300
"#,
        )
        .unwrap();
        RobotEnv::new(
            RobotController::new(Box::new(robot), &controller_config),
            &env_config,
        )
    }

    fn actions(halt: usize, direction: usize, speed: usize, sensor: usize) -> BTreeMap<String, usize> {
        let mut map = BTreeMap::new();
        map.insert("halt".to_string(), halt);
        map.insert("direction".to_string(), direction);
        map.insert("speed".to_string(), speed);
        map.insert("sensorAction".to_string(), sensor);
        map
    }

    #[test]
    fn test_observation_shape() {
        let mut env = env();
        let obs = env.reset().unwrap();
        assert_eq!(obs.len(), 5);
        for spec in env.state_spec().values() {
            assert_eq!(spec.size(), 1);
        }
        // No obstacle: distance saturates at the maximum
        assert_eq!(obs["distance"][[0, 0]], MAX_DISTANCE);
        assert_eq!(obs["contacts"][[0, 0]], 15.0);
    }

    #[test]
    fn test_action_decoding_bounds() {
        let env = env();
        // Center values map to zero
        let command = env.decode_actions(&actions(0, 12, 4, 3)).unwrap();
        assert_eq!(command.direction, 0);
        assert_eq!(command.speed, 0.0);
        assert_eq!(command.sensor, 0);

        let command = env.decode_actions(&actions(0, 24, 8, 6)).unwrap();
        assert_eq!(command.direction, 180);
        assert_eq!(command.speed, MAX_PPS);
        assert_eq!(command.sensor, 90);

        let command = env.decode_actions(&actions(1, 0, 0, 0)).unwrap();
        assert!(command.halt);
        assert_eq!(command.direction, 180);
        assert_eq!(command.speed, -MAX_PPS);
        assert_eq!(command.sensor, -90);
    }

    #[test]
    fn test_execute_produces_transition() {
        let mut env = env();
        env.reset().unwrap();
        let result = env.execute(&actions(0, 12, 8, 3)).unwrap();
        assert_eq!(result.state.len(), 5);
        assert_eq!(result.next_state.len(), 5);
        assert!(result.reward.is_finite());
        assert_eq!(result.actions["speed"], 8);
    }
}
