//! YAML configuration loading.
//!
//! Every configuration file carries the same envelope:
//!
//! ```yaml
//! version: "0.4"
//! active: sim
//! configurations:
//!   sim:
//!     $schema: https://wheelly.org/schemas/sim-robot-0.4
//!     ...
//! ```
//!
//! The loader checks the envelope version and the `$schema` id of the
//! selected configuration, then deserializes the typed structure. Any
//! mismatch is fatal at startup.

use crate::error::{NavError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use wheelly_io::real::RealRobot;
use wheelly_io::sim::NoiseGenerator;
use wheelly_io::transport::SocketConfig;
use wheelly_io::{RobotApi, SimRobot};
use wheelly_map::{MapBuilder, ObstacleMap, Point2};
use wheelly_rl::network::NetworkSpec;
use wheelly_rl::processors::ProcessorSpec;

/// Supported envelope version.
pub const CONFIG_VERSION: &str = "0.4";

/// Schema id prefixes per configuration kind.
pub const ROBOT_SCHEMA: &str = "https://wheelly.org/schemas/robot";
pub const CONTROLLER_SCHEMA: &str = "https://wheelly.org/schemas/controller";
pub const ENV_SCHEMA: &str = "https://wheelly.org/schemas/env";
pub const AGENT_SCHEMA: &str = "https://wheelly.org/schemas/agent";

#[derive(Debug, Deserialize)]
struct Envelope {
    version: String,
    active: String,
    configurations: BTreeMap<String, serde_yaml::Value>,
}

/// Loads the active configuration of a file.
pub fn load_config<T: DeserializeOwned>(path: &Path, schema_prefix: &str) -> Result<T> {
    let file = std::fs::File::open(path)
        .map_err(|e| NavError::Config(format!("cannot open {:?}: {}", path, e)))?;
    let envelope: Envelope = serde_yaml::from_reader(file)
        .map_err(|e| NavError::Config(format!("{:?}: {}", path, e)))?;
    if envelope.version != CONFIG_VERSION {
        return Err(NavError::Config(format!(
            "{:?}: unsupported version {:?}",
            path, envelope.version
        )));
    }
    let active = envelope.configurations.get(&envelope.active).ok_or_else(|| {
        NavError::Config(format!(
            "{:?}: active configuration {:?} not found",
            path, envelope.active
        ))
    })?;
    let schema = active
        .get("$schema")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NavError::Config(format!("{:?}: missing $schema", path)))?;
    if !schema.starts_with(schema_prefix) {
        return Err(NavError::Config(format!(
            "{:?}: schema {:?} does not match {:?}",
            path, schema, schema_prefix
        )));
    }
    serde_yaml::from_value(active.clone())
        .map_err(|e| NavError::Config(format!("{:?}: {}", path, e)))
}

// --- robot ---

/// World side of the random obstacle map (m).
const WORLD_SIZE: f32 = 10.0;
/// Obstacle placement distance bounds from the center (m).
const MIN_OBSTACLE_DISTANCE: f32 = 1.0;
const MAX_OBSTACLE_DISTANCE: f32 = 3.0;

/// Robot configuration: simulation or real hardware.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RobotConfig {
    #[serde(rename_all = "camelCase")]
    Sim {
        #[serde(default)]
        map_seed: u64,
        #[serde(default)]
        robot_seed: u64,
        num_obstacles: usize,
        err_sigma: f32,
        err_sensor: f32,
        #[serde(default = "default_receptive_angle")]
        sensor_receptive_angle: f32,
        #[serde(default = "default_max_angular_speed")]
        max_angular_speed: f32,
        #[serde(default = "default_message_interval")]
        motion_interval: i64,
        #[serde(default = "default_message_interval")]
        proxy_interval: i64,
    },
    #[serde(rename_all = "camelCase")]
    Real {
        host: String,
        port: u16,
        #[serde(default = "default_connection_timeout")]
        connection_timeout: u64,
        #[serde(default = "default_retry_interval")]
        retry_interval: u64,
        #[serde(default = "default_read_timeout")]
        read_timeout: u64,
    },
}

fn default_receptive_angle() -> f32 {
    15.0
}
fn default_max_angular_speed() -> f32 {
    5.0
}
fn default_message_interval() -> i64 {
    500
}
fn default_connection_timeout() -> u64 {
    10_000
}
fn default_retry_interval() -> u64 {
    3_000
}
fn default_read_timeout() -> u64 {
    100
}

impl RobotConfig {
    /// Builds the robot handle.
    pub fn build(&self) -> Result<Box<dyn RobotApi>> {
        match self {
            RobotConfig::Sim {
                map_seed,
                robot_seed,
                num_obstacles,
                err_sigma,
                err_sensor,
                sensor_receptive_angle,
                max_angular_speed,
                motion_interval,
                proxy_interval,
            } => {
                let map = random_map(*map_seed, *num_obstacles);
                log::info!(
                    "simulated robot: {} obstacles, errSigma {}, errSensor {}",
                    map.len(),
                    err_sigma,
                    err_sensor
                );
                Ok(Box::new(SimRobot::new(
                    map,
                    NoiseGenerator::new(*robot_seed),
                    *err_sigma,
                    *err_sensor,
                    *sensor_receptive_angle,
                    *max_angular_speed,
                    *motion_interval,
                    *proxy_interval,
                )))
            }
            RobotConfig::Real {
                host,
                port,
                connection_timeout,
                retry_interval,
                read_timeout,
            } => {
                let mut socket = SocketConfig::new(host.clone(), *port);
                socket.connect_timeout = Duration::from_millis(*connection_timeout);
                socket.retry_interval = Duration::from_millis(*retry_interval);
                socket.read_timeout = Duration::from_millis(*read_timeout);
                log::info!("real robot at {}:{}", host, port);
                Ok(Box::new(RealRobot::new(socket)?))
            }
        }
    }
}

/// Bordered world with randomly placed obstacles.
fn random_map(seed: u64, num_obstacles: usize) -> ObstacleMap {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    let mut rng = if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    };
    let half = WORLD_SIZE / 2.0;
    let mut builder = MapBuilder::new(wheelly_io::status::OBSTACLE_SIZE);
    builder.rect(-half, -half, half, half).rand(
        num_obstacles,
        Point2::ZERO,
        MIN_OBSTACLE_DISTANCE,
        MAX_OBSTACLE_DISTANCE,
        &mut rng,
    );
    builder.build()
}

// --- controller ---

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Controller tick interval (ms).
    #[serde(default = "default_interval")]
    pub interval: i64,
    /// Motion/scan command refresh interval (ms).
    #[serde(default = "default_command_interval")]
    pub command_interval: i64,
    /// Radar map size (sectors per side).
    #[serde(default = "default_radar_size")]
    pub radar_size: usize,
    /// Radar sector side (m).
    #[serde(default = "default_radar_grid")]
    pub radar_grid: f32,
    /// Radar receptive distance (m).
    #[serde(default = "default_receptive_distance")]
    pub radar_receptive_distance: f32,
    /// Echo persistence before decay (ms).
    #[serde(default = "default_echo_persistence")]
    pub echo_persistence: i64,
}

fn default_interval() -> i64 {
    10
}
fn default_command_interval() -> i64 {
    600
}
fn default_radar_size() -> usize {
    51
}
fn default_radar_grid() -> f32 {
    0.2
}
fn default_receptive_distance() -> f32 {
    0.1
}
fn default_echo_persistence() -> i64 {
    300_000
}

// --- environment ---

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvConfig {
    pub objective: crate::objectives::ObjectiveSpec,
    #[serde(default = "default_reaction_interval")]
    pub reaction_interval: i64,
    #[serde(default = "default_num_direction_values")]
    pub num_direction_values: usize,
    #[serde(default = "default_num_sensor_values")]
    pub num_sensor_values: usize,
    #[serde(default = "default_num_speed_values")]
    pub num_speed_values: usize,
}

fn default_reaction_interval() -> i64 {
    300
}
fn default_num_direction_values() -> usize {
    25
}
fn default_num_sensor_values() -> usize {
    7
}
fn default_num_speed_values() -> usize {
    9
}

// --- agent ---

/// Agent configuration: the TD learner or the scripted state machine.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentConfig {
    #[serde(rename_all = "camelCase")]
    Td {
        model_path: String,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_saving_interval")]
        saving_interval_steps: usize,
        reward_alpha: f32,
        alphas: BTreeMap<String, f32>,
        lambda: f32,
        #[serde(default = "default_num_steps")]
        num_steps: usize,
        #[serde(default = "default_num_epochs")]
        num_epochs: usize,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
        network: NetworkSpec,
        #[serde(default)]
        input_process: Option<Vec<ProcessorSpec>>,
    },
    #[serde(rename_all = "camelCase")]
    StateMachine {
        entry: String,
        states: BTreeMap<String, crate::engines::StateSpec>,
    },
}

fn default_saving_interval() -> usize {
    100
}
fn default_num_steps() -> usize {
    wheelly_rl::agent::DEFAULT_NUM_STEPS
}
fn default_num_epochs() -> usize {
    wheelly_rl::agent::DEFAULT_NUM_EPOCHS
}
fn default_batch_size() -> usize {
    wheelly_rl::agent::DEFAULT_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sim_robot_config() {
        let file = write_config(
            r#"
version: "0.4"
active: sim
configurations:
  sim:
    $schema: https://wheelly.org/schemas/robot-0.4
    type: sim
    mapSeed: 42
    robotSeed: 43
    numObstacles: 10
    errSigma: 0.05
    errSensor: 0.05
"#,
        );
        let config: RobotConfig = load_config(file.path(), ROBOT_SCHEMA).unwrap();
        let RobotConfig::Sim {
            map_seed,
            num_obstacles,
            sensor_receptive_angle,
            ..
        } = config
        else {
            panic!("not a sim config");
        };
        assert_eq!(map_seed, 42);
        assert_eq!(num_obstacles, 10);
        assert_eq!(sensor_receptive_angle, 15.0);
    }

    #[test]
    fn test_bad_version_rejected() {
        let file = write_config(
            r#"
version: "0.3"
active: sim
configurations:
  sim:
    $schema: https://wheelly.org/schemas/robot-0.4
    type: sim
    numObstacles: 1
    errSigma: 0.0
    errSensor: 0.0
"#,
        );
        let err = load_config::<RobotConfig>(file.path(), ROBOT_SCHEMA).unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
    }

    #[test]
    fn test_wrong_schema_rejected() {
        let file = write_config(
            r#"
version: "0.4"
active: sim
configurations:
  sim:
    $schema: https://wheelly.org/schemas/env-0.4
    type: sim
    numObstacles: 1
    errSigma: 0.0
    errSensor: 0.0
"#,
        );
        let err = load_config::<RobotConfig>(file.path(), ROBOT_SCHEMA).unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
    }

    #[test]
    fn test_missing_active_rejected() {
        let file = write_config(
            r#"
version: "0.4"
active: nope
configurations:
  sim:
    $schema: https://wheelly.org/schemas/robot-0.4
    type: sim
    numObstacles: 1
    errSigma: 0.0
    errSensor: 0.0
"#,
        );
        let err = load_config::<RobotConfig>(file.path(), ROBOT_SCHEMA).unwrap_err();
        assert!(matches!(err, NavError::Config(_)));
    }

    #[test]
    fn test_controller_defaults() {
        let file = write_config(
            r#"
version: "0.4"
active: default
configurations:
  default:
    $schema: https://wheelly.org/schemas/controller-0.4
"#,
        );
        let config: ControllerConfig = load_config(file.path(), CONTROLLER_SCHEMA).unwrap();
        assert_eq!(config.interval, 10);
        assert_eq!(config.command_interval, 600);
        assert_eq!(config.radar_size, 51);
    }
}
