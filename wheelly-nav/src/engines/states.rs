//! Built-in states of the scripted agent.

use super::{
    CtxValue, ProcessorContext, RobotCommands, BLOCKED_EXIT, COMPLETED_EXIT, FRONT_BLOCKED_EXIT,
    NONE_EXIT, REAR_BLOCKED_EXIT, TIMEOUT_EXIT,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use wheelly_map::geometry::{normalize_deg, normalize_deg_i};
use wheelly_map::Point2;

/// Sensor auto-scan parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoScanSpec {
    pub min_sensor_dir: i32,
    pub max_sensor_dir: i32,
    pub sensor_dir_number: usize,
    /// Minimum simulated time between two sensor moves (ms).
    pub scan_interval: i64,
}

/// Options shared by every state.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    #[serde(default)]
    pub timeout: Option<i64>,
    #[serde(default)]
    pub auto_scan: Option<AutoScanSpec>,
    #[serde(default)]
    pub on_init: Option<BTreeMap<String, CtxValue>>,
    #[serde(default)]
    pub on_entry: Option<BTreeMap<String, CtxValue>>,
    #[serde(default)]
    pub on_exit: Option<BTreeMap<String, CtxValue>>,
    /// Exit token to target state id.
    #[serde(default)]
    pub transitions: BTreeMap<String, String>,
}

/// Declarative state specification.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateSpec {
    /// Keeps the robot halted.
    Halt {
        #[serde(flatten)]
        common: CommonSpec,
    },
    /// Drives toward a target point, completing within a stop distance.
    #[serde(rename_all = "camelCase")]
    MoveTo {
        x: f32,
        y: f32,
        #[serde(default = "default_stop_distance")]
        stop_distance: f32,
        #[serde(default = "default_speed")]
        speed: f32,
        #[serde(flatten)]
        common: CommonSpec,
    },
    /// Drives toward the clearest direction of the radar map.
    #[serde(rename_all = "camelCase")]
    Explore {
        #[serde(default = "default_speed")]
        speed: f32,
        #[serde(flatten)]
        common: CommonSpec,
    },
}

fn default_stop_distance() -> f32 {
    0.4
}

fn default_speed() -> f32 {
    30.0
}

impl StateSpec {
    fn common(&self) -> &CommonSpec {
        match self {
            StateSpec::Halt { common }
            | StateSpec::MoveTo { common, .. }
            | StateSpec::Explore { common, .. } => common,
        }
    }
}

/// A named state with its behavior.
#[derive(Clone, Debug)]
pub struct StateNode {
    id: String,
    spec: StateSpec,
}

impl StateNode {
    pub fn new(id: String, spec: StateSpec) -> Self {
        Self { id, spec }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Target of the transition for an exit token.
    pub fn transition(&self, exit: &str) -> Option<&str> {
        self.spec.common().transitions.get(exit).map(String::as_str)
    }

    pub fn transition_targets(&self) -> impl Iterator<Item = &str> {
        self.spec.common().transitions.values().map(String::as_str)
    }

    fn key(&self, name: &str) -> String {
        format!("{}.{}", self.id, name)
    }

    fn apply_program(
        &self,
        context: &mut ProcessorContext,
        program: &Option<BTreeMap<String, CtxValue>>,
    ) {
        if let Some(program) = program {
            for (key, value) in program {
                context.put(self.key(key), value.clone());
            }
        }
    }

    /// Runs the initialization program.
    pub fn init(&self, context: &mut ProcessorContext) {
        self.apply_program(context, &self.spec.common().on_init);
    }

    /// Records the entry time, arms the auto-scan and runs the entry
    /// program.
    pub fn entry(&self, context: &mut ProcessorContext) {
        let time = context.status().simulation_time();
        context.put(self.key("entryTime"), CtxValue::Int(time));
        context.put(self.key("scanTime"), CtxValue::Int(-1));
        context.put(self.key("scanIndex"), CtxValue::Int(0));
        self.apply_program(context, &self.spec.common().on_entry);
    }

    /// Runs the exit program.
    pub fn exit(&self, context: &mut ProcessorContext) {
        self.apply_program(context, &self.spec.common().on_exit);
    }

    fn elapsed_time(&self, context: &ProcessorContext) -> i64 {
        context.status().simulation_time() - context.get_long(&self.key("entryTime"))
    }

    fn is_timeout(&self, context: &ProcessorContext) -> bool {
        match self.spec.common().timeout {
            Some(timeout) => self.elapsed_time(context) >= timeout,
            None => false,
        }
    }

    /// Block exit token from the contact state, if any.
    fn block_exit(&self, context: &ProcessorContext) -> Option<&'static str> {
        let status = context.status();
        match (status.can_move_forward(), status.can_move_backward()) {
            (false, false) => Some(BLOCKED_EXIT),
            (false, true) => Some(FRONT_BLOCKED_EXIT),
            (true, false) => Some(REAR_BLOCKED_EXIT),
            (true, true) => None,
        }
    }

    /// Steps the sensor through the triangular scan wave, at most once
    /// per scan interval.
    fn tick_auto_scan(&self, context: &mut ProcessorContext) -> Option<i32> {
        let scan = self.spec.common().auto_scan.as_ref()?;
        if scan.scan_interval <= 0 {
            return None;
        }
        let scan_time = context.get_long(&self.key("scanTime"));
        let time = context.status().simulation_time();
        if scan_time >= 0 && time <= scan_time + scan.scan_interval {
            return None;
        }
        let min = scan.min_sensor_dir.clamp(-90, 90);
        let max = scan.max_sensor_dir.clamp(-90, 90);
        let steps = scan.sensor_dir_number.max(1) as i32;
        let direction = if steps > 1 {
            let index = context.get_long(&self.key("scanIndex")) as i32;
            let modulus = (steps - 1) * 2;
            let x = if index >= steps { modulus - index } else { index };
            let direction = x * (max - min) / (steps - 1) + min;
            context.put(
                self.key("scanIndex"),
                CtxValue::Int(((index + 1) % modulus) as i64),
            );
            direction
        } else {
            (min + max) / 2
        };
        context.put(self.key("scanTime"), CtxValue::Int(time));
        Some(direction)
    }

    /// Runs one step, returning the exit token and the commands.
    pub fn step(&self, context: &mut ProcessorContext) -> (String, RobotCommands) {
        if self.is_timeout(context) {
            return (TIMEOUT_EXIT.to_string(), RobotCommands::halt_command());
        }
        if let Some(exit) = self.block_exit(context) {
            return (exit.to_string(), RobotCommands::halt_command());
        }
        let scan = self.tick_auto_scan(context);
        let (exit, commands) = match &self.spec {
            StateSpec::Halt { .. } => (NONE_EXIT, RobotCommands::halt_command()),
            StateSpec::MoveTo {
                x,
                y,
                stop_distance,
                speed,
                ..
            } => self.move_to(context, Point2::new(*x, *y), *stop_distance, *speed),
            StateSpec::Explore { speed, .. } => self.explore(context, *speed),
        };
        (exit.to_string(), commands.merge_scan(scan))
    }

    fn move_to(
        &self,
        context: &ProcessorContext,
        target: Point2,
        stop_distance: f32,
        speed: f32,
    ) -> (&'static str, RobotCommands) {
        // Setter programs may retarget the state through the context
        let target = Point2::new(
            self.context_override(context, "targetX", target.x),
            self.context_override(context, "targetY", target.y),
        );
        let location = context.status().location();
        if location.distance(&target) <= stop_distance {
            return (COMPLETED_EXIT, RobotCommands::halt_command());
        }
        let direction = normalize_deg(location.direction_to(&target)).round() as i32;
        (
            NONE_EXIT,
            RobotCommands {
                halt: false,
                drive: Some((direction, speed)),
                scan: None,
            },
        )
    }

    fn context_override(&self, context: &ProcessorContext, name: &str, fallback: f32) -> f32 {
        let key = self.key(name);
        match context.get(&key) {
            Some(_) => context.get_num(&key) as f32,
            None => fallback,
        }
    }

    /// Picks the candidate direction with the largest obstacle clearance
    /// on the radar map, preferring the current heading on ties.
    fn explore(&self, context: &ProcessorContext, speed: f32) -> (&'static str, RobotCommands) {
        let status = context.status();
        let heading = status.direction();
        let direction = match context.radar() {
            Some(radar) => {
                let location = status.location();
                let mut best = (heading, f32::MIN);
                for i in 0..8 {
                    let candidate = normalize_deg_i(heading + i * 45);
                    let clearance = direction_clearance(radar, location, candidate);
                    if clearance > best.1 {
                        best = (candidate, clearance);
                    }
                }
                best.0
            }
            None => heading,
        };
        (
            NONE_EXIT,
            RobotCommands {
                halt: false,
                drive: Some((direction, speed)),
                scan: None,
            },
        )
    }
}

/// Distance to the nearest known obstacle sector within a 45 degree cone.
fn direction_clearance(radar: &wheelly_map::RadarMap, from: Point2, direction: i32) -> f32 {
    let mut clearance = wheelly_map::radar::MAX_SIGNAL_DISTANCE;
    for sector in radar.sectors() {
        if !sector.has_obstacle() {
            continue;
        }
        let location = sector.location();
        let distance = from.distance(&location);
        if distance >= clearance {
            continue;
        }
        let bearing = from.direction_to(&location);
        if normalize_deg(bearing - direction as f32).abs() <= 22.5 {
            clearance = distance;
        }
    }
    clearance
}
