//! Robot status snapshot and physical constants.

use crate::protocol::messages::{ContactsMessage, MotionMessage, ProxyMessage};
use wheelly_map::geometry::normalize_deg_i;
use wheelly_map::Point2;

/// Maximum wheel speed (pulses/s).
pub const MAX_PPS: f32 = 60.0;

/// Encoder pulses per wheel revolution.
pub const PULSES_PER_ROOT: f32 = 40.0;

/// Wheel diameter (m).
pub const WHEEL_DIAMETER: f32 = 0.067;

/// Wheel travel per encoder pulse (m).
pub const DISTANCE_PER_PULSE: f32 = WHEEL_DIAMETER * std::f32::consts::PI / PULSES_PER_ROOT;

/// Echo distance per microsecond of delay (m/us), half the speed of sound.
pub const DISTANCE_SCALE: f32 = 1.7e-4;

/// Side of the square obstacle footprint (m).
pub const OBSTACLE_SIZE: f32 = 0.2;

/// Immutable snapshot of the robot state, replaced on every update.
#[derive(Clone, Debug)]
pub struct RobotStatus {
    location: Point2,
    direction: i32,
    sensor_direction: i32,
    echo_distance: f32,
    left_pps: f32,
    right_pps: f32,
    halted: bool,
    front_sensor: bool,
    rear_sensor: bool,
    can_move_forward: bool,
    can_move_backward: bool,
    simulation_time: i64,
    reset_time: i64,
}

impl Default for RobotStatus {
    fn default() -> Self {
        Self {
            location: Point2::ZERO,
            direction: 0,
            sensor_direction: 0,
            echo_distance: 0.0,
            left_pps: 0.0,
            right_pps: 0.0,
            halted: true,
            front_sensor: true,
            rear_sensor: true,
            can_move_forward: true,
            can_move_backward: true,
            simulation_time: 0,
            reset_time: 0,
        }
    }
}

impl RobotStatus {
    /// Robot location (m).
    pub fn location(&self) -> Point2 {
        self.location
    }

    /// Robot heading (DEG, in (-180, 180]).
    pub fn direction(&self) -> i32 {
        self.direction
    }

    /// Sensor direction relative to the heading (DEG, in [-90, 90]).
    pub fn sensor_direction(&self) -> i32 {
        self.sensor_direction
    }

    /// Last echo distance (m), 0 when no echo.
    pub fn echo_distance(&self) -> f32 {
        self.echo_distance
    }

    pub fn left_pps(&self) -> f32 {
        self.left_pps
    }

    pub fn right_pps(&self) -> f32 {
        self.right_pps
    }

    /// True when motion is stopped.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// True when the front contact sensor is clear.
    pub fn front_sensor(&self) -> bool {
        self.front_sensor
    }

    /// True when the rear contact sensor is clear.
    pub fn rear_sensor(&self) -> bool {
        self.rear_sensor
    }

    pub fn can_move_forward(&self) -> bool {
        self.can_move_forward
    }

    pub fn can_move_backward(&self) -> bool {
        self.can_move_backward
    }

    /// Simulation clock at the snapshot (ms).
    pub fn simulation_time(&self) -> i64 {
        self.simulation_time
    }

    /// Simulation clock at the last reset (ms).
    pub fn reset_time(&self) -> i64 {
        self.reset_time
    }

    /// Contact state encoded as a 4 bit code:
    /// front sensor, rear sensor, can move forward, can move backward.
    pub fn contacts(&self) -> u8 {
        (u8::from(self.front_sensor) << 3)
            | (u8::from(self.rear_sensor) << 2)
            | (u8::from(self.can_move_forward) << 1)
            | u8::from(self.can_move_backward)
    }

    /// Returns the snapshot updated from a motion message.
    pub fn with_motion(&self, msg: &MotionMessage) -> Self {
        Self {
            location: Point2::new(
                msg.x_pulses * DISTANCE_PER_PULSE,
                msg.y_pulses * DISTANCE_PER_PULSE,
            ),
            direction: normalize_deg_i(msg.direction),
            left_pps: msg.left_pps,
            right_pps: msg.right_pps,
            halted: msg.halted,
            simulation_time: msg.simulation_time,
            ..self.clone()
        }
    }

    /// Returns the snapshot updated from a proxy message.
    pub fn with_proxy(&self, msg: &ProxyMessage) -> Self {
        Self {
            sensor_direction: msg.sensor_direction.clamp(-90, 90),
            echo_distance: msg.echo_distance(),
            simulation_time: msg.simulation_time,
            ..self.clone()
        }
    }

    /// Returns the snapshot updated from a contacts message.
    pub fn with_contacts(&self, msg: &ContactsMessage) -> Self {
        Self {
            front_sensor: msg.front_sensor,
            rear_sensor: msg.rear_sensor,
            can_move_forward: msg.can_move_forward,
            can_move_backward: msg.can_move_backward,
            simulation_time: msg.simulation_time,
            ..self.clone()
        }
    }

    /// Returns the snapshot with the reset time set.
    pub fn with_reset_time(&self, reset_time: i64) -> Self {
        Self {
            reset_time,
            ..self.clone()
        }
    }

    /// Location of the proximity sensor (robot center).
    pub fn sensor_location(&self) -> Point2 {
        self.location
    }

    /// Absolute sensor direction (DEG).
    pub fn absolute_sensor_direction(&self) -> i32 {
        normalize_deg_i(self.direction + self.sensor_direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ProxyMessage;

    #[test]
    fn test_contacts_code() {
        let status = RobotStatus::default();
        assert_eq!(status.contacts(), 0b1111);
    }

    #[test]
    fn test_with_proxy_clips_sensor() {
        let msg = ProxyMessage {
            local_time: 0,
            simulation_time: 10,
            remote_time: 10,
            sensor_direction: 120,
            echo_delay: 0,
            x_pulses: 0.0,
            y_pulses: 0.0,
            echo_yaw: 0,
        };
        let status = RobotStatus::default().with_proxy(&msg);
        assert_eq!(status.sensor_direction(), 90);
        assert_eq!(status.simulation_time(), 10);
    }

    #[test]
    fn test_with_motion_location() {
        let msg = MotionMessage {
            local_time: 0,
            simulation_time: 20,
            remote_time: 20,
            x_pulses: 100.0,
            y_pulses: -50.0,
            direction: 190,
            left_pps: 10.0,
            right_pps: 10.0,
            imu_failure: 0,
            halted: false,
            left_target_pps: 10,
            right_target_pps: 10,
            left_power: 0,
            right_power: 0,
        };
        let status = RobotStatus::default().with_motion(&msg);
        assert!((status.location().x - 100.0 * DISTANCE_PER_PULSE).abs() < 1e-6);
        assert_eq!(status.direction(), -170);
        assert!(!status.is_halted());
    }
}
