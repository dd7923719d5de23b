//! Simulated robot.
//!
//! Reproduces the differential drive of the real robot under force/torque
//! control, the front/rear contact sensors and the directional proximity
//! sensor, emitting the same messages a real robot would send.

mod noise;
mod world;

pub use noise::NoiseGenerator;
pub use world::{Body, Contact, World};

use crate::error::Result;
use crate::protocol::messages::{ContactsMessage, MotionMessage, ProxyMessage, RobotMessage};
use crate::robot::RobotApi;
use crate::status::{DISTANCE_PER_PULSE, DISTANCE_SCALE, MAX_PPS, OBSTACLE_SIZE};
use std::collections::VecDeque;
use wheelly_map::geometry::{clip, linear, normalize_deg, normalize_rad};
use wheelly_map::{ObstacleMap, Point2};

/// Default world side (m).
pub const WORLD_SIZE: f32 = 10.0;
/// Maximum range of the proximity sensor (m).
pub const MAX_DISTANCE: f32 = 3.0;
/// Echo distance below which forward motion is inhibited (m).
pub const SAFE_DISTANCE: f32 = 0.1;
/// Distance between the wheels (m).
pub const ROBOT_TRACK: f32 = 0.136;
/// Robot mass (kg).
pub const ROBOT_MASS: f32 = 0.785;
/// Robot body radius (m).
pub const ROBOT_RADIUS: f32 = 0.15;
/// Maximum linear acceleration (m/s^2).
const MAX_ACC: f32 = 1.0;
/// Maximum drive force (N).
const MAX_FORCE: f32 = MAX_ACC * ROBOT_MASS;
/// Maximum drive torque (N m).
const MAX_TORQUE: f32 = 0.7;
/// Maximum differential speed used for angular clipping (pulses/s).
const MAX_ANGULAR_PPS: f32 = 20.0;
/// Maximum angular velocity (rad/s).
const MAX_ANGULAR_VELOCITY: f32 = MAX_ANGULAR_PPS * DISTANCE_PER_PULSE / ROBOT_TRACK * 2.0;
/// Contact bearing half width (DEG) for front/rear classification.
const CONTACT_BEARING: f32 = 89.5;

const RAD_10: f32 = 10.0 * std::f32::consts::PI / 180.0;
const RAD_30: f32 = 30.0 * std::f32::consts::PI / 180.0;

/// The simulated robot.
pub struct SimRobot {
    world: World,
    obstacle_map: ObstacleMap,
    noise: NoiseGenerator,
    err_sigma: f32,
    err_sensor: f32,
    /// Sensor receptive half angle (DEG).
    sensor_receptive_angle: f32,
    /// Maximum angular correction speed (pulses/s).
    max_angular_speed: f32,
    motion_interval: i64,
    proxy_interval: i64,
    /// Heading setpoint (DEG).
    direction: i32,
    /// Speed setpoint (pulses/s).
    speed: f32,
    /// Sensor direction (DEG in [-90, 90]).
    sensor_direction: i32,
    echo_distance: f32,
    front_sensor: bool,
    rear_sensor: bool,
    left_pps: f32,
    right_pps: f32,
    simulation_time: i64,
    motion_timeout: i64,
    proxy_timeout: i64,
    messages: VecDeque<RobotMessage>,
}

impl SimRobot {
    /// Creates the simulated robot at the world center.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        obstacle_map: ObstacleMap,
        noise: NoiseGenerator,
        err_sigma: f32,
        err_sensor: f32,
        sensor_receptive_angle: f32,
        max_angular_speed: f32,
        motion_interval: i64,
        proxy_interval: i64,
    ) -> Self {
        let body = Body::disc(Point2::ZERO, 0.0, ROBOT_MASS, ROBOT_RADIUS);
        let obstacles = obstacle_map.points().to_vec();
        Self {
            world: World::new(body, obstacles, OBSTACLE_SIZE),
            obstacle_map,
            noise,
            err_sigma,
            err_sensor,
            sensor_receptive_angle,
            max_angular_speed,
            motion_interval,
            proxy_interval,
            direction: 0,
            speed: 0.0,
            sensor_direction: 0,
            echo_distance: 0.0,
            front_sensor: true,
            rear_sensor: true,
            left_pps: 0.0,
            right_pps: 0.0,
            simulation_time: 0,
            motion_timeout: 0,
            proxy_timeout: 0,
            messages: VecDeque::new(),
        }
    }

    /// Robot heading (DEG).
    pub fn heading(&self) -> i32 {
        normalize_deg(self.world.body().angle.to_degrees()).round() as i32
    }

    /// Robot location (m).
    pub fn location(&self) -> Point2 {
        self.world.body().position
    }

    pub fn echo_distance(&self) -> f32 {
        self.echo_distance
    }

    pub fn front_sensor(&self) -> bool {
        self.front_sensor
    }

    pub fn rear_sensor(&self) -> bool {
        self.rear_sensor
    }

    pub fn left_pps(&self) -> f32 {
        self.left_pps
    }

    pub fn right_pps(&self) -> f32 {
        self.right_pps
    }

    pub fn obstacle_map(&self) -> &ObstacleMap {
        &self.obstacle_map
    }

    /// Places the robot (test and scenario setup).
    pub fn set_robot_pos(&mut self, x: f32, y: f32) {
        let body = self.world.body_mut();
        body.position = Point2::new(x, y);
        body.velocity = (0.0, 0.0);
    }

    /// Sets the robot heading (test and scenario setup).
    pub fn set_robot_dir(&mut self, direction: i32) {
        self.direction = direction;
        self.world.body_mut().angle = (direction as f32).to_radians();
    }

    fn can_move_forward(&self) -> bool {
        self.front_sensor && (self.echo_distance == 0.0 || self.echo_distance > SAFE_DISTANCE)
    }

    fn can_move_backward(&self) -> bool {
        self.rear_sensor
    }

    /// Halts when moving toward a blocked direction.
    fn check_for_speed(&mut self) {
        if ((self.speed > 0.0 || self.left_pps > 0.0 || self.right_pps > 0.0)
            && !self.can_move_forward())
            || ((self.speed < 0.0 || self.left_pps < 0.0 || self.right_pps < 0.0)
                && !self.can_move_backward())
        {
            self.halt_motion();
        }
    }

    fn halt_motion(&mut self) {
        self.speed = 0.0;
        self.direction = self.heading();
        self.left_pps = 0.0;
        self.right_pps = 0.0;
    }

    /// Motion control and physics for one interval of `dt` seconds.
    fn run_controller(&mut self, dt: f32) {
        let body_angle = self.world.body().angle;
        let d_angle = normalize_rad((self.direction as f32).to_radians() - body_angle);

        // Angular speed to correct the heading, full beyond 10 DEG of error
        let angular_pps = clip(
            linear(
                d_angle,
                -RAD_10,
                RAD_10,
                -self.max_angular_speed,
                self.max_angular_speed,
            ),
            -self.max_angular_speed,
            self.max_angular_speed,
        );
        // Forward speed fades to zero as the heading error grows to 30 DEG
        let linear_pps = self.speed * clip(linear(d_angle.abs(), 0.0, RAD_30, 1.0, 0.0), 0.0, 1.0);

        self.left_pps = clip(linear_pps - angular_pps, -MAX_PPS, MAX_PPS);
        self.right_pps = clip(linear_pps + angular_pps, -MAX_PPS, MAX_PPS);

        let left = self.left_pps * DISTANCE_PER_PULSE;
        let right = self.right_pps * DISTANCE_PER_PULSE;

        // Force toward the target forward velocity
        let forward = (left + right) / 2.0;
        let (cos, sin) = (body_angle.cos(), body_angle.sin());
        let target = (forward * cos, forward * sin);
        let velocity = self.world.body().velocity;
        let dv = (target.0 - velocity.0, target.1 - velocity.1);
        let mass = self.world.body().mass;
        let force = (dv.0 * mass / dt, dv.1 * mass / dt);
        // Clip the longitudinal component in the body frame
        let factor = self.noise.factor(self.err_sensor);
        let mut local = (
            (force.0 * cos + force.1 * sin) * factor,
            (-force.0 * sin + force.1 * cos) * factor,
        );
        local.0 = clip(local.0, -MAX_FORCE, MAX_FORCE);
        let force = (local.0 * cos - local.1 * sin, local.0 * sin + local.1 * cos);

        // Torque toward the target angular velocity
        let omega_target = clip(
            (right - left) / ROBOT_TRACK,
            -MAX_ANGULAR_VELOCITY,
            MAX_ANGULAR_VELOCITY,
        );
        let inertia = self.world.body().inertia;
        let omega = self.world.body().angular_velocity;
        let torque = clip(
            (omega_target - omega) * inertia / dt * self.noise.factor(self.err_sigma),
            -MAX_TORQUE,
            MAX_TORQUE,
        );

        let events = self.world.step(dt, force, torque);
        self.handle_contacts(&events);
        if self.simulation_time >= self.motion_timeout {
            self.send_motion();
        }
    }

    fn handle_contacts(&mut self, events: &world::StepEvents) {
        let mut changed = false;
        for contact in &events.begun {
            let heading = self.heading() as f32;
            let bearing =
                normalize_deg(self.location().direction_to(&contact.point) - heading);
            if bearing.abs() <= CONTACT_BEARING {
                self.front_sensor = false;
                self.halt_motion();
                changed = true;
            }
            if normalize_deg(bearing - 180.0).abs() <= CONTACT_BEARING {
                self.rear_sensor = false;
                self.halt_motion();
                changed = true;
            }
        }
        if events.ended {
            self.front_sensor = true;
            self.rear_sensor = true;
            changed = true;
        }
        if changed {
            self.send_contacts();
        }
    }

    /// Updates the proximity echo from the obstacle map.
    fn run_sensor(&mut self) {
        let ray = (self.heading() + self.sensor_direction) as f32;
        let prev_alarm = self.echo_distance > 0.0 && self.echo_distance <= SAFE_DISTANCE;
        self.echo_distance = 0.0;
        if let Some(obstacle) =
            self.obstacle_map
                .nearest(self.location(), ray, self.sensor_receptive_angle)
        {
            let distance = self.location().distance(&obstacle) - self.obstacle_map.grid_size() / 2.0
                + self.noise.gaussian(self.err_sensor);
            if distance > 0.0 && distance < MAX_DISTANCE {
                self.echo_distance = distance;
            }
        }
        let alarm = self.echo_distance > 0.0 && self.echo_distance <= SAFE_DISTANCE;
        if alarm != prev_alarm {
            self.send_contacts();
        }
    }

    fn send_motion(&mut self) {
        let position = self.location();
        let msg = MotionMessage {
            local_time: self.simulation_time,
            simulation_time: self.simulation_time,
            remote_time: self.simulation_time,
            x_pulses: position.x / DISTANCE_PER_PULSE,
            y_pulses: position.y / DISTANCE_PER_PULSE,
            direction: self.heading(),
            left_pps: self.left_pps,
            right_pps: self.right_pps,
            imu_failure: 0,
            halted: self.speed == 0.0,
            left_target_pps: self.left_pps.round() as i32,
            right_target_pps: self.right_pps.round() as i32,
            left_power: 0,
            right_power: 0,
        };
        self.messages.push_back(RobotMessage::Motion(msg));
        self.motion_timeout = self.simulation_time + self.motion_interval;
    }

    fn send_proxy(&mut self) {
        let position = self.location();
        let msg = ProxyMessage {
            local_time: self.simulation_time,
            simulation_time: self.simulation_time,
            remote_time: self.simulation_time,
            sensor_direction: self.sensor_direction,
            echo_delay: (self.echo_distance / DISTANCE_SCALE).round() as i64,
            x_pulses: position.x / DISTANCE_PER_PULSE,
            y_pulses: position.y / DISTANCE_PER_PULSE,
            echo_yaw: self.heading(),
        };
        self.messages.push_back(RobotMessage::Proxy(msg));
        self.proxy_timeout = self.simulation_time + self.proxy_interval;
    }

    fn send_contacts(&mut self) {
        let msg = ContactsMessage {
            local_time: self.simulation_time,
            simulation_time: self.simulation_time,
            remote_time: self.simulation_time,
            front_sensor: self.front_sensor,
            rear_sensor: self.rear_sensor,
            can_move_forward: self.can_move_forward(),
            can_move_backward: self.can_move_backward(),
        };
        self.messages.push_back(RobotMessage::Contacts(msg));
    }
}

impl RobotApi for SimRobot {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        self.send_motion();
        self.send_proxy();
        self.send_contacts();
        Ok(())
    }

    fn tick(&mut self, dt: i64) -> Result<()> {
        self.simulation_time += dt;
        self.run_controller(dt as f32 * 1e-3);
        self.run_sensor();
        self.check_for_speed();
        if self.simulation_time >= self.proxy_timeout {
            self.send_proxy();
        }
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        self.halt_motion();
        Ok(())
    }

    fn drive(&mut self, direction: i32, speed: f32) -> Result<()> {
        self.direction = direction;
        self.speed = clip(speed, -MAX_PPS, MAX_PPS);
        self.check_for_speed();
        Ok(())
    }

    fn scan(&mut self, direction: i32) -> Result<()> {
        self.sensor_direction = direction.clamp(-90, 90);
        Ok(())
    }

    fn simulation_time(&self) -> i64 {
        self.simulation_time
    }

    fn poll_messages(&mut self) -> Vec<RobotMessage> {
        self.messages.drain(..).collect()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_robot(obstacle_map: ObstacleMap) -> SimRobot {
        SimRobot::new(
            obstacle_map,
            NoiseGenerator::new(1234),
            0.0,
            0.0,
            15.0,
            5.0,
            500,
            500,
        )
    }

    fn empty_map() -> ObstacleMap {
        ObstacleMap::new(Vec::new(), OBSTACLE_SIZE)
    }

    #[test]
    fn test_halt_and_turn() {
        let mut robot = quiet_robot(empty_map());
        robot.drive(90, 0.0).unwrap();
        robot.tick(500).unwrap();

        assert!(robot.heading() > 0 && robot.heading() <= 90);
        // Opposite wheels at the angular correction speed
        assert!((robot.left_pps() + 5.0).abs() < 1e-4);
        assert!((robot.right_pps() - 5.0).abs() < 1e-4);
        assert!(robot.world.body().forward_velocity().abs() < 1e-3);
    }

    #[test]
    fn test_front_contact_halts_motion() {
        let map = ObstacleMap::new(vec![Point2::new(0.3, 0.0)], OBSTACLE_SIZE);
        let mut robot = quiet_robot(map);
        robot.drive(0, 0.3 / DISTANCE_PER_PULSE).unwrap();

        for _ in 0..100 {
            robot.tick(10).unwrap();
        }

        assert!(!robot.front_sensor());
        assert!(robot.rear_sensor());
        assert_eq!(robot.left_pps(), 0.0);
        assert_eq!(robot.right_pps(), 0.0);

        let contact = robot
            .poll_messages()
            .into_iter()
            .filter_map(|m| match m {
                RobotMessage::Contacts(c) => Some(c),
                _ => None,
            })
            .find(|c| !c.front_sensor)
            .expect("no front contact message");
        assert!(contact.rear_sensor);
        assert!(!contact.can_move_forward);
        assert!(contact.can_move_backward);
    }

    #[test]
    fn test_echo_distance_measured() {
        let map = ObstacleMap::new(vec![Point2::new(1.0, 0.0)], OBSTACLE_SIZE);
        let mut robot = quiet_robot(map);
        robot.tick(10).unwrap();
        assert!((robot.echo_distance() - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_echo_outside_cone() {
        let map = ObstacleMap::new(vec![Point2::new(0.0, 1.0)], OBSTACLE_SIZE);
        let mut robot = quiet_robot(map);
        robot.tick(10).unwrap();
        assert_eq!(robot.echo_distance(), 0.0);

        robot.scan(90).unwrap();
        robot.tick(10).unwrap();
        assert!((robot.echo_distance() - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_message_cadence() {
        let mut robot = quiet_robot(empty_map());
        robot.configure().unwrap();
        robot.poll_messages();
        for _ in 0..100 {
            robot.tick(10).unwrap();
        }
        let messages = robot.poll_messages();
        let motion = messages
            .iter()
            .filter(|m| matches!(m, RobotMessage::Motion(_)))
            .count();
        let proxy = messages
            .iter()
            .filter(|m| matches!(m, RobotMessage::Proxy(_)))
            .count();
        // 1 s of simulation at 500 ms intervals
        assert_eq!(motion, 2);
        assert_eq!(proxy, 2);
    }

    #[test]
    fn test_scan_clips_sensor_direction() {
        let mut robot = quiet_robot(empty_map());
        robot.scan(120).unwrap();
        assert_eq!(robot.sensor_direction, 90);
        robot.scan(-120).unwrap();
        assert_eq!(robot.sensor_direction, -90);
    }

    #[test]
    fn test_reproducible_with_seed() {
        let map = ObstacleMap::new(vec![Point2::new(1.0, 0.0)], OBSTACLE_SIZE);
        let run = |seed| {
            let mut robot = SimRobot::new(
                ObstacleMap::new(map.points().to_vec(), OBSTACLE_SIZE),
                NoiseGenerator::new(seed),
                0.1,
                0.05,
                15.0,
                5.0,
                500,
                500,
            );
            robot.drive(0, 20.0).unwrap();
            for _ in 0..50 {
                robot.tick(10).unwrap();
            }
            (robot.location(), robot.echo_distance())
        };
        assert_eq!(run(42), run(42));
    }
}
