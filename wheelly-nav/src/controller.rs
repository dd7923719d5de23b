//! Robot controller: fixed-interval tick, radar projection and command
//! refresh.
//!
//! The controller owns the robot handle, the current status snapshot and
//! the radar map. It refreshes pending motion and scan commands every
//! `command_interval` even without change, honoring the firmware's motion
//! deadline watchdog, and halts immediately when a contact blocks the
//! robot.

use crate::config::ControllerConfig;
use crate::error::Result;
use wheelly_io::protocol::messages::ProxyMessage;
use wheelly_io::{RobotApi, RobotMessage, RobotStatus};
use wheelly_map::{Point2, RadarMap, SensorSignal};
use wheelly_io::status::DISTANCE_PER_PULSE;

/// The pending command set issued by the agent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PendingCommand {
    pub halt: bool,
    /// Absolute direction (DEG) and speed (pulses/s).
    pub direction: i32,
    pub speed: f32,
    /// Sensor direction (DEG).
    pub sensor: i32,
}

pub struct RobotController {
    robot: Box<dyn RobotApi>,
    status: RobotStatus,
    radar: RadarMap,
    interval: i64,
    command_interval: i64,
    command: PendingCommand,
    prev_halt: bool,
    prev_sensor: i32,
    last_move_time: i64,
    last_scan_time: i64,
    started: bool,
}

impl RobotController {
    pub fn new(robot: Box<dyn RobotApi>, config: &ControllerConfig) -> Self {
        let radar = RadarMap::new(
            config.radar_size,
            config.radar_size,
            Point2::ZERO,
            config.radar_grid,
            config.radar_receptive_distance,
            config.echo_persistence,
        );
        Self {
            robot,
            status: RobotStatus::default(),
            radar,
            interval: config.interval,
            command_interval: config.command_interval,
            command: PendingCommand {
                halt: true,
                ..PendingCommand::default()
            },
            prev_halt: true,
            prev_sensor: 0,
            last_move_time: 0,
            last_scan_time: 0,
            started: false,
        }
    }

    /// Opens the robot link and reads the first status.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.robot.connect()?;
        self.robot.configure()?;
        self.started = true;
        self.read_status(0)?;
        let time = self.status.simulation_time();
        self.status = self.status.with_reset_time(time);
        Ok(())
    }

    pub fn status(&self) -> &RobotStatus {
        &self.status
    }

    /// Cheap immutable radar snapshot.
    pub fn radar(&self) -> RadarMap {
        self.radar.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.robot.is_closed()
    }

    /// Replaces the pending command set.
    pub fn set_command(&mut self, command: PendingCommand) {
        self.command = command;
    }

    /// One controller tick: advance the robot, consume messages, enforce
    /// contact halt, refresh commands.
    pub fn tick(&mut self) -> Result<()> {
        self.robot.tick(self.interval)?;
        for message in self.robot.poll_messages() {
            self.apply_message(message);
        }
        // A blocked contact halts regardless of the pending action
        let blocked = !self.status.front_sensor() || !self.status.rear_sensor();
        if blocked && !self.status.is_halted() {
            log::debug!("contact detected, halting");
            self.robot.halt()?;
        }
        self.send_commands(blocked)?;
        self.radar.clean(self.status.simulation_time());
        Ok(())
    }

    /// Ticks until the robot clock passes `reaction_interval` ms, then
    /// returns the status driving the next RL decision.
    pub fn read_status(&mut self, reaction_interval: i64) -> Result<RobotStatus> {
        let timeout = self.status.simulation_time() + reaction_interval;
        loop {
            self.tick()?;
            if self.status.simulation_time() >= timeout {
                break;
            }
        }
        Ok(self.status.clone())
    }

    /// Flushes a final halt and closes the robot.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.robot.halt() {
            log::warn!("final halt failed: {}", e);
        }
        if let Err(e) = self.robot.close() {
            log::warn!("robot close failed: {}", e);
        }
    }

    fn apply_message(&mut self, message: RobotMessage) {
        match message {
            RobotMessage::Motion(motion) => {
                self.status = self.status.with_motion(&motion);
            }
            RobotMessage::Proxy(proxy) => {
                self.status = self.status.with_proxy(&proxy);
                self.project_echo(&proxy);
            }
            RobotMessage::Contacts(contacts) => {
                self.status = self.status.with_contacts(&contacts);
            }
            RobotMessage::Supply(supply) => {
                log::trace!("supply {}", supply.supply);
            }
            RobotMessage::Clock(_) => {}
        }
    }

    /// Projects a fresh echo into the radar map.
    fn project_echo(&mut self, proxy: &ProxyMessage) {
        let signal = SensorSignal {
            location: Point2::new(
                proxy.x_pulses * DISTANCE_PER_PULSE,
                proxy.y_pulses * DISTANCE_PER_PULSE,
            ),
            direction: proxy.echo_direction() as f32,
            distance: proxy.echo_distance(),
            timestamp: proxy.simulation_time,
            is_echo: proxy.echo_delay > 0,
        };
        self.radar.update(&signal);
    }

    /// Issues the pending commands with refresh semantics.
    ///
    /// Motion commands are suppressed while a contact blocks the robot.
    fn send_commands(&mut self, blocked: bool) -> Result<()> {
        let now = self.robot.simulation_time();
        if blocked {
            // Keep only the sensor sweep alive
        } else if self.command.halt != self.prev_halt {
            self.prev_halt = self.command.halt;
            if self.command.halt {
                self.robot.halt()?;
            } else {
                self.robot
                    .drive(self.command.direction, self.command.speed)?;
            }
            self.last_move_time = now;
        } else if !self.command.halt && now >= self.last_move_time + self.command_interval {
            self.robot
                .drive(self.command.direction, self.command.speed)?;
            self.last_move_time = now;
        }

        if self.command.sensor != self.prev_sensor {
            self.robot.scan(self.command.sensor)?;
            self.prev_sensor = self.command.sensor;
            self.last_scan_time = now;
        } else if self.command.sensor != 0 && now >= self.last_scan_time + self.command_interval {
            self.robot.scan(self.command.sensor)?;
            self.last_scan_time = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use wheelly_io::sim::NoiseGenerator;
    use wheelly_io::SimRobot;
    use wheelly_map::ObstacleMap;

    fn controller_config() -> ControllerConfig {
        serde_yaml::from_str(
            r#"
interval: 10
commandInterval: 600
radarSize: 51
"#,
        )
        .unwrap()
    }

    fn sim_controller(obstacles: Vec<Point2>) -> RobotController {
        let map = ObstacleMap::new(obstacles, wheelly_io::status::OBSTACLE_SIZE);
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
        RobotController::new(Box::new(robot), &controller_config())
    }

    #[test]
    fn test_read_status_advances_clock() {
        let mut controller = sim_controller(Vec::new());
        controller.start().unwrap();
        let t0 = controller.status().simulation_time();
        let status = controller.read_status(300).unwrap();
        assert!(status.simulation_time() >= t0 + 300);
    }

    #[test]
    fn test_radar_filled_from_echo() {
        let mut controller = sim_controller(vec![Point2::new(1.0, 0.0)]);
        controller.start().unwrap();
        // Let a proxy message arrive (500 ms cadence)
        controller.read_status(600).unwrap();
        let radar = controller.radar();
        let sector = radar.sector_at(0.9, 0.0).unwrap();
        assert!(sector.has_obstacle());
    }

    #[test]
    fn test_command_refresh() {
        let mut controller = sim_controller(Vec::new());
        controller.start().unwrap();
        controller.set_command(PendingCommand {
            halt: false,
            direction: 0,
            speed: 20.0,
            sensor: 30,
        });
        // Motion and proxy messages arrive on the 500 ms cadence
        let status = controller.read_status(600).unwrap();
        assert!(!status.is_halted());
        assert!(status.left_pps() > 0.0);
        assert_eq!(status.sensor_direction(), 30);
    }

    #[test]
    fn test_halt_command() {
        let mut controller = sim_controller(Vec::new());
        controller.start().unwrap();
        controller.set_command(PendingCommand {
            halt: false,
            direction: 0,
            speed: 20.0,
            sensor: 0,
        });
        controller.read_status(600).unwrap();
        controller.set_command(PendingCommand {
            halt: true,
            ..PendingCommand::default()
        });
        let status = controller.read_status(600).unwrap();
        assert!(status.is_halted());
    }
}
