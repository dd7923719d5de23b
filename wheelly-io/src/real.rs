//! Network adapter for the real robot.
//!
//! Wraps the reliable socket, decoding status lines into messages and
//! encoding motion commands into the wire protocol. The clock is resynced
//! on every successful connection.

use crate::error::{Error, Result};
use crate::protocol::clock::{ClockConverter, ClockSyncEvent};
use crate::protocol::messages::{
    parse_line, MoveDirection, RobotCommand, RobotMessage, TimedLine,
};
use crate::robot::RobotApi;
use crate::transport::{now_millis, ConnectionEvent, ReliableSocket, SocketConfig};
use std::time::{Duration, Instant};
use wheelly_map::geometry::normalize_deg_i;

/// Lifetime granted to a motion command before the firmware watchdog
/// stops the motors (ms).
const MOTION_DEADLINE: i64 = 1500;
/// Clock sync round trip timeout.
const SYNC_TIMEOUT: Duration = Duration::from_secs(3);

/// The real robot reached over TCP.
pub struct RealRobot {
    socket: ReliableSocket,
    clock: ClockConverter,
    simulation_time: i64,
    /// Last known heading (DEG) used to encode relative move directions.
    heading: i32,
    messages: Vec<RobotMessage>,
    closed: bool,
}

impl RealRobot {
    /// Opens the transport toward the robot.
    pub fn new(config: SocketConfig) -> Result<Self> {
        let socket = ReliableSocket::connect(config)?;
        Ok(Self {
            socket,
            clock: ClockConverter::identity(),
            simulation_time: 0,
            heading: 0,
            messages: Vec::new(),
            closed: false,
        })
    }

    fn send_command(&self, command: &RobotCommand) -> Result<()> {
        log::debug!("--> {}", command.encode());
        self.socket.send_line(&command.encode())
    }

    /// Runs one `ck` round trip and replaces the clock converter.
    ///
    /// On timeout the last known converter stays in use.
    fn sync_clock(&mut self) -> Result<()> {
        let originate = now_millis();
        self.send_command(&RobotCommand::ClockSync {
            local_time: originate,
        })?;
        let deadline = Instant::now() + SYNC_TIMEOUT;
        while Instant::now() < deadline {
            let Some(timed) = self.socket.read_line(Duration::from_millis(100)) else {
                continue;
            };
            match parse_line(&timed, &self.clock) {
                Ok(RobotMessage::Clock(reply)) if reply.originate_time == originate => {
                    let event = ClockSyncEvent::from_reply(&reply);
                    self.clock = ClockConverter::fit(&[event]);
                    log::info!("clock synced, latency {} ms", event.latency());
                    return Ok(());
                }
                Ok(message) => self.store_message(message),
                Err(e) => log::error!("{}", e),
            }
        }
        Err(Error::ClockUnsynced)
    }

    fn store_message(&mut self, message: RobotMessage) {
        if let RobotMessage::Motion(motion) = &message {
            self.heading = motion.direction;
        }
        let time = message.simulation_time();
        if time > self.simulation_time {
            self.simulation_time = time;
        }
        self.messages.push(message);
    }

    fn drain_line(&mut self, timed: TimedLine) {
        match parse_line(&timed, &self.clock) {
            Ok(message) => self.store_message(message),
            // Malformed lines are reported and dropped
            Err(e) => log::error!("{}", e),
        }
    }
}

impl RobotApi for RealRobot {
    fn connect(&mut self) -> Result<()> {
        // Wait for the transport to come up
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            match self.socket.poll_event() {
                Some(ConnectionEvent::Connected) => return Ok(()),
                Some(ConnectionEvent::Closed) => return Err(Error::ConnectionClosed),
                _ => std::thread::sleep(Duration::from_millis(50)),
            }
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        )))
    }

    fn configure(&mut self) -> Result<()> {
        if let Err(e) = self.sync_clock() {
            log::warn!("clock sync failed: {}, keeping previous converter", e);
        }
        self.send_command(&RobotCommand::QueryStatus)
    }

    fn tick(&mut self, dt: i64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(dt.max(1) as u64);
        loop {
            while let Some(event) = self.socket.poll_event() {
                match event {
                    ConnectionEvent::Connected => {
                        // Resync after every reconnection
                        if let Err(e) = self.sync_clock() {
                            log::warn!("clock resync failed: {}", e);
                        }
                    }
                    ConnectionEvent::Closed => {
                        self.closed = true;
                        return Err(Error::ConnectionClosed);
                    }
                    ConnectionEvent::Disconnected => {
                        log::warn!("robot disconnected");
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Some(timed) = self.socket.read_line(remaining) {
                self.drain_line(timed);
            }
        }
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        self.send_command(&RobotCommand::Halt)
    }

    fn drive(&mut self, direction: i32, speed: f32) -> Result<()> {
        let command = if speed == 0.0 {
            RobotCommand::Move {
                deadline: self.clock.to_remote(self.simulation_time + MOTION_DEADLINE),
                direction: MoveDirection::Stop,
            }
        } else {
            let mut relative = normalize_deg_i(direction - self.heading);
            if speed < 0.0 {
                relative = normalize_deg_i(relative + 180);
            }
            RobotCommand::Move {
                deadline: self.clock.to_remote(self.simulation_time + MOTION_DEADLINE),
                direction: MoveDirection::from_relative(relative),
            }
        };
        self.send_command(&command)
    }

    fn scan(&mut self, direction: i32) -> Result<()> {
        self.send_command(&RobotCommand::Scan {
            direction: direction.clamp(-90, 90),
        })
    }

    fn simulation_time(&self) -> i64 {
        self.simulation_time
    }

    fn poll_messages(&mut self) -> Vec<RobotMessage> {
        std::mem::take(&mut self.messages)
    }

    fn is_closed(&self) -> bool {
        self.closed || self.socket.is_closed()
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.send_command(&RobotCommand::Halt);
        self.socket.close();
        self.closed = true;
        Ok(())
    }
}
