//! Status line decoding and command encoding.

use crate::error::{Error, Result};
use crate::protocol::clock::ClockConverter;
use crate::status::DISTANCE_SCALE;
use std::fmt;
use std::str::FromStr;
use wheelly_map::geometry::normalize_deg_i;

/// A received line with its local receive time (ms).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedLine {
    pub line: String,
    pub local_time: i64,
}

impl TimedLine {
    pub fn new(line: impl Into<String>, local_time: i64) -> Self {
        Self {
            line: line.into(),
            local_time,
        }
    }
}

/// Motion status decoded from a `st` line.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionMessage {
    pub local_time: i64,
    pub simulation_time: i64,
    pub remote_time: i64,
    pub x_pulses: f32,
    pub y_pulses: f32,
    /// Robot heading (DEG).
    pub direction: i32,
    pub left_pps: f32,
    pub right_pps: f32,
    pub imu_failure: i32,
    pub halted: bool,
    pub left_target_pps: i32,
    pub right_target_pps: i32,
    pub left_power: i32,
    pub right_power: i32,
}

/// Proxy echo decoded from a `px` line.
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyMessage {
    pub local_time: i64,
    pub simulation_time: i64,
    pub remote_time: i64,
    /// Sensor direction at ping (DEG).
    pub sensor_direction: i32,
    /// Echo delay (us), 0 when no echo.
    pub echo_delay: i64,
    pub x_pulses: f32,
    pub y_pulses: f32,
    /// Robot heading at ping (DEG).
    pub echo_yaw: i32,
}

impl ProxyMessage {
    /// Echo distance (m), 0 when no echo.
    pub fn echo_distance(&self) -> f32 {
        self.echo_delay as f32 * DISTANCE_SCALE
    }

    /// Absolute echo direction (DEG).
    pub fn echo_direction(&self) -> i32 {
        normalize_deg_i(self.sensor_direction + self.echo_yaw)
    }
}

/// Contact state decoded from a `ct` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactsMessage {
    pub local_time: i64,
    pub simulation_time: i64,
    pub remote_time: i64,
    pub front_sensor: bool,
    pub rear_sensor: bool,
    pub can_move_forward: bool,
    pub can_move_backward: bool,
}

/// Supply voltage decoded from a `sv` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupplyMessage {
    pub local_time: i64,
    pub simulation_time: i64,
    pub remote_time: i64,
    /// Raw ADC supply reading.
    pub supply: i32,
}

/// Clock reply decoded from a `ck` line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClockReplyMessage {
    pub local_time: i64,
    /// The `originate` timestamp echoed back (local ms).
    pub originate_time: i64,
    /// Remote clock at request receive (ms).
    pub remote_received: i64,
    /// Remote clock at reply transmit (ms).
    pub remote_transmitted: i64,
}

/// Any robot-originated message.
#[derive(Clone, Debug, PartialEq)]
pub enum RobotMessage {
    Motion(MotionMessage),
    Proxy(ProxyMessage),
    Contacts(ContactsMessage),
    Supply(SupplyMessage),
    Clock(ClockReplyMessage),
}

impl RobotMessage {
    pub fn simulation_time(&self) -> i64 {
        match self {
            RobotMessage::Motion(m) => m.simulation_time,
            RobotMessage::Proxy(m) => m.simulation_time,
            RobotMessage::Contacts(m) => m.simulation_time,
            RobotMessage::Supply(m) => m.simulation_time,
            RobotMessage::Clock(m) => m.local_time,
        }
    }
}

const ST_NUM_PARAMS: usize = 13;
const PX_NUM_PARAMS: usize = 7;
const CT_NUM_PARAMS: usize = 6;
const SV_NUM_PARAMS: usize = 3;
const CK_NUM_PARAMS: usize = 4;

fn check_params(line: &str, tokens: &[&str], expected: usize) -> Result<()> {
    if tokens.len() != expected {
        return Err(Error::format(
            line,
            format!("#params={}, expected {}", tokens.len(), expected),
        ));
    }
    Ok(())
}

fn field<T: FromStr>(line: &str, token: &str, name: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    token
        .parse()
        .map_err(|e| Error::format(line, format!("bad {name}: {e}")))
}

fn flag(line: &str, token: &str, name: &str) -> Result<bool> {
    match token {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(Error::format(line, format!("bad {name}: {token:?}"))),
    }
}

/// Decodes a robot-originated line.
///
/// Remote timestamps are mapped to simulation time through the clock
/// converter.
pub fn parse_line(timed: &TimedLine, clock: &ClockConverter) -> Result<RobotMessage> {
    let line = timed.line.trim_end();
    let tokens: Vec<&str> = line.split(' ').collect();
    match tokens.first().copied() {
        Some("st") => {
            check_params(line, &tokens, ST_NUM_PARAMS)?;
            let remote_time = field(line, tokens[1], "remoteTime")?;
            Ok(RobotMessage::Motion(MotionMessage {
                local_time: timed.local_time,
                simulation_time: clock.from_remote(remote_time),
                remote_time,
                x_pulses: field(line, tokens[2], "xPulses")?,
                y_pulses: field(line, tokens[3], "yPulses")?,
                direction: field(line, tokens[4], "direction")?,
                left_pps: field(line, tokens[5], "leftPps")?,
                right_pps: field(line, tokens[6], "rightPps")?,
                imu_failure: field(line, tokens[7], "imuFailure")?,
                halted: flag(line, tokens[8], "halt")?,
                left_target_pps: field(line, tokens[9], "leftTargetPps")?,
                right_target_pps: field(line, tokens[10], "rightTargetPps")?,
                left_power: field(line, tokens[11], "leftPower")?,
                right_power: field(line, tokens[12], "rightPower")?,
            }))
        }
        Some("px") => {
            check_params(line, &tokens, PX_NUM_PARAMS)?;
            let remote_time = field(line, tokens[1], "remoteTime")?;
            Ok(RobotMessage::Proxy(ProxyMessage {
                local_time: timed.local_time,
                simulation_time: clock.from_remote(remote_time),
                remote_time,
                sensor_direction: field(line, tokens[2], "sensorDirection")?,
                echo_delay: field(line, tokens[3], "echoDelay")?,
                x_pulses: field(line, tokens[4], "xPulses")?,
                y_pulses: field(line, tokens[5], "yPulses")?,
                echo_yaw: field(line, tokens[6], "echoYaw")?,
            }))
        }
        Some("ct") => {
            check_params(line, &tokens, CT_NUM_PARAMS)?;
            let remote_time = field(line, tokens[1], "remoteTime")?;
            Ok(RobotMessage::Contacts(ContactsMessage {
                local_time: timed.local_time,
                simulation_time: clock.from_remote(remote_time),
                remote_time,
                front_sensor: flag(line, tokens[2], "frontSensor")?,
                rear_sensor: flag(line, tokens[3], "rearSensor")?,
                can_move_forward: flag(line, tokens[4], "canMoveForward")?,
                can_move_backward: flag(line, tokens[5], "canMoveBackward")?,
            }))
        }
        Some("sv") => {
            check_params(line, &tokens, SV_NUM_PARAMS)?;
            let remote_time = field(line, tokens[1], "remoteTime")?;
            Ok(RobotMessage::Supply(SupplyMessage {
                local_time: timed.local_time,
                simulation_time: clock.from_remote(remote_time),
                remote_time,
                supply: field(line, tokens[2], "supply")?,
            }))
        }
        Some("ck") => {
            check_params(line, &tokens, CK_NUM_PARAMS)?;
            Ok(RobotMessage::Clock(ClockReplyMessage {
                local_time: timed.local_time,
                originate_time: field(line, tokens[1], "originateTime")?,
                remote_received: field(line, tokens[2], "remoteReceived")?,
                remote_transmitted: field(line, tokens[3], "remoteTransmitted")?,
            }))
        }
        _ => Err(Error::format(line, "unknown tag")),
    }
}

impl MotionMessage {
    /// Encodes the message as a `st` line.
    pub fn to_line(&self) -> String {
        format!(
            "st {} {} {} {} {} {} {} {} {} {} {} {}",
            self.remote_time,
            self.x_pulses,
            self.y_pulses,
            self.direction,
            self.left_pps,
            self.right_pps,
            self.imu_failure,
            u8::from(self.halted),
            self.left_target_pps,
            self.right_target_pps,
            self.left_power,
            self.right_power
        )
    }
}

impl ProxyMessage {
    /// Encodes the message as a `px` line.
    pub fn to_line(&self) -> String {
        format!(
            "px {} {} {} {} {} {}",
            self.remote_time,
            self.sensor_direction,
            self.echo_delay,
            self.x_pulses,
            self.y_pulses,
            self.echo_yaw
        )
    }
}

impl ContactsMessage {
    /// Encodes the message as a `ct` line.
    pub fn to_line(&self) -> String {
        format!(
            "ct {} {} {} {} {}",
            self.remote_time,
            u8::from(self.front_sensor),
            u8::from(self.rear_sensor),
            u8::from(self.can_move_forward),
            u8::from(self.can_move_backward)
        )
    }
}

impl SupplyMessage {
    /// Encodes the message as a `sv` line.
    pub fn to_line(&self) -> String {
        format!("sv {} {}", self.remote_time, self.supply)
    }
}

/// One of the nine `mt` direction codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum MoveDirection {
    Stop = 0,
    Ahead = 1,
    AheadLeft = 2,
    Left = 3,
    BackLeft = 4,
    Back = 5,
    BackRight = 6,
    Right = 7,
    AheadRight = 8,
}

impl MoveDirection {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use MoveDirection::*;
        Some(match code {
            0 => Stop,
            1 => Ahead,
            2 => AheadLeft,
            3 => Left,
            4 => BackLeft,
            5 => Back,
            6 => BackRight,
            7 => Right,
            8 => AheadRight,
            _ => return None,
        })
    }

    /// Quantizes a relative heading (DEG, CCW positive) to the nearest of
    /// the eight motion directions.
    pub fn from_relative(direction: i32) -> Self {
        let sector = (normalize_deg_i(direction) as f32 / 45.0).round() as i32;
        let code = 1 + sector.rem_euclid(8) as u8;
        MoveDirection::from_code(code).unwrap_or(MoveDirection::Ahead)
    }
}

/// A command sent to the robot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RobotCommand {
    /// Stop both wheels.
    Halt,
    /// Move along a direction code until the remote-clock deadline (ms).
    Move {
        deadline: i64,
        direction: MoveDirection,
    },
    /// Point the sensor at the direction (DEG in [-90, 90]) and sweep.
    Scan { direction: i32 },
    /// Request an immediate status frame.
    QueryStatus,
    /// Clock sync ping carrying the local clock (ms).
    ClockSync { local_time: i64 },
}

impl RobotCommand {
    /// Encodes the command as a wire line (without terminator).
    pub fn encode(&self) -> String {
        match self {
            RobotCommand::Halt => "ha".to_string(),
            RobotCommand::Move {
                deadline,
                direction,
            } => format!("mt {} {}", deadline, direction.code()),
            RobotCommand::Scan { direction } => format!("sc {}", direction),
            RobotCommand::QueryStatus => "qs".to_string(),
            RobotCommand::ClockSync { local_time } => format!("ck {}", local_time),
        }
    }
}
