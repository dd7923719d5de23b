//! Robot link layer for Wheelly.
//!
//! This crate provides the core components for interacting with the robot
//! hardware or its simulation:
//!
//! - the line-oriented wire protocol (status decoding, command encoding)
//! - the clock synchronization between remote and simulation time
//! - the reliable TCP transport with reconnection
//! - the physics simulator used in place of the real robot

pub mod error;
pub mod protocol;
pub mod real;
pub mod robot;
pub mod sim;
pub mod status;
pub mod transport;

pub use error::{Error, Result};
pub use robot::{RobotApi, RobotMessage};
pub use sim::SimRobot;
pub use status::RobotStatus;
