//! Robot hardware abstraction.
//!
//! `RobotApi` is implemented by the physics simulator and by the network
//! adapter for the real robot. The controller drives it by fixed-interval
//! ticks and drains the queued messages after each tick.

use crate::error::Result;
pub use crate::protocol::messages::RobotMessage;

/// Hardware abstraction for the robot.
///
/// # Lifecycle
/// 1. [`connect`](Self::connect) opens the link (no-op for the simulator)
/// 2. [`configure`](Self::configure) syncs the clock and requests the
///    initial status frames
/// 3. [`tick`](Self::tick) advances the robot by an interval and
///    [`poll_messages`](Self::poll_messages) drains what arrived
/// 4. [`close`](Self::close) releases the link
pub trait RobotApi {
    /// Opens the robot link.
    fn connect(&mut self) -> Result<()>;

    /// Synchronizes the clock and requests the initial status frames.
    fn configure(&mut self) -> Result<()>;

    /// Advances the robot by `dt` ms of simulated or wall-clock time.
    fn tick(&mut self, dt: i64) -> Result<()>;

    /// Stops both wheels.
    fn halt(&mut self) -> Result<()>;

    /// Moves toward an absolute direction (DEG) at the given speed
    /// (pulses/s, negative for backward).
    fn drive(&mut self, direction: i32, speed: f32) -> Result<()>;

    /// Points the sensor at a direction relative to the heading (DEG).
    fn scan(&mut self, direction: i32) -> Result<()>;

    /// Current simulation clock (ms).
    fn simulation_time(&self) -> i64;

    /// Drains the messages received since the last call.
    fn poll_messages(&mut self) -> Vec<RobotMessage>;

    /// True when the underlying link has been closed.
    fn is_closed(&self) -> bool {
        false
    }

    /// Releases the robot link.
    fn close(&mut self) -> Result<()>;
}
