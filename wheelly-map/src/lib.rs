//! Obstacle and radar mapping for the Wheelly robot.
//!
//! The crate provides the planar geometry helpers, the static obstacle map
//! used by the simulator, and the radar map that accumulates echo evidence
//! from the proximity sensor.

pub mod geometry;
pub mod obstacle;
pub mod radar;

pub use geometry::Point2;
pub use obstacle::{MapBuilder, ObstacleMap};
pub use radar::{MapSector, RadarMap, SensorSignal};
