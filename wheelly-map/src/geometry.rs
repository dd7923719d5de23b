//! Planar geometry helpers.
//!
//! Directions are expressed in degrees measured counterclockwise from the
//! +x axis and normalized to the half-open interval (-180, 180].

use serde::{Deserialize, Serialize};

/// A point in the world frame (meters).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    /// Origin point.
    pub const ZERO: Point2 = Point2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point2) -> f32 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Direction from this point toward another (DEG).
    pub fn direction_to(&self, other: &Point2) -> f32 {
        (other.y - self.y).atan2(other.x - self.x).to_degrees()
    }
}

/// Normalizes an angle in degrees to (-180, 180].
pub fn normalize_deg(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Normalizes an integer angle in degrees to (-180, 180].
pub fn normalize_deg_i(angle: i32) -> i32 {
    let mut a = angle.rem_euclid(360);
    if a > 180 {
        a -= 360;
    }
    a
}

/// Normalizes an angle in radians to (-pi, pi].
pub fn normalize_rad(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    } else if a <= -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    }
    a
}

/// Clamps a value to the [min, max] interval.
pub fn clip(value: f32, min: f32, max: f32) -> f32 {
    value.clamp(min, max)
}

/// Linear interpolation mapping x from [x0, x1] to [y0, y1], unclamped.
pub fn linear(x: f32, x0: f32, x1: f32, y0: f32, y1: f32) -> f32 {
    (x - x0) * (y1 - y0) / (x1 - x0) + y0
}
