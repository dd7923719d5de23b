//! Radar map accumulating proximity echo evidence.
//!
//! The map is a fixed grid of square sectors. Each sector records the
//! timestamp and outcome of the last sensor signal that covered it; a zero
//! timestamp means the sector is unknown. Sectors decay back to unknown
//! when their evidence ages past the echo persistence.

use crate::geometry::{normalize_deg, Point2};

/// Maximum range of a valid echo signal (m).
pub const MAX_SIGNAL_DISTANCE: f32 = 3.0;

/// Default minimum range of a valid echo signal (m).
pub const THRESHOLD_SIGNAL_DISTANCE: f32 = 0.2;

/// A proximity sensor signal projected into the world frame.
#[derive(Clone, Copy, Debug)]
pub struct SensorSignal {
    /// Sensor location at ping (m).
    pub location: Point2,
    /// Absolute echo direction (DEG).
    pub direction: f32,
    /// Echo distance (m), meaningless when `is_echo` is false.
    pub distance: f32,
    /// Signal timestamp, simulation clock (ms).
    pub timestamp: i64,
    /// True if an echo was received.
    pub is_echo: bool,
}

/// A radar map sector.
#[derive(Clone, Copy, Debug)]
pub struct MapSector {
    location: Point2,
    timestamp: i64,
    filled: bool,
}

impl MapSector {
    /// Creates an unknown sector at the location.
    pub fn unknown(location: Point2) -> Self {
        Self {
            location,
            timestamp: 0,
            filled: false,
        }
    }

    pub fn location(&self) -> Point2 {
        self.location
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// True if the sector has been observed.
    pub fn is_known(&self) -> bool {
        self.timestamp > 0
    }

    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// True if the sector is known to contain an obstacle.
    pub fn has_obstacle(&self) -> bool {
        self.is_known() && self.filled
    }

    /// Resets the sector to unknown if its evidence is older than `limit`.
    pub fn clean(&mut self, limit: i64) {
        if self.timestamp <= limit {
            self.timestamp = 0;
        }
    }

    /// Updates the sector with a sensor signal.
    ///
    /// The sector is touched only when its distance from the sensor lies in
    /// [min_distance, MAX_SIGNAL_DISTANCE] and its bearing lies within the
    /// receptive cone `asin(receptive_distance / sector_distance)` of the
    /// signal direction. A sector inside the receptive sphere is always
    /// in-direction.
    pub fn update(&mut self, signal: &SensorSignal, min_distance: f32, receptive_distance: f32) {
        let sector_distance = signal.location.distance(&self.location);
        if sector_distance < min_distance || sector_distance > MAX_SIGNAL_DISTANCE {
            return;
        }
        let in_direction = if sector_distance <= receptive_distance {
            true
        } else {
            let sector_direction = signal.location.direction_to(&self.location);
            let offset = normalize_deg(signal.direction - sector_direction).abs();
            let receptive_angle = (receptive_distance / sector_distance).asin().to_degrees();
            offset <= receptive_angle.round()
        };
        if !in_direction {
            return;
        }
        if signal.is_echo {
            if signal.distance >= sector_distance - receptive_distance {
                self.timestamp = signal.timestamp;
                self.filled = signal.distance <= sector_distance + receptive_distance;
            }
        } else {
            self.timestamp = signal.timestamp;
            self.filled = false;
        }
    }
}

/// Fixed grid of radar sectors over a rectangular world.
#[derive(Clone, Debug)]
pub struct RadarMap {
    sectors: Vec<MapSector>,
    width: usize,
    height: usize,
    center: Point2,
    grid_size: f32,
    min_distance: f32,
    receptive_distance: f32,
    echo_persistence: i64,
}

impl RadarMap {
    /// Creates a map of `width` x `height` sectors of `grid_size` side
    /// centered at `center`.
    pub fn new(
        width: usize,
        height: usize,
        center: Point2,
        grid_size: f32,
        receptive_distance: f32,
        echo_persistence: i64,
    ) -> Self {
        let x0 = center.x - (width as f32 - 1.0) / 2.0 * grid_size;
        let y0 = center.y - (height as f32 - 1.0) / 2.0 * grid_size;
        let mut sectors = Vec::with_capacity(width * height);
        for j in 0..height {
            for i in 0..width {
                let location =
                    Point2::new(x0 + i as f32 * grid_size, y0 + j as f32 * grid_size);
                sectors.push(MapSector::unknown(location));
            }
        }
        Self {
            sectors,
            width,
            height,
            center,
            grid_size,
            min_distance: THRESHOLD_SIGNAL_DISTANCE,
            receptive_distance,
            echo_persistence,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    pub fn sectors(&self) -> &[MapSector] {
        &self.sectors
    }

    /// Returns the sector containing the location, if inside the map.
    pub fn sector_at(&self, x: f32, y: f32) -> Option<&MapSector> {
        let i = ((x - self.center.x) / self.grid_size
            + (self.width as f32 - 1.0) / 2.0)
            .round() as isize;
        let j = ((y - self.center.y) / self.grid_size
            + (self.height as f32 - 1.0) / 2.0)
            .round() as isize;
        if i < 0 || j < 0 || i >= self.width as isize || j >= self.height as isize {
            return None;
        }
        self.sectors.get(j as usize * self.width + i as usize)
    }

    /// Projects a sensor signal into every sector.
    pub fn update(&mut self, signal: &SensorSignal) {
        for sector in &mut self.sectors {
            sector.update(signal, self.min_distance, self.receptive_distance);
        }
    }

    /// Decays sectors whose evidence is older than the echo persistence.
    pub fn clean(&mut self, now: i64) {
        let limit = now - self.echo_persistence;
        for sector in &mut self.sectors {
            sector.clean(limit);
        }
    }

    /// Number of known sectors.
    pub fn known_count(&self) -> usize {
        self.sectors.iter().filter(|s| s.is_known()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_signal(distance: f32, timestamp: i64) -> SensorSignal {
        SensorSignal {
            location: Point2::ZERO,
            direction: 0.0,
            distance,
            timestamp,
            is_echo: true,
        }
    }

    #[test]
    fn test_sector_filled_on_echo() {
        let mut sector = MapSector::unknown(Point2::new(1.0, 0.0));
        sector.update(&echo_signal(1.0, 100), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert!(sector.is_known());
        assert!(sector.is_filled());
        assert_eq!(sector.timestamp(), 100);
    }

    #[test]
    fn test_sector_outside_cone_stays_unknown() {
        // Bearing ~16.7 DEG with a ~5.5 DEG receptive cone at 1.04 m
        let mut sector = MapSector::unknown(Point2::new(1.0, 0.3));
        sector.update(&echo_signal(1.0, 100), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert!(!sector.is_known());
    }

    #[test]
    fn test_sector_cleared_by_short_echo() {
        // Echo well past the sector marks it empty
        let mut sector = MapSector::unknown(Point2::new(1.0, 0.0));
        sector.update(&echo_signal(2.0, 100), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert!(sector.is_known());
        assert!(!sector.is_filled());
    }

    #[test]
    fn test_sector_untouched_by_near_echo() {
        // Echo short of sector distance minus receptive distance
        let mut sector = MapSector::unknown(Point2::new(2.0, 0.0));
        sector.update(&echo_signal(1.0, 100), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert!(!sector.is_known());
    }

    #[test]
    fn test_no_echo_marks_empty() {
        let mut sector = MapSector::unknown(Point2::new(1.0, 0.0));
        let signal = SensorSignal {
            is_echo: false,
            ..echo_signal(0.0, 100)
        };
        sector.update(&signal, THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert!(sector.is_known());
        assert!(!sector.is_filled());
    }

    #[test]
    fn test_timestamp_monotonic() {
        let mut sector = MapSector::unknown(Point2::new(1.0, 0.0));
        sector.update(&echo_signal(1.0, 100), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        sector.update(&echo_signal(1.0, 200), THRESHOLD_SIGNAL_DISTANCE, 0.1);
        assert_eq!(sector.timestamp(), 200);
    }

    #[test]
    fn test_map_update_and_clean() {
        let mut map = RadarMap::new(51, 51, Point2::ZERO, 0.2, 0.1, 1000);
        map.update(&echo_signal(1.0, 100));

        let sector = map.sector_at(1.0, 0.0).unwrap();
        assert!(sector.has_obstacle());
        let sector = map.sector_at(1.0, 0.4).unwrap();
        assert!(!sector.is_known());

        map.clean(2000);
        assert_eq!(map.known_count(), 0);
    }

    #[test]
    fn test_sector_at_bounds() {
        let map = RadarMap::new(11, 11, Point2::ZERO, 0.2, 0.1, 1000);
        assert!(map.sector_at(0.0, 0.0).is_some());
        assert!(map.sector_at(1.0, 1.0).is_some());
        assert!(map.sector_at(2.0, 0.0).is_none());
    }
}
