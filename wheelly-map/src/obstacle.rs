//! Static obstacle map.
//!
//! Obstacles are points snapped to a square grid; each occupies a square
//! footprint of one grid cell. The map is built once per session, either
//! from explicit walls or from randomly placed obstacles.

use crate::geometry::{normalize_deg, Point2};
use rand::Rng;
use std::collections::BTreeSet;

/// Map of static obstacles with a square footprint of `grid_size` per point.
#[derive(Clone, Debug)]
pub struct ObstacleMap {
    points: Vec<Point2>,
    grid_size: f32,
}

impl ObstacleMap {
    /// Creates a map from grid-snapped points.
    pub fn new(points: Vec<Point2>, grid_size: f32) -> Self {
        Self { points, grid_size }
    }

    /// Obstacle locations (grid-snapped centers).
    pub fn points(&self) -> &[Point2] {
        &self.points
    }

    /// Side of the square obstacle footprint (m).
    pub fn grid_size(&self) -> f32 {
        self.grid_size
    }

    /// Number of obstacles.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns true if an obstacle cell contains the given location.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let half = self.grid_size / 2.0;
        self.points
            .iter()
            .any(|p| (x - p.x).abs() <= half && (y - p.y).abs() <= half)
    }

    /// Returns the nearest obstacle whose bearing from `origin` lies within
    /// `receptive_angle` degrees of `direction` degrees.
    pub fn nearest(&self, origin: Point2, direction: f32, receptive_angle: f32) -> Option<Point2> {
        let mut best: Option<(f32, Point2)> = None;
        for p in &self.points {
            let distance = origin.distance(p);
            if distance <= f32::EPSILON {
                continue;
            }
            let bearing = origin.direction_to(p);
            if normalize_deg(bearing - direction).abs() > receptive_angle {
                continue;
            }
            match best {
                Some((d, _)) if d <= distance => {}
                _ => best = Some((distance, *p)),
            }
        }
        best.map(|(_, p)| p)
    }
}

/// Builder of obstacle maps with grid snapping and duplicate removal.
#[derive(Debug)]
pub struct MapBuilder {
    grid_size: f32,
    cells: BTreeSet<(i32, i32)>,
}

impl MapBuilder {
    pub fn new(grid_size: f32) -> Self {
        Self {
            grid_size,
            cells: BTreeSet::new(),
        }
    }

    fn snap(&self, v: f32) -> i32 {
        (v / self.grid_size).round() as i32
    }

    /// Adds an obstacle at the cell containing the location.
    pub fn add(&mut self, x: f32, y: f32) -> &mut Self {
        self.cells.insert((self.snap(x), self.snap(y)));
        self
    }

    /// Adds the border cells of a rectangle.
    pub fn rect(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) -> &mut Self {
        let (i0, i1) = (self.snap(x0.min(x1)), self.snap(x0.max(x1)));
        let (j0, j1) = (self.snap(y0.min(y1)), self.snap(y0.max(y1)));
        for i in i0..=i1 {
            self.cells.insert((i, j0));
            self.cells.insert((i, j1));
        }
        for j in j0..=j1 {
            self.cells.insert((i0, j));
            self.cells.insert((i1, j));
        }
        self
    }

    /// Adds `n` random obstacles at a distance in [min_distance, max_distance]
    /// from the center.
    pub fn rand<R: Rng>(
        &mut self,
        n: usize,
        center: Point2,
        min_distance: f32,
        max_distance: f32,
        rng: &mut R,
    ) -> &mut Self {
        let mut placed = 0;
        while placed < n {
            let distance = rng.gen_range(min_distance..=max_distance);
            let angle = rng.gen_range(-std::f32::consts::PI..std::f32::consts::PI);
            let x = center.x + distance * angle.cos();
            let y = center.y + distance * angle.sin();
            let cell = (self.snap(x), self.snap(y));
            if self.cells.insert(cell) {
                placed += 1;
            }
        }
        self
    }

    pub fn build(&self) -> ObstacleMap {
        let points = self
            .cells
            .iter()
            .map(|&(i, j)| Point2::new(i as f32 * self.grid_size, j as f32 * self.grid_size))
            .collect();
        ObstacleMap::new(points, self.grid_size)
    }
}
