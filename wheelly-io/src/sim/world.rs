//! Minimal rigid-body world for the simulator.
//!
//! A single dynamic circular body moves among static axis-aligned square
//! obstacles. Integration is a fixed-step impulse solver: velocities are
//! integrated from the applied force and torque, then contacts against the
//! obstacle boxes are resolved over a fixed number of velocity and
//! position iterations (restitution 0). A small contact slop keeps resting
//! contacts alive between steps.

use wheelly_map::Point2;

const VELOCITY_ITERATIONS: usize = 10;
const POSITION_ITERATIONS: usize = 10;
/// Separation below which a contact is considered alive (m).
const CONTACT_SLOP: f32 = 0.005;

/// A contact between the body and an obstacle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    /// Contact point on the obstacle surface (world frame).
    pub point: Point2,
    /// Center of the contacted obstacle.
    pub obstacle: Point2,
}

/// Contact transitions produced by one step.
#[derive(Clone, Debug, Default)]
pub struct StepEvents {
    /// Contacts that began during the step.
    pub begun: Vec<Contact>,
    /// True when all previous contacts ended during the step.
    pub ended: bool,
}

/// The dynamic body.
#[derive(Clone, Debug)]
pub struct Body {
    pub position: Point2,
    pub velocity: (f32, f32),
    /// Heading (RAD, CCW from +x).
    pub angle: f32,
    pub angular_velocity: f32,
    pub mass: f32,
    pub inertia: f32,
    pub radius: f32,
}

impl Body {
    /// Creates a disc body at rest.
    pub fn disc(position: Point2, angle: f32, mass: f32, radius: f32) -> Self {
        Self {
            position,
            velocity: (0.0, 0.0),
            angle,
            angular_velocity: 0.0,
            mass,
            inertia: 0.5 * mass * radius * radius,
            radius,
        }
    }

    /// Velocity component along the heading (m/s).
    pub fn forward_velocity(&self) -> f32 {
        self.velocity.0 * self.angle.cos() + self.velocity.1 * self.angle.sin()
    }
}

/// Separation data of the body against one obstacle.
#[derive(Clone, Copy, Debug)]
struct Separation {
    /// Contact normal pointing away from the obstacle.
    normal: (f32, f32),
    /// Penetration depth, negative when separated.
    depth: f32,
    /// Closest point on the obstacle surface.
    point: Point2,
}

/// The physics world.
#[derive(Clone, Debug)]
pub struct World {
    body: Body,
    obstacles: Vec<Point2>,
    /// Half side of the square obstacle footprint.
    half_size: f32,
    touching: Vec<usize>,
}

impl World {
    pub fn new(body: Body, obstacles: Vec<Point2>, obstacle_size: f32) -> Self {
        Self {
            body,
            obstacles,
            half_size: obstacle_size / 2.0,
            touching: Vec::new(),
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// True while the body touches any obstacle.
    pub fn in_contact(&self) -> bool {
        !self.touching.is_empty()
    }

    /// Advances the world by `dt` seconds under a world-frame force (N)
    /// and a torque (N m).
    pub fn step(&mut self, dt: f32, force: (f32, f32), torque: f32) -> StepEvents {
        // Integrate velocities
        self.body.velocity.0 += force.0 / self.body.mass * dt;
        self.body.velocity.1 += force.1 / self.body.mass * dt;
        self.body.angular_velocity += torque / self.body.inertia * dt;

        // Remove the velocity component pushing into a live contact
        for _ in 0..VELOCITY_ITERATIONS {
            let mut corrected = false;
            for &idx in &self.touching {
                let sep = self.separation(idx);
                if sep.depth >= -CONTACT_SLOP {
                    let (nx, ny) = sep.normal;
                    let vn = self.body.velocity.0 * nx + self.body.velocity.1 * ny;
                    if vn < 0.0 {
                        self.body.velocity.0 -= vn * nx;
                        self.body.velocity.1 -= vn * ny;
                        corrected = true;
                    }
                }
            }
            if !corrected {
                break;
            }
        }

        // Integrate positions
        self.body.position.x += self.body.velocity.0 * dt;
        self.body.position.y += self.body.velocity.1 * dt;
        self.body.angle += self.body.angular_velocity * dt;

        // Resolve penetrations
        for _ in 0..POSITION_ITERATIONS {
            let mut deepest: Option<Separation> = None;
            for idx in 0..self.obstacles.len() {
                let sep = self.separation(idx);
                if sep.depth > 0.0 {
                    match deepest {
                        Some(d) if d.depth >= sep.depth => {}
                        _ => deepest = Some(sep),
                    }
                }
            }
            let Some(sep) = deepest else {
                break;
            };
            let (nx, ny) = sep.normal;
            self.body.position.x += nx * sep.depth;
            self.body.position.y += ny * sep.depth;
            let vn = self.body.velocity.0 * nx + self.body.velocity.1 * ny;
            if vn < 0.0 {
                self.body.velocity.0 -= vn * nx;
                self.body.velocity.1 -= vn * ny;
            }
        }

        // Contact transitions: alive when within the slop margin
        let mut events = StepEvents::default();
        let mut touching_now = Vec::new();
        for idx in 0..self.obstacles.len() {
            let sep = self.separation(idx);
            if sep.depth >= -CONTACT_SLOP {
                touching_now.push(idx);
                if !self.touching.contains(&idx) {
                    events.begun.push(Contact {
                        point: sep.point,
                        obstacle: self.obstacles[idx],
                    });
                }
            }
        }
        events.ended = touching_now.is_empty() && !self.touching.is_empty();
        self.touching = touching_now;
        events
    }

    fn separation(&self, idx: usize) -> Separation {
        let o = self.obstacles[idx];
        let point = Point2::new(
            self.body
                .position
                .x
                .clamp(o.x - self.half_size, o.x + self.half_size),
            self.body
                .position
                .y
                .clamp(o.y - self.half_size, o.y + self.half_size),
        );
        let dx = self.body.position.x - point.x;
        let dy = self.body.position.y - point.y;
        let distance = dx.hypot(dy);
        if distance > f32::EPSILON {
            Separation {
                normal: (dx / distance, dy / distance),
                depth: self.body.radius - distance,
                point,
            }
        } else {
            // Body center inside the box
            Separation {
                normal: (1.0, 0.0),
                depth: self.body.radius,
                point,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_obstacle(at: Point2) -> World {
        let body = Body::disc(Point2::ZERO, 0.0, 0.785, 0.15);
        World::new(body, vec![at], 0.2)
    }

    #[test]
    fn test_free_motion() {
        let mut world = world_with_obstacle(Point2::new(10.0, 10.0));
        world.body_mut().velocity = (1.0, 0.0);
        let events = world.step(0.5, (0.0, 0.0), 0.0);
        assert!(events.begun.is_empty());
        assert!((world.body().position.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_force_accelerates() {
        let mut world = world_with_obstacle(Point2::new(10.0, 10.0));
        let mass = world.body().mass;
        world.step(1.0, (mass * 0.5, 0.0), 0.0);
        assert!((world.body().velocity.0 - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_torque_spins() {
        let mut world = world_with_obstacle(Point2::new(10.0, 10.0));
        let inertia = world.body().inertia;
        world.step(1.0, (0.0, 0.0), inertia * 0.3);
        assert!((world.body().angular_velocity - 0.3).abs() < 1e-5);
        assert!((world.body().angle - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_contact_stops_body() {
        // Obstacle face at x = 0.2, body radius 0.15
        let mut world = world_with_obstacle(Point2::new(0.3, 0.0));
        world.body_mut().velocity = (0.5, 0.0);
        let mut begun = Vec::new();
        for _ in 0..20 {
            let events = world.step(0.05, (0.0, 0.0), 0.0);
            begun.extend(events.begun);
        }
        assert_eq!(begun.len(), 1);
        assert!((begun[0].point.x - 0.2).abs() < 1e-3);
        assert!(world.in_contact());
        assert!(world.body().velocity.0.abs() < 1e-4);
        assert!(world.body().position.x <= 0.2 - 0.15 + 1e-3);
    }

    #[test]
    fn test_contact_ends_when_leaving() {
        let mut world = world_with_obstacle(Point2::new(0.3, 0.0));
        world.body_mut().velocity = (0.5, 0.0);
        for _ in 0..20 {
            world.step(0.05, (0.0, 0.0), 0.0);
        }
        assert!(world.in_contact());
        world.body_mut().velocity = (-0.5, 0.0);
        let mut ended = false;
        for _ in 0..20 {
            ended |= world.step(0.05, (0.0, 0.0), 0.0).ended;
            world.body_mut().velocity = (-0.5, 0.0);
        }
        assert!(ended);
        assert!(!world.in_contact());
    }
}
