//! Collaborator traits for the simulated bodies and their presentation
//!
//! Reconciliation only needs to read and steer a body, so physics engines and
//! renderers plug in through these narrow traits. [`KinematicBody`] and
//! [`LogRenderer`] cover headless use.

use log::trace;

/// A simulated body the client can read and steer
pub trait Body {
    fn position(&self) -> (f32, f32);
    fn velocity(&self) -> (f32, f32);
    fn rotation(&self) -> f32;
    fn set_velocity(&mut self, velocity_x: f32, velocity_y: f32);
    /// Moves the body without simulating the path in between
    fn teleport(&mut self, x: f32, y: f32);
    fn set_rotation(&mut self, rotation: f32);
    /// Applies `force` at the world-space `point`
    fn apply_force(&mut self, force: (f32, f32), point: (f32, f32));
    /// Advances the simulation by `dt` seconds
    fn step(&mut self, dt: f32);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySize {
    pub width: f32,
    pub height: f32,
}

impl Default for BodySize {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
        }
    }
}

/// Creates bodies for players as they appear
pub trait BodyFactory {
    type Body: Body;

    fn create_body(&mut self, x: f32, y: f32, size: BodySize) -> Self::Body;
}

/// Draws one body
pub trait Renderer {
    fn render(&mut self, x: f32, y: f32, rotation: f32);
}

/// A point mass moving at constant velocity between forces
#[derive(Debug, Clone, PartialEq)]
pub struct KinematicBody {
    x: f32,
    y: f32,
    velocity_x: f32,
    velocity_y: f32,
    rotation: f32,
    mass: f32,
    size: BodySize,
    force: (f32, f32),
}

impl KinematicBody {
    pub fn new(x: f32, y: f32, size: BodySize, mass: f32) -> Self {
        Self {
            x,
            y,
            velocity_x: 0.0,
            velocity_y: 0.0,
            rotation: 0.0,
            mass: mass.max(f32::EPSILON),
            size,
            force: (0.0, 0.0),
        }
    }

    pub fn size(&self) -> BodySize {
        self.size
    }
}

impl Body for KinematicBody {
    fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    fn velocity(&self) -> (f32, f32) {
        (self.velocity_x, self.velocity_y)
    }

    fn rotation(&self) -> f32 {
        self.rotation
    }

    fn set_velocity(&mut self, velocity_x: f32, velocity_y: f32) {
        self.velocity_x = velocity_x;
        self.velocity_y = velocity_y;
    }

    fn teleport(&mut self, x: f32, y: f32) {
        self.x = x;
        self.y = y;
    }

    fn set_rotation(&mut self, rotation: f32) {
        self.rotation = rotation;
    }

    // No angular state, so the application point is ignored
    fn apply_force(&mut self, force: (f32, f32), _point: (f32, f32)) {
        self.force.0 += force.0;
        self.force.1 += force.1;
    }

    fn step(&mut self, dt: f32) {
        self.velocity_x += self.force.0 / self.mass * dt;
        self.velocity_y += self.force.1 / self.mass * dt;
        self.force = (0.0, 0.0);

        self.x += self.velocity_x * dt;
        self.y += self.velocity_y * dt;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KinematicBodyFactory {
    pub mass: f32,
}

impl Default for KinematicBodyFactory {
    fn default() -> Self {
        Self { mass: 1.0 }
    }
}

impl BodyFactory for KinematicBodyFactory {
    type Body = KinematicBody;

    fn create_body(&mut self, x: f32, y: f32, size: BodySize) -> KinematicBody {
        KinematicBody::new(x, y, size, self.mass)
    }
}

/// Renderer that writes each draw call to the trace log
#[derive(Debug, Default)]
pub struct LogRenderer {
    frames: u64,
}

impl LogRenderer {
    pub fn draw_calls(&self) -> u64 {
        self.frames
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, x: f32, y: f32, rotation: f32) {
        self.frames += 1;
        trace!("draw at ({:.2}, {:.2}) facing {:.2}", x, y, rotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_step_integrates_velocity() {
        let mut body = KinematicBody::new(0.0, 0.0, BodySize::default(), 1.0);
        body.set_velocity(2.0, -1.0);
        body.step(0.5);
        let (x, y) = body.position();
        assert_approx_eq!(x, 1.0);
        assert_approx_eq!(y, -0.5);
    }

    #[test]
    fn test_force_is_consumed_by_one_step() {
        let mut body = KinematicBody::new(0.0, 0.0, BodySize::default(), 2.0);
        body.apply_force((4.0, 0.0), (0.0, 0.0));
        body.step(1.0);
        assert_approx_eq!(body.velocity().0, 2.0);

        body.step(1.0);
        assert_approx_eq!(body.velocity().0, 2.0);
    }

    #[test]
    fn test_teleport_keeps_velocity() {
        let mut body = KinematicBodyFactory::default().create_body(1.0, 1.0, BodySize::default());
        body.set_velocity(3.0, 0.0);
        body.teleport(10.0, 20.0);
        assert_eq!(body.position(), (10.0, 20.0));
        assert_eq!(body.velocity(), (3.0, 0.0));
    }

    #[test]
    fn test_log_renderer_counts_draws() {
        let mut renderer = LogRenderer::default();
        renderer.render(0.0, 0.0, 0.0);
        renderer.render(1.0, 1.0, 0.5);
        assert_eq!(renderer.draw_calls(), 2);
    }
}
