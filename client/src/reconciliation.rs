//! Steering simulated bodies toward authoritative positions
//!
//! Small disagreements with the server are left to the local simulation. A
//! large one either snaps the body into place or starts an interpolation: every
//! update then sets the body's velocity to a fraction of the remaining offset
//! until the body is close enough to the target.

use crate::body::Body;
use log::debug;
use shared::distance_squared;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileConfig {
    /// Offsets shorter than this are left to the simulation
    pub desync_distance: f32,
    /// Teleport instead of interpolating
    pub snap: bool,
    /// Share of the remaining offset turned into velocity per update
    pub interpolation_factor: f32,
    /// Interpolation ends once the body is this close to its target
    pub convergence_epsilon: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            desync_distance: 3.0,
            snap: false,
            interpolation_factor: 0.5,
            convergence_epsilon: 0.05,
        }
    }
}

/// What a position update did to the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correction {
    /// Within tolerance; only the rotation was applied
    Accepted,
    /// Moved straight to the authoritative position
    Snapped,
    /// Interpolating toward the authoritative position
    Interpolating,
}

/// Reconciliation state for one remote body
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcileConfig,
    target: Option<(f32, f32)>,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            target: None,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn is_interpolating(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<(f32, f32)> {
        self.target
    }

    pub fn on_position<B: Body>(&mut self, body: &mut B, x: f32, y: f32, rotation: f32) -> Correction {
        let (local_x, local_y) = body.position();
        let desync = self.config.desync_distance;

        body.set_rotation(rotation);

        if distance_squared(local_x, local_y, x, y) < desync * desync {
            return Correction::Accepted;
        }

        if self.config.snap {
            debug!(
                "Snapping body from ({:.2}, {:.2}) to ({:.2}, {:.2})",
                local_x, local_y, x, y
            );
            body.teleport(x, y);
            self.target = None;
            Correction::Snapped
        } else {
            debug!(
                "Interpolating body from ({:.2}, {:.2}) to ({:.2}, {:.2})",
                local_x, local_y, x, y
            );
            self.target = Some((x, y));
            Correction::Interpolating
        }
    }

    pub fn on_velocity<B: Body>(&mut self, body: &mut B, velocity_x: f32, velocity_y: f32, rotation: f32) {
        body.set_velocity(velocity_x, velocity_y);
        body.set_rotation(rotation);
    }

    /// Steers the body toward the target; returns whether interpolation continues
    pub fn update<B: Body>(&mut self, body: &mut B) -> bool {
        let Some((target_x, target_y)) = self.target else {
            return false;
        };

        let (x, y) = body.position();
        let epsilon = self.config.convergence_epsilon;
        if distance_squared(x, y, target_x, target_y) <= epsilon * epsilon {
            self.target = None;
            return false;
        }

        let factor = self.config.interpolation_factor;
        body.set_velocity((target_x - x) * factor, (target_y - y) * factor);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BodySize, KinematicBody};
    use assert_approx_eq::assert_approx_eq;

    fn body_at(x: f32, y: f32) -> KinematicBody {
        KinematicBody::new(x, y, BodySize::default(), 1.0)
    }

    #[test]
    fn test_small_offset_only_rotates() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let mut body = body_at(10.0, 10.0);
        body.set_velocity(1.0, 0.0);

        let correction = reconciler.on_position(&mut body, 11.0, 10.5, 0.75);

        assert_eq!(correction, Correction::Accepted);
        assert_eq!(body.position(), (10.0, 10.0));
        assert_eq!(body.velocity(), (1.0, 0.0));
        assert_approx_eq!(body.rotation(), 0.75);
        assert!(!reconciler.is_interpolating());
    }

    #[test]
    fn test_desync_starts_interpolation() {
        let mut reconciler = Reconciler::new(ReconcileConfig {
            desync_distance: 3.0,
            ..ReconcileConfig::default()
        });
        let mut body = body_at(10.0, 10.0);

        let correction = reconciler.on_position(&mut body, 20.0, 10.0, 0.0);
        assert_eq!(correction, Correction::Interpolating);
        assert_eq!(reconciler.target(), Some((20.0, 10.0)));

        assert!(reconciler.update(&mut body));
        let (vx, vy) = body.velocity();
        assert_approx_eq!(vx, 5.0);
        assert_approx_eq!(vy, 0.0);
    }

    #[test]
    fn test_snap_teleports_and_cancels_interpolation() {
        let mut reconciler = Reconciler::new(ReconcileConfig {
            snap: true,
            ..ReconcileConfig::default()
        });
        let mut body = body_at(0.0, 0.0);

        let correction = reconciler.on_position(&mut body, 8.0, -6.0, 1.0);
        assert_eq!(correction, Correction::Snapped);
        assert_eq!(body.position(), (8.0, -6.0));
        assert!(!reconciler.is_interpolating());
        assert!(!reconciler.update(&mut body));
    }

    #[test]
    fn test_interpolation_converges() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let mut body = body_at(10.0, 10.0);
        reconciler.on_position(&mut body, 20.0, 10.0, 0.0);

        let mut updates = 0;
        while reconciler.update(&mut body) {
            body.step(1.0);
            updates += 1;
            assert!(updates < 100, "interpolation never converged");
        }

        let (x, y) = body.position();
        assert!((x - 20.0).abs() <= 0.05);
        assert_approx_eq!(y, 10.0);
        assert_eq!(reconciler.target(), None);
    }

    #[test]
    fn test_new_target_replaces_old() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let mut body = body_at(0.0, 0.0);
        reconciler.on_position(&mut body, 10.0, 0.0, 0.0);
        reconciler.on_position(&mut body, 0.0, 10.0, 0.0);

        reconciler.update(&mut body);
        let (vx, vy) = body.velocity();
        assert_approx_eq!(vx, 0.0);
        assert_approx_eq!(vy, 5.0);
    }

    #[test]
    fn test_velocity_is_applied_directly() {
        let mut reconciler = Reconciler::new(ReconcileConfig::default());
        let mut body = body_at(0.0, 0.0);
        reconciler.on_velocity(&mut body, -2.0, 4.0, 3.0);
        assert_eq!(body.velocity(), (-2.0, 4.0));
        assert_approx_eq!(body.rotation(), 3.0);
    }
}
