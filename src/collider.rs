use crate::field::VectorField3;
use crate::level_set::MAX_DISTANCE;
use crate::surface::Surface3;
use glam::{DQuat, DVec3};
use parking_lot::RwLock;
use std::sync::Arc;

pub trait Collider3: Send + Sync {
    fn signed_distance(&self, point: DVec3) -> f64;

    fn velocity_at(&self, point: DVec3) -> DVec3;

    fn update(&self, current_time: f64, time_interval: f64);

    fn friction_coefficient(&self) -> f64 {
        0.0
    }

    fn friction_coefficient_at(&self, _point: DVec3) -> f64 {
        self.friction_coefficient()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RigidBodyMotion {
    pub translation: DVec3,
    pub orientation: DQuat,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
}

impl Default for RigidBodyMotion {
    fn default() -> Self {
        Self {
            translation: DVec3::ZERO,
            orientation: DQuat::IDENTITY,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
        }
    }
}

impl RigidBodyMotion {
    pub fn velocity_at(&self, point: DVec3) -> DVec3 {
        self.linear_velocity + self.angular_velocity.cross(point - self.translation)
    }

    pub fn to_local(&self, point: DVec3) -> DVec3 {
        self.orientation.inverse() * (point - self.translation)
    }

    fn integrate(&mut self, time_interval: f64) {
        self.translation += self.linear_velocity * time_interval;
        let rotation = self.angular_velocity * time_interval;
        if rotation.length_squared() > 0.0 {
            self.orientation = (DQuat::from_scaled_axis(rotation) * self.orientation).normalize();
        }
    }
}

pub type ColliderUpdateCallback = Box<dyn Fn(&mut RigidBodyMotion, f64, f64) + Send + Sync>;

/// A surface moving as a rigid body. Motion sits behind a lock so the
/// collider can be shared and still advance through `update`.
pub struct RigidBodyCollider3 {
    surface: Box<dyn Surface3>,
    motion: RwLock<RigidBodyMotion>,
    friction_coefficient: f64,
    on_update: Option<ColliderUpdateCallback>,
}

impl RigidBodyCollider3 {
    pub fn new(surface: Box<dyn Surface3>, motion: RigidBodyMotion) -> Self {
        Self {
            surface,
            motion: RwLock::new(motion),
            friction_coefficient: 0.0,
            on_update: None,
        }
    }

    pub fn with_friction_coefficient(mut self, friction_coefficient: f64) -> Self {
        self.friction_coefficient = friction_coefficient.max(0.0);
        self
    }

    pub fn with_on_update(mut self, callback: ColliderUpdateCallback) -> Self {
        self.on_update = Some(callback);
        self
    }

    pub fn motion(&self) -> RigidBodyMotion {
        *self.motion.read()
    }

    pub fn set_motion(&self, motion: RigidBodyMotion) {
        *self.motion.write() = motion;
    }
}

impl Collider3 for RigidBodyCollider3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        let local = self.motion.read().to_local(point);
        self.surface.signed_distance(local)
    }

    fn velocity_at(&self, point: DVec3) -> DVec3 {
        self.motion.read().velocity_at(point)
    }

    fn update(&self, current_time: f64, time_interval: f64) {
        let mut motion = self.motion.write();
        motion.integrate(time_interval);
        if let Some(callback) = &self.on_update {
            callback(&mut *motion, current_time, time_interval);
        }
    }

    fn friction_coefficient(&self) -> f64 {
        self.friction_coefficient
    }
}

#[derive(Default)]
pub struct ColliderSet3 {
    colliders: Vec<Arc<dyn Collider3>>,
}

impl ColliderSet3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_collider(&mut self, collider: Arc<dyn Collider3>) {
        self.colliders.push(collider);
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    fn nearest(&self, point: DVec3) -> Option<&Arc<dyn Collider3>> {
        self.colliders.iter().min_by(|a, b| {
            a.signed_distance(point)
                .abs()
                .total_cmp(&b.signed_distance(point).abs())
        })
    }
}

impl Collider3 for ColliderSet3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        self.colliders
            .iter()
            .map(|collider| collider.signed_distance(point))
            .fold(MAX_DISTANCE, f64::min)
    }

    fn velocity_at(&self, point: DVec3) -> DVec3 {
        self.nearest(point)
            .map_or(DVec3::ZERO, |collider| collider.velocity_at(point))
    }

    fn update(&self, current_time: f64, time_interval: f64) {
        for collider in &self.colliders {
            collider.update(current_time, time_interval);
        }
    }

    fn friction_coefficient_at(&self, point: DVec3) -> f64 {
        self.nearest(point)
            .map_or(0.0, |collider| collider.friction_coefficient_at(point))
    }
}

/// Collider velocity sampled on demand, zero without a collider.
#[derive(Clone, Default)]
pub struct ColliderVelocityField3 {
    collider: Option<Arc<dyn Collider3>>,
}

impl ColliderVelocityField3 {
    pub fn new(collider: Option<Arc<dyn Collider3>>) -> Self {
        Self { collider }
    }
}

impl VectorField3 for ColliderVelocityField3 {
    fn sample(&self, point: DVec3) -> DVec3 {
        self.collider
            .as_ref()
            .map_or(DVec3::ZERO, |collider| collider.velocity_at(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{Plane3, Sphere3};

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn rigid_velocity_includes_rotation() {
        let collider = RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::ZERO, 1.0)),
            RigidBodyMotion {
                translation: DVec3::new(1.0, 0.0, 0.0),
                linear_velocity: DVec3::new(0.0, 0.0, 1.0),
                angular_velocity: DVec3::new(0.0, 0.0, 2.0),
                ..Default::default()
            },
        );
        let v = collider.velocity_at(DVec3::new(2.0, 0.0, 0.0));
        assert_close(v.x, 0.0, 1e-12);
        assert_close(v.y, 2.0, 1e-12);
        assert_close(v.z, 1.0, 1e-12);
    }

    #[test]
    fn update_moves_the_surface() {
        let collider = RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::ZERO, 1.0)),
            RigidBodyMotion {
                linear_velocity: DVec3::new(2.0, 0.0, 0.0),
                ..Default::default()
            },
        );
        assert_close(collider.signed_distance(DVec3::new(1.0, 0.0, 0.0)), 0.0, 1e-12);
        collider.update(0.0, 0.5);
        assert_close(collider.signed_distance(DVec3::new(1.0, 0.0, 0.0)), -1.0, 1e-12);
        assert_close(collider.motion().translation.x, 1.0, 1e-12);
    }

    #[test]
    fn update_rotates_orientation() {
        let collider = RigidBodyCollider3::new(
            Box::new(Plane3::new(DVec3::X, DVec3::ZERO)),
            RigidBodyMotion {
                angular_velocity: DVec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2),
                ..Default::default()
            },
        );
        collider.update(0.0, 1.0);
        // the plane normal now points along +y
        assert_close(collider.signed_distance(DVec3::new(0.0, 3.0, 0.0)), 3.0, 1e-9);
        assert_close(collider.signed_distance(DVec3::new(3.0, 0.0, 0.0)), 0.0, 1e-9);
    }

    #[test]
    fn update_runs_callback_after_integration() {
        let collider = RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::ZERO, 1.0)),
            RigidBodyMotion::default(),
        )
        .with_on_update(Box::new(|motion: &mut RigidBodyMotion, time: f64, _: f64| {
            motion.linear_velocity = DVec3::new(time, 0.0, 0.0);
        }));
        collider.update(3.0, 0.1);
        assert_close(collider.velocity_at(DVec3::ZERO).x, 3.0, 1e-12);
    }

    #[test]
    fn set_reports_nearest_member() {
        let left: Arc<dyn Collider3> = Arc::new(
            RigidBodyCollider3::new(
                Box::new(Sphere3::new(DVec3::new(-3.0, 0.0, 0.0), 1.0)),
                RigidBodyMotion {
                    linear_velocity: DVec3::new(-1.0, 0.0, 0.0),
                    ..Default::default()
                },
            )
            .with_friction_coefficient(0.25),
        );
        let right: Arc<dyn Collider3> = Arc::new(RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::new(3.0, 0.0, 0.0), 1.0)),
            RigidBodyMotion {
                linear_velocity: DVec3::new(1.0, 0.0, 0.0),
                ..Default::default()
            },
        ));
        let mut set = ColliderSet3::new();
        set.add_collider(left);
        set.add_collider(right);
        assert_close(set.signed_distance(DVec3::new(2.5, 0.0, 0.0)), -0.5, 1e-12);
        assert_close(set.velocity_at(DVec3::new(-2.0, 0.0, 0.0)).x, -1.0, 1e-12);
        assert_close(set.velocity_at(DVec3::new(2.0, 0.0, 0.0)).x, 1.0, 1e-12);
        assert_close(set.friction_coefficient_at(DVec3::new(-2.0, 0.0, 0.0)), 0.25, 1e-12);
        assert_close(set.friction_coefficient_at(DVec3::new(2.0, 0.0, 0.0)), 0.0, 1e-12);
    }

    #[test]
    fn velocity_field_is_zero_without_collider() {
        let field = ColliderVelocityField3::new(None);
        assert_eq!(field.sample(DVec3::ONE), DVec3::ZERO);
    }
}
