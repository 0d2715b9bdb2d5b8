use crate::level_set::MAX_DISTANCE;
use glam::DVec3;

pub trait Surface3: Send + Sync {
    /// Signed distance in the surface's local frame, negative inside.
    fn signed_distance(&self, point: DVec3) -> f64;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere3 {
    pub center: DVec3,
    pub radius: f64,
}

impl Sphere3 {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Surface3 for Sphere3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        point.distance(self.center) - self.radius
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Box3 {
    pub lower: DVec3,
    pub upper: DVec3,
}

impl Box3 {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
        }
    }
}

impl Surface3 for Box3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        let center = 0.5 * (self.lower + self.upper);
        let half = 0.5 * (self.upper - self.lower);
        let q = (point - center).abs() - half;
        q.max(DVec3::ZERO).length() + q.max_element().min(0.0)
    }
}

/// Half-space below the plane; `normal` points out of the solid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane3 {
    pub normal: DVec3,
    pub point: DVec3,
}

impl Plane3 {
    pub fn new(normal: DVec3, point: DVec3) -> Self {
        Self {
            normal: normal.normalize_or_zero(),
            point,
        }
    }
}

impl Surface3 for Plane3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        (point - self.point).dot(self.normal)
    }
}

#[derive(Default)]
pub struct SurfaceSet3 {
    surfaces: Vec<Box<dyn Surface3>>,
}

impl SurfaceSet3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_surface(&mut self, surface: Box<dyn Surface3>) {
        self.surfaces.push(surface);
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl Surface3 for SurfaceSet3 {
    fn signed_distance(&self, point: DVec3) -> f64 {
        self.surfaces
            .iter()
            .map(|surface| surface.signed_distance(point))
            .fold(MAX_DISTANCE, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn sphere_distance_sign() {
        let sphere = Sphere3::new(DVec3::ZERO, 1.0);
        assert_close(sphere.signed_distance(DVec3::new(2.0, 0.0, 0.0)), 1.0, 1e-12);
        assert_close(sphere.signed_distance(DVec3::ZERO), -1.0, 1e-12);
    }

    #[test]
    fn box_distance_inside_and_outside() {
        let cube = Box3::new(DVec3::splat(1.0), DVec3::splat(-1.0));
        assert_close(cube.signed_distance(DVec3::ZERO), -1.0, 1e-12);
        assert_close(cube.signed_distance(DVec3::new(3.0, 0.0, 0.0)), 2.0, 1e-12);
        assert_close(cube.signed_distance(DVec3::new(2.0, 2.0, 1.0)), 2f64.sqrt(), 1e-12);
    }

    #[test]
    fn plane_is_negative_below() {
        let floor = Plane3::new(DVec3::new(0.0, 2.0, 0.0), DVec3::new(0.0, -1.0, 0.0));
        assert_close(floor.signed_distance(DVec3::new(5.0, -3.0, 2.0)), -2.0, 1e-12);
    }

    #[test]
    fn set_takes_union() {
        let mut set = SurfaceSet3::new();
        assert_eq!(set.signed_distance(DVec3::ZERO), MAX_DISTANCE);
        set.add_surface(Box::new(Sphere3::new(DVec3::new(-2.0, 0.0, 0.0), 1.0)));
        set.add_surface(Box::new(Sphere3::new(DVec3::new(2.0, 0.0, 0.0), 1.0)));
        assert_close(set.signed_distance(DVec3::new(1.5, 0.0, 0.0)), -0.5, 1e-12);
        assert_eq!(set.len(), 2);
    }
}
