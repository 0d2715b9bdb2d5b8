use crate::collider::{Collider3, ColliderVelocityField3};
use crate::field::{ScalarGrid3, VectorField3};
use crate::grid::Size3;
use crate::level_set::{extrapolate_in_place, fraction_inside_sdf, is_inside_sdf, MAX_DISTANCE};
use crate::mac::FaceCenteredGrid3;
use crate::parallel;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

/// Set of closed (reflecting) domain faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainFaces(u8);

impl DomainFaces {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(1 << 0);
    pub const RIGHT: Self = Self(1 << 1);
    pub const DOWN: Self = Self(1 << 2);
    pub const UP: Self = Self(1 << 3);
    pub const BACK: Self = Self(1 << 4);
    pub const FRONT: Self = Self(1 << 5);
    pub const ALL: Self = Self(0b11_1111);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Lower and upper face of one axis.
    pub fn axis_faces(axis: usize) -> (Self, Self) {
        match axis {
            0 => (Self::LEFT, Self::RIGHT),
            1 => (Self::DOWN, Self::UP),
            _ => (Self::BACK, Self::FRONT),
        }
    }
}

impl Default for DomainFaces {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for DomainFaces {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for DomainFaces {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

#[derive(Clone)]
pub struct FractionalBoundaryConditionSolver3 {
    collider: Option<Arc<dyn Collider3>>,
    grid_size: Size3,
    grid_spacing: DVec3,
    grid_origin: DVec3,
    closed_domain_boundary_flag: DomainFaces,
    collider_sdf: ScalarGrid3,
    collider_velocity_field: ColliderVelocityField3,
}

impl Default for FractionalBoundaryConditionSolver3 {
    fn default() -> Self {
        Self::new()
    }
}

impl FractionalBoundaryConditionSolver3 {
    pub fn new() -> Self {
        Self {
            collider: None,
            grid_size: Size3::default(),
            grid_spacing: DVec3::ONE,
            grid_origin: DVec3::ZERO,
            closed_domain_boundary_flag: DomainFaces::ALL,
            collider_sdf: ScalarGrid3::cell_centered(Size3::default(), DVec3::ONE, DVec3::ZERO, MAX_DISTANCE),
            collider_velocity_field: ColliderVelocityField3::default(),
        }
    }

    pub fn update_collider(
        &mut self,
        collider: Option<Arc<dyn Collider3>>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    ) {
        self.collider = collider;
        self.grid_size = grid_size;
        self.grid_spacing = grid_spacing;
        self.grid_origin = grid_origin;

        self.collider_sdf =
            ScalarGrid3::cell_centered(grid_size, grid_spacing, grid_origin, MAX_DISTANCE);
        if let Some(collider) = &self.collider {
            let grid = self.collider_sdf.grid();
            self.collider_sdf
                .fill_with_index(|i, j, k| collider.signed_distance(grid.position(i, j, k)));
        }
        self.collider_velocity_field = ColliderVelocityField3::new(self.collider.clone());
    }

    pub fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid3, extrapolation_depth: usize) {
        if !self.matches_shape(velocity) {
            self.update_collider(
                self.collider.clone(),
                velocity.resolution(),
                velocity.grid_spacing(),
                velocity.origin(),
            );
        }
        if velocity.resolution().is_empty() {
            return;
        }
        if let Some(collider) = &self.collider {
            self.constrain_against_collider(collider.as_ref(), velocity, extrapolation_depth);
        }
        self.close_domain_faces(velocity);
    }

    fn constrain_against_collider(
        &self,
        collider: &dyn Collider3,
        velocity: &mut FaceCenteredGrid3,
        extrapolation_depth: usize,
    ) {
        let sdf = &self.collider_sdf;
        let collider_velocity = &self.collider_velocity_field;
        let spacing = velocity.grid_spacing();

        for axis in 0..3 {
            let component = velocity.component(axis);
            let grid = component.grid();
            let size = grid.size();
            let half = 0.5 * spacing * unit(axis);
            let faces: Vec<(f64, bool)> = parallel::collect_indexed(grid.len(), |index| {
                let (i, j, k) = size.coord(index);
                let pos = grid.position(i, j, k);
                let open = 1.0 - fraction_inside_sdf(sdf.sample(pos - half), sdf.sample(pos + half));
                if open.clamp(0.0, 1.0) > 0.0 {
                    (component.data()[index], true)
                } else {
                    (collider_velocity.sample(pos)[axis], false)
                }
            });
            let target = velocity.component_mut(axis);
            let mut valid = Vec::with_capacity(faces.len());
            for (slot, (value, open)) in target.data_mut().iter_mut().zip(faces) {
                *slot = value;
                valid.push(open);
            }
            extrapolate_in_place(target, &valid, extrapolation_depth);
        }

        let extrapolated = velocity.clone();
        for axis in 0..3 {
            let component = velocity.component_mut(axis);
            let grid = component.grid();
            component.update_with_index(|i, j, k, value| {
                let pos = grid.position(i, j, k);
                if !is_inside_sdf(sdf.sample(pos)) {
                    return value;
                }
                let collider_vel = collider_velocity.sample(pos);
                let normal = sdf.gradient(pos);
                if normal.length_squared() > 0.0 {
                    let relative = extrapolated.sample(pos) - collider_vel;
                    let tangential = project_and_apply_friction(
                        relative,
                        normal.normalize(),
                        collider.friction_coefficient_at(pos),
                    );
                    (tangential + collider_vel)[axis]
                } else {
                    collider_vel[axis]
                }
            });
        }
    }

    fn close_domain_faces(&self, velocity: &mut FaceCenteredGrid3) {
        let resolution = velocity.resolution();
        let flag = self.closed_domain_boundary_flag;
        for axis in 0..3 {
            let (lower, upper) = DomainFaces::axis_faces(axis);
            let close_lower = flag.contains(lower);
            let close_upper = flag.contains(upper);
            if !close_lower && !close_upper {
                continue;
            }
            let last = resolution.axis(axis);
            velocity.component_mut(axis).update_with_index(|i, j, k, value| {
                let c = [i, j, k][axis];
                if (close_lower && c == 0) || (close_upper && c == last) {
                    0.0
                } else {
                    value
                }
            });
        }
    }

    fn matches_shape(&self, velocity: &FaceCenteredGrid3) -> bool {
        velocity.resolution() == self.grid_size
            && velocity.grid_spacing() == self.grid_spacing
            && velocity.origin() == self.grid_origin
    }

    pub fn collider(&self) -> Option<&Arc<dyn Collider3>> {
        self.collider.as_ref()
    }

    pub fn collider_sdf(&self) -> &ScalarGrid3 {
        &self.collider_sdf
    }

    pub fn collider_velocity_field(&self) -> &ColliderVelocityField3 {
        &self.collider_velocity_field
    }

    pub fn closed_domain_boundary_flag(&self) -> DomainFaces {
        self.closed_domain_boundary_flag
    }

    pub fn set_closed_domain_boundary_flag(&mut self, flag: DomainFaces) {
        self.closed_domain_boundary_flag = flag;
    }

    pub fn grid_size(&self) -> Size3 {
        self.grid_size
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.grid_spacing
    }

    pub fn grid_origin(&self) -> DVec3 {
        self.grid_origin
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderMarker {
    Fluid,
    Collider,
}

/// Fractional constraint followed by a binary pass that pins every face
/// between a collider cell and a fluid cell to the collider velocity.
#[derive(Clone, Default)]
pub struct BlockedBoundaryConditionSolver3 {
    fractional: FractionalBoundaryConditionSolver3,
    marker: Vec<ColliderMarker>,
}

impl BlockedBoundaryConditionSolver3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_collider(
        &mut self,
        collider: Option<Arc<dyn Collider3>>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    ) {
        self.fractional
            .update_collider(collider, grid_size, grid_spacing, grid_origin);
        self.marker = self
            .fractional
            .collider_sdf()
            .data()
            .iter()
            .map(|phi| {
                if is_inside_sdf(*phi) {
                    ColliderMarker::Collider
                } else {
                    ColliderMarker::Fluid
                }
            })
            .collect();
    }

    pub fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid3, extrapolation_depth: usize) {
        if !self.fractional.matches_shape(velocity) {
            self.update_collider(
                self.fractional.collider.clone(),
                velocity.resolution(),
                velocity.grid_spacing(),
                velocity.origin(),
            );
        }
        self.fractional
            .constrain_velocity(velocity, extrapolation_depth);
        if velocity.resolution().is_empty() || self.fractional.collider.is_none() {
            return;
        }

        let resolution = velocity.resolution();
        let marker = &self.marker;
        let collider_velocity = &self.fractional.collider_velocity_field;
        for axis in 0..3 {
            let last = resolution.axis(axis);
            let component = velocity.component_mut(axis);
            let grid = component.grid();
            component.update_with_index(|i, j, k, value| {
                let mut cell = [i, j, k];
                if cell[axis] == 0 || cell[axis] == last {
                    return value;
                }
                let upper = marker[resolution.idx(cell[0], cell[1], cell[2])];
                cell[axis] -= 1;
                let lower = marker[resolution.idx(cell[0], cell[1], cell[2])];
                if upper != lower {
                    collider_velocity.sample(grid.position(i, j, k))[axis]
                } else {
                    value
                }
            });
        }
    }

    pub fn marker(&self) -> &[ColliderMarker] {
        &self.marker
    }

    pub fn marker_at(&self, i: usize, j: usize, k: usize) -> ColliderMarker {
        self.marker[self.fractional.grid_size.idx(i, j, k)]
    }

    pub fn fractional(&self) -> &FractionalBoundaryConditionSolver3 {
        &self.fractional
    }
}

#[derive(Clone)]
pub enum GridBoundaryConditionSolver3 {
    Fractional(FractionalBoundaryConditionSolver3),
    Blocked(BlockedBoundaryConditionSolver3),
}

impl GridBoundaryConditionSolver3 {
    pub fn fractional() -> Self {
        Self::Fractional(FractionalBoundaryConditionSolver3::new())
    }

    pub fn blocked() -> Self {
        Self::Blocked(BlockedBoundaryConditionSolver3::new())
    }

    fn base(&self) -> &FractionalBoundaryConditionSolver3 {
        match self {
            Self::Fractional(solver) => solver,
            Self::Blocked(solver) => &solver.fractional,
        }
    }

    pub fn update_collider(
        &mut self,
        collider: Option<Arc<dyn Collider3>>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    ) {
        match self {
            Self::Fractional(solver) => {
                solver.update_collider(collider, grid_size, grid_spacing, grid_origin)
            }
            Self::Blocked(solver) => {
                solver.update_collider(collider, grid_size, grid_spacing, grid_origin)
            }
        }
    }

    pub fn constrain_velocity(&mut self, velocity: &mut FaceCenteredGrid3, extrapolation_depth: usize) {
        match self {
            Self::Fractional(solver) => solver.constrain_velocity(velocity, extrapolation_depth),
            Self::Blocked(solver) => solver.constrain_velocity(velocity, extrapolation_depth),
        }
    }

    pub fn collider(&self) -> Option<&Arc<dyn Collider3>> {
        self.base().collider()
    }

    pub fn collider_sdf(&self) -> &ScalarGrid3 {
        self.base().collider_sdf()
    }

    pub fn collider_velocity_field(&self) -> &ColliderVelocityField3 {
        self.base().collider_velocity_field()
    }

    pub fn closed_domain_boundary_flag(&self) -> DomainFaces {
        self.base().closed_domain_boundary_flag()
    }

    pub fn set_closed_domain_boundary_flag(&mut self, flag: DomainFaces) {
        match self {
            Self::Fractional(solver) => solver.set_closed_domain_boundary_flag(flag),
            Self::Blocked(solver) => solver.fractional.set_closed_domain_boundary_flag(flag),
        }
    }

    pub fn grid_size(&self) -> Size3 {
        self.base().grid_size()
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.base().grid_spacing()
    }

    pub fn grid_origin(&self) -> DVec3 {
        self.base().grid_origin()
    }
}

/// Drops the normal part of `velocity` and shrinks the tangential part by
/// Coulomb friction against the normal speed into the surface.
pub fn project_and_apply_friction(velocity: DVec3, normal: DVec3, friction_coefficient: f64) -> DVec3 {
    let mut tangential = velocity - normal * velocity.dot(normal);
    let length_sq = tangential.length_squared();
    if length_sq > 0.0 {
        let normal_speed = (-velocity.dot(normal)).max(0.0);
        tangential *= (1.0 - friction_coefficient * normal_speed / length_sq.sqrt()).max(0.0);
    }
    tangential
}

fn unit(axis: usize) -> DVec3 {
    match axis {
        0 => DVec3::X,
        1 => DVec3::Y,
        _ => DVec3::Z,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::{RigidBodyCollider3, RigidBodyMotion};
    use crate::surface::{Box3, Plane3, Sphere3};

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn cube_velocity() -> FaceCenteredGrid3 {
        FaceCenteredGrid3::new(
            Size3::new(10, 10, 10),
            DVec3::ONE,
            DVec3::splat(-5.0),
            DVec3::ONE,
        )
    }

    fn check_axis(velocity: &FaceCenteredGrid3, axis: usize, lower: f64, upper: f64) {
        let component = velocity.component(axis);
        let size = component.size();
        for index in 0..size.len() {
            let (i, j, k) = size.coord(index);
            let c = [i, j, k][axis];
            let expected = if c == 0 {
                lower
            } else if c == 10 {
                upper
            } else {
                1.0
            };
            assert_eq!(component.data()[index], expected, "axis {axis} at {:?}", (i, j, k));
        }
    }

    #[test]
    fn domain_faces_combine() {
        let flag = DomainFaces::LEFT | DomainFaces::UP | DomainFaces::FRONT;
        assert!(flag.contains(DomainFaces::UP));
        assert!(!flag.contains(DomainFaces::RIGHT));
        assert_eq!(flag.bits(), 1 | 8 | 32);
        assert_eq!(DomainFaces::from_bits_truncate(0xff), DomainFaces::ALL);
    }

    #[test]
    fn closed_domain_zeroes_every_wall() {
        let mut solver = FractionalBoundaryConditionSolver3::new();
        let mut velocity = cube_velocity();
        solver.update_collider(None, velocity.resolution(), DVec3::ONE, DVec3::splat(-5.0));
        solver.constrain_velocity(&mut velocity, 5);
        for axis in 0..3 {
            check_axis(&velocity, axis, 0.0, 0.0);
        }
    }

    #[test]
    fn partially_open_domain_only_zeroes_closed_walls() {
        let mut solver = FractionalBoundaryConditionSolver3::new();
        solver.set_closed_domain_boundary_flag(DomainFaces::LEFT | DomainFaces::UP | DomainFaces::FRONT);
        let mut velocity = cube_velocity();
        solver.constrain_velocity(&mut velocity, 5);
        check_axis(&velocity, 0, 0.0, 1.0);
        check_axis(&velocity, 1, 1.0, 0.0);
        check_axis(&velocity, 2, 1.0, 0.0);
    }

    #[test]
    fn blocked_closed_domain_zeroes_boundary_faces() {
        let mut solver = GridBoundaryConditionSolver3::blocked();
        let mut velocity = cube_velocity();
        solver.update_collider(None, velocity.resolution(), DVec3::ONE, DVec3::splat(-5.0));
        solver.constrain_velocity(&mut velocity, 5);
        for axis in 0..3 {
            check_axis(&velocity, axis, 0.0, 0.0);
        }
    }

    #[test]
    fn blocked_partially_open_domain_keeps_open_faces() {
        // sphere well outside the box, so every cell is marked fluid
        let far_away: Arc<dyn Collider3> = Arc::new(RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::new(50.0, 0.0, 0.0), 1.0)),
            RigidBodyMotion::default(),
        ));
        let mut solver = GridBoundaryConditionSolver3::blocked();
        solver.set_closed_domain_boundary_flag(DomainFaces::RIGHT | DomainFaces::DOWN | DomainFaces::BACK);
        let mut velocity = cube_velocity();
        solver.update_collider(Some(far_away), velocity.resolution(), DVec3::ONE, DVec3::splat(-5.0));
        let GridBoundaryConditionSolver3::Blocked(blocked) = &solver else {
            panic!("expected blocked solver");
        };
        assert!(blocked.marker().iter().all(|m| *m == ColliderMarker::Fluid));

        solver.constrain_velocity(&mut velocity, 5);
        check_axis(&velocity, 0, 1.0, 0.0);
        check_axis(&velocity, 1, 0.0, 1.0);
        check_axis(&velocity, 2, 0.0, 1.0);
    }

    #[test]
    fn constrain_rebuilds_cache_for_new_shape() {
        let mut solver = GridBoundaryConditionSolver3::fractional();
        let mut velocity = cube_velocity();
        solver.constrain_velocity(&mut velocity, 1);
        assert_eq!(solver.grid_size(), Size3::new(10, 10, 10));
        assert_eq!(solver.collider_sdf().size(), Size3::new(10, 10, 10));
        assert_eq!(solver.collider_sdf().get(3, 3, 3), MAX_DISTANCE);
    }

    #[test]
    fn collider_sdf_is_sampled_at_cell_centers() {
        let mut solver = FractionalBoundaryConditionSolver3::new();
        let collider: Arc<dyn Collider3> = Arc::new(RigidBodyCollider3::new(
            Box::new(Sphere3::new(DVec3::ZERO, 2.0)),
            RigidBodyMotion::default(),
        ));
        solver.update_collider(Some(collider), Size3::new(10, 10, 10), DVec3::ONE, DVec3::splat(-5.0));
        assert_close(solver.collider_sdf().get(5, 5, 5), 0.75f64.sqrt() - 2.0, 1e-12);
        assert!(solver.collider_velocity_field().sample(DVec3::ZERO).length() == 0.0);
    }

    #[test]
    fn static_floor_stops_normal_flow_but_keeps_slip() {
        let floor: Arc<dyn Collider3> = Arc::new(RigidBodyCollider3::new(
            Box::new(Plane3::new(DVec3::Y, DVec3::new(0.0, -2.0, 0.0))),
            RigidBodyMotion::default(),
        ));
        let mut solver = GridBoundaryConditionSolver3::fractional();
        solver.set_closed_domain_boundary_flag(DomainFaces::NONE);
        let mut velocity = FaceCenteredGrid3::new(
            Size3::new(8, 8, 8),
            DVec3::ONE,
            DVec3::splat(-4.0),
            DVec3::new(1.0, -1.0, 0.0),
        );
        solver.update_collider(Some(floor), velocity.resolution(), DVec3::ONE, DVec3::splat(-4.0));
        solver.constrain_velocity(&mut velocity, 3);
        // v faces deep inside the floor carry no normal velocity
        assert_close(velocity.v().get(3, 0, 3), 0.0, 1e-12);
        // tangential u inside the floor is kept
        assert_close(velocity.u().get(3, 0, 3), 1.0, 1e-12);
        // fluid faces above the floor are untouched
        assert_close(velocity.v().get(3, 6, 3), -1.0, 1e-12);
    }

    #[test]
    fn friction_damps_tangential_slip() {
        let v = project_and_apply_friction(DVec3::new(2.0, -1.0, 0.0), DVec3::Y, 1.0);
        assert_close(v.x, 1.0, 1e-12);
        assert_close(v.y, 0.0, 1e-12);
        let stuck = project_and_apply_friction(DVec3::new(0.5, -1.0, 0.0), DVec3::Y, 1.0);
        assert_eq!(stuck, DVec3::ZERO);
    }

    #[test]
    fn blocked_pass_pins_interface_faces_to_collider_velocity() {
        let wall: Arc<dyn Collider3> = Arc::new(RigidBodyCollider3::new(
            Box::new(Box3::new(DVec3::new(-10.0, -10.0, -10.0), DVec3::new(-1.0, 10.0, 10.0))),
            RigidBodyMotion {
                linear_velocity: DVec3::new(0.5, 0.0, 0.0),
                ..Default::default()
            },
        ));
        let mut solver = GridBoundaryConditionSolver3::blocked();
        solver.set_closed_domain_boundary_flag(DomainFaces::NONE);
        let mut velocity = FaceCenteredGrid3::new(
            Size3::new(8, 4, 4),
            DVec3::ONE,
            DVec3::new(-4.0, -2.0, -2.0),
            DVec3::new(2.0, 0.0, 0.0),
        );
        solver.update_collider(Some(wall), velocity.resolution(), DVec3::ONE, DVec3::new(-4.0, -2.0, -2.0));
        let GridBoundaryConditionSolver3::Blocked(blocked) = &solver else {
            panic!("expected blocked solver");
        };
        assert_eq!(blocked.marker_at(2, 1, 1), ColliderMarker::Collider);
        assert_eq!(blocked.marker_at(3, 1, 1), ColliderMarker::Fluid);

        solver.constrain_velocity(&mut velocity, 2);
        // face x = -1 separates cell 2 (solid) from cell 3 (fluid)
        assert_close(velocity.u().get(3, 1, 1), 0.5, 1e-12);
        assert_close(velocity.u().get(6, 1, 1), 2.0, 1e-12);
    }
}
