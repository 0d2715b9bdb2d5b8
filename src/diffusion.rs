use crate::error::{ensure_same_grid, Result};
use crate::fdm::FdmLinearSystem3;
use crate::field::{ScalarField3, ScalarGrid3};
use crate::linear_solver::{LinearSolverConfig, LinearSystemSolver};
use crate::mac::FaceCenteredGrid3;
use crate::parallel;
use crate::vec_field::CollocatedVectorGrid3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SampleMarker {
    Fluid,
    Air,
    Boundary,
}

pub(crate) fn build_markers(
    grid: &ScalarGrid3,
    boundary_sdf: &dyn ScalarField3,
    fluid_sdf: &dyn ScalarField3,
) -> Vec<SampleMarker> {
    let size = grid.size();
    parallel::collect_indexed(size.len(), |index| {
        let (i, j, k) = size.coord(index);
        let pos = grid.position(i, j, k);
        if boundary_sdf.sample(pos) < 0.0 {
            SampleMarker::Boundary
        } else if fluid_sdf.sample(pos) < 0.0 {
            SampleMarker::Fluid
        } else {
            SampleMarker::Air
        }
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffusionBoundaryType {
    #[default]
    Neumann,
    Dirichlet,
}

/// Explicit diffusion. Stable only while `mu * dt / h^2` stays below about
/// 1/6, which the caller has to guarantee through sub-stepping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardEulerDiffusionSolver3;

impl ForwardEulerDiffusionSolver3 {
    fn solve_component(
        &self,
        source: &ScalarGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut ScalarGrid3,
        markers: &[SampleMarker],
    ) {
        let size = source.size();
        let h = source.grid().spacing();
        let inv_h2 = 1.0 / (h * h);
        let data = source.data();
        let stride_y = size.x;
        let stride_z = size.x * size.y;
        let scale = diffusion_coefficient * time_interval;
        dest.update_with_index(|i, j, k, _| {
            let index = size.idx(i, j, k);
            let center = data[index];
            if markers[index] != SampleMarker::Fluid {
                return center;
            }
            let flux = |neighbor: usize| {
                if markers[neighbor] == SampleMarker::Fluid {
                    data[neighbor] - center
                } else {
                    0.0
                }
            };
            let mut dx = 0.0;
            let mut dy = 0.0;
            let mut dz = 0.0;
            if i > 0 {
                dx += flux(index - 1);
            }
            if i + 1 < size.x {
                dx += flux(index + 1);
            }
            if j > 0 {
                dy += flux(index - stride_y);
            }
            if j + 1 < size.y {
                dy += flux(index + stride_y);
            }
            if k > 0 {
                dz += flux(index - stride_z);
            }
            if k + 1 < size.z {
                dz += flux(index + stride_z);
            }
            center + scale * (dx * inv_h2.x + dy * inv_h2.y + dz * inv_h2.z)
        });
    }
}

/// Implicit diffusion: assembles `(I - mu dt L) f = f0` over the fluid samples
/// and hands it to the linear solver.
#[derive(Clone, Debug)]
pub struct BackwardEulerDiffusionSolver3 {
    boundary_type: DiffusionBoundaryType,
    system: FdmLinearSystem3,
    solver: LinearSystemSolver,
}

impl Default for BackwardEulerDiffusionSolver3 {
    fn default() -> Self {
        Self::new(DiffusionBoundaryType::Neumann, LinearSolverConfig::default())
    }
}

impl BackwardEulerDiffusionSolver3 {
    pub fn new(boundary_type: DiffusionBoundaryType, solver: LinearSolverConfig) -> Self {
        Self {
            boundary_type,
            system: FdmLinearSystem3::default(),
            solver: LinearSystemSolver::new(solver),
        }
    }

    pub fn boundary_type(&self) -> DiffusionBoundaryType {
        self.boundary_type
    }

    pub fn linear_system_solver(&self) -> &LinearSystemSolver {
        &self.solver
    }

    fn solve_component(
        &mut self,
        source: &ScalarGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut ScalarGrid3,
        markers: &[SampleMarker],
    ) -> Result<()> {
        let size = source.size();
        let h = source.grid().spacing();
        let c = time_interval * diffusion_coefficient / (h * h);
        let dirichlet = self.boundary_type == DiffusionBoundaryType::Dirichlet;
        let data = source.data();

        self.system.resize(size);
        let couples = |neighbor: SampleMarker| {
            neighbor == SampleMarker::Fluid || (dirichlet && neighbor != SampleMarker::Air)
        };
        let stride_y = size.x;
        let stride_z = size.x * size.y;
        parallel::for_each_indexed(self.system.a.rows_mut(), |index, row| {
            let (i, j, k) = size.coord(index);
            row.center = 1.0;
            row.right = 0.0;
            row.up = 0.0;
            row.front = 0.0;
            if markers[index] != SampleMarker::Fluid {
                return;
            }
            let neighbors = [
                (i + 1 < size.x, index + 1, c.x, 0),
                (i > 0, index.wrapping_sub(1), c.x, 3),
                (j + 1 < size.y, index + stride_y, c.y, 1),
                (j > 0, index.wrapping_sub(stride_y), c.y, 3),
                (k + 1 < size.z, index + stride_z, c.z, 2),
                (k > 0, index.wrapping_sub(stride_z), c.z, 3),
            ];
            for (inside, neighbor, coefficient, slot) in neighbors {
                if !inside {
                    continue;
                }
                let marker = markers[neighbor];
                if couples(marker) {
                    row.center += coefficient;
                }
                if marker == SampleMarker::Fluid {
                    match slot {
                        0 => row.right -= coefficient,
                        1 => row.up -= coefficient,
                        2 => row.front -= coefficient,
                        _ => {}
                    }
                }
            }
        });

        parallel::for_each_indexed(&mut self.system.x, |index, value| *value = data[index]);
        parallel::for_each_indexed(&mut self.system.b, |index, value| {
            let mut rhs = data[index];
            if dirichlet && markers[index] == SampleMarker::Fluid {
                let (i, j, k) = size.coord(index);
                let mut add = |inside: bool, neighbor: usize, coefficient: f64| {
                    if inside && markers[neighbor] == SampleMarker::Boundary {
                        rhs += coefficient * data[neighbor];
                    }
                };
                add(i + 1 < size.x, index + 1, c.x);
                add(i > 0, index.wrapping_sub(1), c.x);
                add(j + 1 < size.y, index + stride_y, c.y);
                add(j > 0, index.wrapping_sub(stride_y), c.y);
                add(k + 1 < size.z, index + stride_z, c.z);
                add(k > 0, index.wrapping_sub(stride_z), c.z);
            }
            *value = rhs;
        });

        self.solver.solve(&mut self.system)?;
        dest.data_mut().copy_from_slice(&self.system.x);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffusionSolverKind {
    ForwardEuler,
    #[default]
    BackwardEuler,
}

impl DiffusionSolverKind {
    pub fn build(self, linear_solver: LinearSolverConfig) -> GridDiffusionSolver3 {
        match self {
            Self::ForwardEuler => GridDiffusionSolver3::forward_euler(),
            Self::BackwardEuler => GridDiffusionSolver3::BackwardEuler(BackwardEulerDiffusionSolver3::new(
                DiffusionBoundaryType::Neumann,
                linear_solver,
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub enum GridDiffusionSolver3 {
    ForwardEuler(ForwardEulerDiffusionSolver3),
    BackwardEuler(BackwardEulerDiffusionSolver3),
}

impl GridDiffusionSolver3 {
    pub fn forward_euler() -> Self {
        Self::ForwardEuler(ForwardEulerDiffusionSolver3)
    }

    pub fn backward_euler() -> Self {
        Self::BackwardEuler(BackwardEulerDiffusionSolver3::default())
    }

    pub fn kind(&self) -> DiffusionSolverKind {
        match self {
            Self::ForwardEuler(_) => DiffusionSolverKind::ForwardEuler,
            Self::BackwardEuler(_) => DiffusionSolverKind::BackwardEuler,
        }
    }

    pub fn solve_scalar(
        &mut self,
        source: &ScalarGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut ScalarGrid3,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        ensure_same_grid("diffusion", source.grid(), dest.grid())?;
        let markers = build_markers(source, boundary_sdf, fluid_sdf);
        self.solve_with_markers(source, diffusion_coefficient, time_interval, dest, &markers)
    }

    pub fn solve_collocated(
        &mut self,
        source: &CollocatedVectorGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut CollocatedVectorGrid3,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        ensure_same_grid("diffusion", source.grid(), dest.grid())?;
        let markers = build_markers(source.component(0), boundary_sdf, fluid_sdf);
        for axis in 0..3 {
            self.solve_with_markers(
                source.component(axis),
                diffusion_coefficient,
                time_interval,
                dest.component_mut(axis),
                &markers,
            )?;
        }
        Ok(())
    }

    pub fn solve_face_centered(
        &mut self,
        source: &FaceCenteredGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut FaceCenteredGrid3,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        for axis in 0..3 {
            ensure_same_grid("diffusion", source.component(axis).grid(), dest.component(axis).grid())?;
        }
        for axis in 0..3 {
            let markers = build_markers(source.component(axis), boundary_sdf, fluid_sdf);
            self.solve_with_markers(
                source.component(axis),
                diffusion_coefficient,
                time_interval,
                dest.component_mut(axis),
                &markers,
            )?;
        }
        Ok(())
    }

    fn solve_with_markers(
        &mut self,
        source: &ScalarGrid3,
        diffusion_coefficient: f64,
        time_interval: f64,
        dest: &mut ScalarGrid3,
        markers: &[SampleMarker],
    ) -> Result<()> {
        let diffusion_coefficient = diffusion_coefficient.max(0.0);
        if source.data().is_empty() {
            return Ok(());
        }
        match self {
            Self::ForwardEuler(solver) => {
                solver.solve_component(source, diffusion_coefficient, time_interval, dest, markers);
                Ok(())
            }
            Self::BackwardEuler(solver) => {
                solver.solve_component(source, diffusion_coefficient, time_interval, dest, markers)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ConstantScalarField3, CustomScalarField3};
    use crate::grid::Size3;
    use crate::level_set::MAX_DISTANCE;
    use glam::DVec3;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn impulse(resolution: Size3, at: (usize, usize, usize)) -> ScalarGrid3 {
        let mut grid = ScalarGrid3::cell_centered(resolution, DVec3::ONE, DVec3::ZERO, 0.0);
        grid.set(at.0, at.1, at.2, 1.0);
        grid
    }

    fn open_space() -> (ConstantScalarField3, ConstantScalarField3) {
        (ConstantScalarField3(MAX_DISTANCE), ConstantScalarField3(-MAX_DISTANCE))
    }

    #[test]
    fn forward_euler_spreads_planar_impulse() {
        let source = impulse(Size3::new(3, 3, 1), (1, 1, 0));
        let mut dest = source.clone();
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::forward_euler();
        solver.solve_scalar(&source, 1.0 / 8.0, 1.0, &mut dest, &boundary, &fluid).unwrap();
        assert_close(dest.get(1, 1, 0), 0.5, 1e-12);
        for (i, j) in [(0, 1), (2, 1), (1, 0), (1, 2)] {
            assert_close(dest.get(i, j, 0), 0.125, 1e-12);
        }
        for (i, j) in [(0, 0), (2, 0), (0, 2), (2, 2)] {
            assert_close(dest.get(i, j, 0), 0.0, 1e-12);
        }
        assert_close(dest.sum(), 1.0, 1e-12);
    }

    #[test]
    fn forward_euler_skips_solid_and_air() {
        let source = impulse(Size3::new(3, 3, 1), (1, 1, 0));
        let mut dest = source.clone();
        let wall = CustomScalarField3(|p: DVec3| p.x - 1.0);
        let fluid = CustomScalarField3(|p: DVec3| p.y - 2.0);
        let mut solver = GridDiffusionSolver3::forward_euler();
        solver.solve_scalar(&source, 1.0 / 8.0, 1.0, &mut dest, &wall, &fluid).unwrap();
        // left column is solid, top row is air
        assert_close(dest.get(0, 1, 0), 0.0, 1e-12);
        assert_close(dest.get(1, 2, 0), 0.0, 1e-12);
        assert_close(dest.get(2, 1, 0), 0.125, 1e-12);
        assert_close(dest.get(1, 0, 0), 0.125, 1e-12);
        assert_close(dest.get(1, 1, 0), 0.75, 1e-12);
    }

    #[test]
    fn backward_euler_matches_reference_solve() {
        let source = impulse(Size3::new(3, 3, 3), (1, 1, 1));
        let mut dest = source.clone();
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::backward_euler();
        solver.solve_scalar(&source, 1.0 / 12.0, 1.0, &mut dest, &boundary, &fluid).unwrap();
        assert_close(dest.get(1, 1, 1), 0.680423, 1e-6);
        assert_close(dest.get(0, 1, 1), 0.041270, 1e-6);
        assert_close(dest.get(0, 0, 1), 0.005291, 1e-6);
        assert_close(dest.get(0, 0, 0), 0.001058, 1e-6);
        assert_close(dest.sum(), 1.0, 1e-9);
    }

    #[test]
    fn backward_euler_stays_bounded_past_explicit_limit() {
        let source = impulse(Size3::new(5, 5, 5), (2, 2, 2));
        let mut dest = source.clone();
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::backward_euler();
        solver.solve_scalar(&source, 2.0, 1.0, &mut dest, &boundary, &fluid).unwrap();
        assert!(dest.data().iter().all(|v| *v >= 0.0 && *v <= 1.0));
        assert!(dest.get(2, 2, 2) > dest.get(1, 2, 2));
        assert_close(dest.sum(), 1.0, 1e-8);
    }

    #[test]
    fn dirichlet_boundary_pulls_toward_wall_values() {
        let mut source = ScalarGrid3::cell_centered(Size3::new(3, 1, 1), DVec3::ONE, DVec3::ZERO, 0.0);
        source.set(0, 0, 0, 1.0);
        let wall = CustomScalarField3(|p: DVec3| p.x - 1.0);
        let fluid = ConstantScalarField3(-1.0);
        let mut dest = source.clone();
        let mut solver = GridDiffusionSolver3::BackwardEuler(BackwardEulerDiffusionSolver3::new(
            DiffusionBoundaryType::Dirichlet,
            LinearSolverConfig::default(),
        ));
        solver.solve_scalar(&source, 1.0, 1.0, &mut dest, &wall, &fluid).unwrap();
        assert_close(dest.get(0, 0, 0), 1.0, 1e-12);
        assert!(dest.get(1, 0, 0) > 0.0);
        assert!(dest.get(2, 0, 0) > 0.0);
    }

    #[test]
    fn face_centered_components_diffuse_independently() {
        let resolution = Size3::new(3, 3, 3);
        let source = FaceCenteredGrid3::new(resolution, DVec3::ONE, DVec3::ZERO, DVec3::new(1.0, 2.0, 3.0));
        let mut dest = source.clone();
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::backward_euler();
        solver.solve_face_centered(&source, 0.5, 1.0, &mut dest, &boundary, &fluid).unwrap();
        assert_close(dest.u().get(2, 1, 1), 1.0, 1e-10);
        assert_close(dest.v().get(1, 3, 1), 2.0, 1e-10);
        assert_close(dest.w().get(0, 0, 3), 3.0, 1e-10);
    }

    #[test]
    fn negative_coefficient_copies_source() {
        let source = impulse(Size3::new(3, 3, 1), (1, 1, 0));
        let mut dest = ScalarGrid3::new(source.grid(), 7.0);
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::forward_euler();
        solver.solve_scalar(&source, -1.0, 1.0, &mut dest, &boundary, &fluid).unwrap();
        assert_eq!(dest, source);
    }

    #[test]
    fn mismatched_destination_is_rejected() {
        let source = impulse(Size3::new(3, 3, 1), (1, 1, 0));
        let mut dest = ScalarGrid3::cell_centered(Size3::new(2, 3, 1), DVec3::ONE, DVec3::ZERO, 7.0);
        let (boundary, fluid) = open_space();
        let mut solver = GridDiffusionSolver3::backward_euler();
        let result = solver.solve_scalar(&source, 1.0, 1.0, &mut dest, &boundary, &fluid);
        assert!(matches!(result, Err(crate::error::SimError::GridMismatch { .. })));
        assert!(dest.data().iter().all(|v| *v == 7.0));
    }
}
