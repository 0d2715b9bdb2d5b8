use crate::boundary::GridBoundaryConditionSolver3;
use crate::diffusion::{build_markers, SampleMarker};
use crate::error::Result;
use crate::fdm::{FdmCompressedLinearSystem3, FdmLinearSystem3, FdmMatrixRow3};
use crate::field::{DataLayout, ScalarField3, ScalarGrid3, VectorField3};
use crate::grid::Size3;
use crate::level_set::{fraction_inside, fraction_inside_sdf, is_inside_sdf, EPSILON};
use crate::linear_solver::{LinearSolverConfig, LinearSystemSolver};
use crate::mac::FaceCenteredGrid3;
use crate::parallel;
use glam::DVec3;
use serde::{Deserialize, Serialize};

pub const MIN_WEIGHT: f64 = 0.01;

const MIN_THETA: f64 = 0.01;

/// Matrix row of one cell before it is written into either system layout.
/// Off-diagonals are ordered `+x, -x, +y, -y, +z, -z`.
#[derive(Clone, Copy, Debug, Default)]
struct CellStencil {
    center: f64,
    neighbors: [f64; 6],
    rhs: f64,
}

impl CellStencil {
    fn identity() -> Self {
        Self {
            center: 1.0,
            ..Default::default()
        }
    }
}

fn neighbor_index(resolution: Size3, index: usize, slot: usize) -> usize {
    let stride_y = resolution.x;
    let stride_z = resolution.x * resolution.y;
    match slot {
        0 => index + 1,
        1 => index - 1,
        2 => index + stride_y,
        3 => index - stride_y,
        4 => index + stride_z,
        _ => index - stride_z,
    }
}

fn at(grid: &ScalarGrid3, c: [usize; 3]) -> f64 {
    grid.get(c[0], c[1], c[2])
}

#[derive(Clone, Debug, Default)]
struct PressureSystem {
    system: FdmLinearSystem3,
    compressed: FdmCompressedLinearSystem3,
    cell_to_row: Vec<Option<usize>>,
    solver: LinearSystemSolver,
}

impl PressureSystem {
    fn new(config: LinearSolverConfig) -> Self {
        Self {
            solver: LinearSystemSolver::new(config),
            ..Default::default()
        }
    }

    fn solve(
        &mut self,
        resolution: Size3,
        stencils: &[CellStencil],
        unknown: &[bool],
        use_compressed: bool,
        pressure: &mut [f64],
    ) -> Result<()> {
        if use_compressed {
            return self.solve_compressed(resolution, stencils, unknown, pressure);
        }
        self.system.resize(resolution);
        for ((row, rhs), stencil) in self
            .system
            .a
            .rows_mut()
            .iter_mut()
            .zip(self.system.b.iter_mut())
            .zip(stencils)
        {
            *row = FdmMatrixRow3 {
                center: stencil.center,
                right: stencil.neighbors[0],
                up: stencil.neighbors[2],
                front: stencil.neighbors[4],
            };
            *rhs = stencil.rhs;
        }
        self.solver.solve(&mut self.system)?;
        pressure.copy_from_slice(&self.system.x);
        Ok(())
    }

    fn solve_compressed(
        &mut self,
        resolution: Size3,
        stencils: &[CellStencil],
        unknown: &[bool],
        pressure: &mut [f64],
    ) -> Result<()> {
        self.cell_to_row.clear();
        let mut rows = 0;
        for &is_unknown in unknown {
            if is_unknown {
                self.cell_to_row.push(Some(rows));
                rows += 1;
            } else {
                self.cell_to_row.push(None);
            }
        }

        let system = &mut self.compressed;
        system.clear();
        system.a.clear(rows);
        let mut entries = Vec::with_capacity(7);
        for (index, stencil) in stencils.iter().enumerate() {
            let Some(row) = self.cell_to_row[index] else {
                continue;
            };
            entries.clear();
            entries.push((row, stencil.center));
            for (slot, coefficient) in stencil.neighbors.iter().enumerate() {
                if *coefficient == 0.0 {
                    continue;
                }
                if let Some(col) = self.cell_to_row[neighbor_index(resolution, index, slot)] {
                    entries.push((col, *coefficient));
                }
            }
            system.a.add_row(&entries);
            system.b.push(stencil.rhs);
        }
        system.x = vec![0.0; rows];
        log::trace!("compressed pressure system: {} rows, {} non-zeros", rows, system.a.nnz());
        self.solver.solve_compressed(system)?;

        let cell_to_row = &self.cell_to_row;
        let x = &system.x;
        parallel::for_each_indexed(pressure, |index, value| {
            *value = cell_to_row[index].map_or(0.0, |row| x[row]);
        });
        Ok(())
    }
}

/// Pressure projection with sub-cell collider geometry: each face is
/// weighted by the fraction of it open to fluid, and the free surface is
/// placed with ghost-fluid fractions along each cell link.
#[derive(Clone, Debug)]
pub struct FractionalSinglePhasePressureSolver3 {
    weights: [ScalarGrid3; 3],
    boundary_velocity: [ScalarGrid3; 3],
    fluid_sdf: ScalarGrid3,
    pressure: ScalarGrid3,
    system: PressureSystem,
}

impl Default for FractionalSinglePhasePressureSolver3 {
    fn default() -> Self {
        Self::new(LinearSolverConfig::default())
    }
}

impl FractionalSinglePhasePressureSolver3 {
    pub fn new(linear_solver: LinearSolverConfig) -> Self {
        let empty = || ScalarGrid3::cell_centered(Size3::default(), DVec3::ONE, DVec3::ZERO, 0.0);
        Self {
            weights: [empty(), empty(), empty()],
            boundary_velocity: [empty(), empty(), empty()],
            fluid_sdf: empty(),
            pressure: empty(),
            system: PressureSystem::new(linear_solver),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        input: &FaceCenteredGrid3,
        _time_interval: f64,
        output: &mut FaceCenteredGrid3,
        collider_sdf: &dyn ScalarField3,
        collider_velocity: &dyn VectorField3,
        fluid_sdf: &dyn ScalarField3,
        use_compressed: bool,
    ) -> Result<()> {
        output.clone_from(input);
        let resolution = input.resolution();
        if resolution.is_empty() {
            return Ok(());
        }
        self.build_weights(input, collider_sdf, collider_velocity, fluid_sdf);

        let stencils = parallel::collect_indexed(resolution.len(), |index| {
            let (i, j, k) = resolution.coord(index);
            self.stencil(input, [i, j, k])
        });
        let unknown: Vec<bool> = self.fluid_sdf.data().iter().map(|phi| is_inside_sdf(*phi)).collect();
        self.system.solve(
            resolution,
            &stencils,
            &unknown,
            use_compressed,
            self.pressure.data_mut(),
        )?;
        self.apply_pressure_gradient(output);
        Ok(())
    }

    fn build_weights(
        &mut self,
        input: &FaceCenteredGrid3,
        collider_sdf: &dyn ScalarField3,
        collider_velocity: &dyn VectorField3,
        fluid_sdf: &dyn ScalarField3,
    ) {
        let spacing = input.grid_spacing();
        for axis in 0..3 {
            let grid = input.component(axis).grid();
            let (a, b) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let da = 0.5 * spacing * DVec3::AXES[a];
            let db = 0.5 * spacing * DVec3::AXES[b];
            self.weights[axis] = ScalarGrid3::from_fn(grid, |i, j, k| {
                let pos = grid.position(i, j, k);
                let covered = fraction_inside(
                    collider_sdf.sample(pos - da - db),
                    collider_sdf.sample(pos + da - db),
                    collider_sdf.sample(pos - da + db),
                    collider_sdf.sample(pos + da + db),
                );
                let weight = (1.0 - covered).clamp(0.0, 1.0);
                if weight > 0.0 && weight < MIN_WEIGHT {
                    MIN_WEIGHT
                } else {
                    weight
                }
            });
            self.boundary_velocity[axis] = ScalarGrid3::from_fn(grid, |i, j, k| {
                collider_velocity.sample(grid.position(i, j, k))[axis]
            });
        }

        let cells = DataLayout::CellCentered.data_grid(input.resolution(), spacing, input.origin());
        self.fluid_sdf = ScalarGrid3::from_fn(cells, |i, j, k| fluid_sdf.sample(cells.position(i, j, k)));
        if self.pressure.grid() != cells {
            self.pressure = ScalarGrid3::new(cells, 0.0);
        }
    }

    fn stencil(&self, input: &FaceCenteredGrid3, cell: [usize; 3]) -> CellStencil {
        let center_phi = at(&self.fluid_sdf, cell);
        if !is_inside_sdf(center_phi) {
            return CellStencil::identity();
        }
        let resolution = input.resolution();
        let inv_h = 1.0 / input.grid_spacing();
        let inv_h2 = inv_h * inv_h;
        let mut stencil = CellStencil::default();

        for axis in 0..3 {
            let weights = &self.weights[axis];
            let boundary = &self.boundary_velocity[axis];
            let velocity = input.component(axis);
            let mut upper = cell;
            upper[axis] += 1;
            let w_upper = at(weights, upper);
            let w_lower = at(weights, cell);

            if upper[axis] < resolution.axis(axis) {
                let term = w_upper * inv_h2[axis];
                let phi = at(&self.fluid_sdf, upper);
                if is_inside_sdf(phi) {
                    stencil.center += term;
                    stencil.neighbors[2 * axis] = -term;
                } else {
                    stencil.center += term / fraction_inside_sdf(center_phi, phi).max(MIN_THETA);
                }
                stencil.rhs += w_upper * at(velocity, upper) * inv_h[axis];
            } else {
                stencil.rhs += at(velocity, upper) * inv_h[axis];
            }

            if cell[axis] > 0 {
                let mut lower = cell;
                lower[axis] -= 1;
                let term = w_lower * inv_h2[axis];
                let phi = at(&self.fluid_sdf, lower);
                if is_inside_sdf(phi) {
                    stencil.center += term;
                    stencil.neighbors[2 * axis + 1] = -term;
                } else {
                    stencil.center += term / fraction_inside_sdf(center_phi, phi).max(MIN_THETA);
                }
                stencil.rhs -= w_lower * at(velocity, cell) * inv_h[axis];
            } else {
                stencil.rhs -= at(velocity, cell) * inv_h[axis];
            }

            stencil.rhs += ((1.0 - w_upper) * at(boundary, upper) - (1.0 - w_lower) * at(boundary, cell))
                * inv_h[axis];
        }

        // fully covered by the collider
        if stencil.center < EPSILON {
            return CellStencil::identity();
        }
        stencil
    }

    fn apply_pressure_gradient(&self, output: &mut FaceCenteredGrid3) {
        let resolution = output.resolution();
        let spacing = output.grid_spacing();
        let pressure = &self.pressure;
        let fluid = &self.fluid_sdf;
        for axis in 0..3 {
            let weights = &self.weights[axis];
            let inv_h = 1.0 / spacing[axis];
            let last = resolution.axis(axis);
            output.component_mut(axis).update_with_index(|i, j, k, value| {
                let upper = [i, j, k];
                if upper[axis] == 0 || upper[axis] == last || weights.get(i, j, k) <= 0.0 {
                    return value;
                }
                let mut lower = upper;
                lower[axis] -= 1;
                let phi_lower = at(fluid, lower);
                let phi_upper = at(fluid, upper);
                if !is_inside_sdf(phi_lower) && !is_inside_sdf(phi_upper) {
                    return value;
                }
                let theta = fraction_inside_sdf(phi_lower, phi_upper).max(MIN_THETA);
                value + inv_h / theta * (at(pressure, upper) - at(pressure, lower))
            });
        }
    }

    pub fn pressure(&self) -> &ScalarGrid3 {
        &self.pressure
    }

    pub fn fluid_sdf(&self) -> &ScalarGrid3 {
        &self.fluid_sdf
    }

    pub fn weights(&self, axis: usize) -> &ScalarGrid3 {
        &self.weights[axis]
    }

    pub fn linear_system_solver(&self) -> &LinearSystemSolver {
        &self.system.solver
    }
}

/// Pressure projection on whole cells: every cell is fluid, air or solid,
/// with Neumann walls at solid cells and zero pressure in air.
#[derive(Clone, Debug)]
pub struct SinglePhasePressureSolver3 {
    markers: Vec<SampleMarker>,
    pressure: ScalarGrid3,
    system: PressureSystem,
}

impl Default for SinglePhasePressureSolver3 {
    fn default() -> Self {
        Self::new(LinearSolverConfig::default())
    }
}

impl SinglePhasePressureSolver3 {
    pub fn new(linear_solver: LinearSolverConfig) -> Self {
        Self {
            markers: Vec::new(),
            pressure: ScalarGrid3::cell_centered(Size3::default(), DVec3::ONE, DVec3::ZERO, 0.0),
            system: PressureSystem::new(linear_solver),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        input: &FaceCenteredGrid3,
        _time_interval: f64,
        output: &mut FaceCenteredGrid3,
        collider_sdf: &dyn ScalarField3,
        collider_velocity: &dyn VectorField3,
        fluid_sdf: &dyn ScalarField3,
        use_compressed: bool,
    ) -> Result<()> {
        output.clone_from(input);
        let resolution = input.resolution();
        if resolution.is_empty() {
            return Ok(());
        }
        let cells = DataLayout::CellCentered.data_grid(resolution, input.grid_spacing(), input.origin());
        if self.pressure.grid() != cells {
            self.pressure = ScalarGrid3::new(cells, 0.0);
        }
        self.markers = build_markers(&self.pressure, collider_sdf, fluid_sdf);

        let stencils = parallel::collect_indexed(resolution.len(), |index| {
            self.stencil(input, index)
        });
        let unknown: Vec<bool> = self
            .markers
            .iter()
            .map(|marker| *marker == SampleMarker::Fluid)
            .collect();
        self.system.solve(
            resolution,
            &stencils,
            &unknown,
            use_compressed,
            self.pressure.data_mut(),
        )?;
        self.apply_pressure_gradient(output, collider_velocity);
        Ok(())
    }

    fn stencil(&self, input: &FaceCenteredGrid3, index: usize) -> CellStencil {
        if self.markers[index] != SampleMarker::Fluid {
            return CellStencil::identity();
        }
        let resolution = input.resolution();
        let (i, j, k) = resolution.coord(index);
        let cell = [i, j, k];
        let inv_h = 1.0 / input.grid_spacing();
        let inv_h2 = inv_h * inv_h;
        let mut stencil = CellStencil {
            rhs: input.divergence_at_cell_center(i, j, k),
            ..Default::default()
        };
        for axis in 0..3 {
            let has_upper = cell[axis] + 1 < resolution.axis(axis);
            let has_lower = cell[axis] > 0;
            for (slot, inside) in [(2 * axis, has_upper), (2 * axis + 1, has_lower)] {
                if !inside {
                    continue;
                }
                let marker = self.markers[neighbor_index(resolution, index, slot)];
                if marker == SampleMarker::Boundary {
                    continue;
                }
                stencil.center += inv_h2[axis];
                if marker == SampleMarker::Fluid {
                    stencil.neighbors[slot] = -inv_h2[axis];
                }
            }
        }
        if stencil.center < EPSILON {
            return CellStencil::identity();
        }
        stencil
    }

    fn apply_pressure_gradient(&self, output: &mut FaceCenteredGrid3, collider_velocity: &dyn VectorField3) {
        let resolution = output.resolution();
        let spacing = output.grid_spacing();
        let pressure = &self.pressure;
        let markers = &self.markers;
        for axis in 0..3 {
            let inv_h = 1.0 / spacing[axis];
            let last = resolution.axis(axis);
            let component = output.component_mut(axis);
            let grid = component.grid();
            component.update_with_index(|i, j, k, value| {
                let upper = [i, j, k];
                if upper[axis] == 0 || upper[axis] == last {
                    return value;
                }
                let mut lower = upper;
                lower[axis] -= 1;
                let m_upper = markers[resolution.idx(upper[0], upper[1], upper[2])];
                let m_lower = markers[resolution.idx(lower[0], lower[1], lower[2])];
                if m_upper == SampleMarker::Boundary || m_lower == SampleMarker::Boundary {
                    collider_velocity.sample(grid.position(i, j, k))[axis]
                } else if m_upper == SampleMarker::Fluid || m_lower == SampleMarker::Fluid {
                    value + inv_h * (at(pressure, upper) - at(pressure, lower))
                } else {
                    value
                }
            });
        }
    }

    pub fn pressure(&self) -> &ScalarGrid3 {
        &self.pressure
    }

    pub fn linear_system_solver(&self) -> &LinearSystemSolver {
        &self.system.solver
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureSolverKind {
    #[default]
    FractionalSinglePhase,
    SinglePhase,
}

impl PressureSolverKind {
    pub fn build(self, linear_solver: LinearSolverConfig) -> GridPressureSolver3 {
        match self {
            Self::FractionalSinglePhase => GridPressureSolver3::FractionalSinglePhase(
                FractionalSinglePhasePressureSolver3::new(linear_solver),
            ),
            Self::SinglePhase => {
                GridPressureSolver3::SinglePhase(SinglePhasePressureSolver3::new(linear_solver))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum GridPressureSolver3 {
    FractionalSinglePhase(FractionalSinglePhasePressureSolver3),
    SinglePhase(SinglePhasePressureSolver3),
}

impl GridPressureSolver3 {
    pub fn fractional_single_phase() -> Self {
        Self::FractionalSinglePhase(FractionalSinglePhasePressureSolver3::default())
    }

    pub fn single_phase() -> Self {
        Self::SinglePhase(SinglePhasePressureSolver3::default())
    }

    pub fn kind(&self) -> PressureSolverKind {
        match self {
            Self::FractionalSinglePhase(_) => PressureSolverKind::FractionalSinglePhase,
            Self::SinglePhase(_) => PressureSolverKind::SinglePhase,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn solve(
        &mut self,
        input: &FaceCenteredGrid3,
        time_interval: f64,
        output: &mut FaceCenteredGrid3,
        collider_sdf: &dyn ScalarField3,
        collider_velocity: &dyn VectorField3,
        fluid_sdf: &dyn ScalarField3,
        use_compressed: bool,
    ) -> Result<()> {
        match self {
            Self::FractionalSinglePhase(solver) => solver.solve(
                input,
                time_interval,
                output,
                collider_sdf,
                collider_velocity,
                fluid_sdf,
                use_compressed,
            ),
            Self::SinglePhase(solver) => solver.solve(
                input,
                time_interval,
                output,
                collider_sdf,
                collider_velocity,
                fluid_sdf,
                use_compressed,
            ),
        }
    }

    pub fn suggested_boundary_condition_solver(&self) -> GridBoundaryConditionSolver3 {
        match self {
            Self::FractionalSinglePhase(_) => GridBoundaryConditionSolver3::fractional(),
            Self::SinglePhase(_) => GridBoundaryConditionSolver3::blocked(),
        }
    }

    pub fn pressure(&self) -> &ScalarGrid3 {
        match self {
            Self::FractionalSinglePhase(solver) => solver.pressure(),
            Self::SinglePhase(solver) => solver.pressure(),
        }
    }

    pub fn linear_system_solver(&self) -> &LinearSystemSolver {
        match self {
            Self::FractionalSinglePhase(solver) => solver.linear_system_solver(),
            Self::SinglePhase(solver) => solver.linear_system_solver(),
        }
    }
}
