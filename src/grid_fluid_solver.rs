use crate::advection::AdvectionSolver3;
use crate::animation::{AnimationClock, PhysicsAnimation};
use crate::boundary::{DomainFaces, GridBoundaryConditionSolver3};
use crate::collider::{Collider3, ColliderVelocityField3};
use crate::diffusion::{DiffusionSolverKind, GridDiffusionSolver3};
use crate::error::{validate_grid_spacing, Result, SimError};
use crate::field::{ConstantScalarField3, DataLayout, ScalarField3, ScalarGrid3};
use crate::grid::Size3;
use crate::grid_system::{GridSystemData3, VectorGrid3};
use crate::level_set::{
    extrapolate_in_place, is_inside_sdf, reinitialize, smeared_heaviside, EPSILON, MAX_DISTANCE,
};
use crate::linear_solver::LinearSolverConfig;
use crate::mac::FaceCenteredGrid3;
use crate::parallel;
use crate::pressure::{GridPressureSolver3, PressureSolverKind};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridFluidSolverConfig {
    pub resolution: Size3,
    pub grid_spacing: DVec3,
    pub grid_origin: DVec3,
    pub gravity: DVec3,
    pub viscosity_coefficient: f64,
    pub max_cfl: f64,
    pub use_compressed_linear_system: bool,
    pub closed_domain_boundary_flag: DomainFaces,
    pub use_fixed_sub_time_steps: bool,
    pub number_of_fixed_sub_time_steps: usize,
    pub linear_solver: LinearSolverConfig,
    pub advection: Option<AdvectionSolver3>,
    pub diffusion: Option<DiffusionSolverKind>,
    pub pressure: Option<PressureSolverKind>,
}

impl Default for GridFluidSolverConfig {
    fn default() -> Self {
        Self {
            resolution: Size3::new(1, 1, 1),
            grid_spacing: DVec3::ONE,
            grid_origin: DVec3::ZERO,
            gravity: DVec3::new(0.0, -9.8, 0.0),
            viscosity_coefficient: 0.0,
            max_cfl: 5.0,
            use_compressed_linear_system: false,
            closed_domain_boundary_flag: DomainFaces::ALL,
            use_fixed_sub_time_steps: false,
            number_of_fixed_sub_time_steps: 1,
            linear_solver: LinearSolverConfig::default(),
            advection: Some(AdvectionSolver3::SemiLagrangian),
            diffusion: Some(DiffusionSolverKind::BackwardEuler),
            pressure: Some(PressureSolverKind::FractionalSinglePhase),
        }
    }
}

impl GridFluidSolverConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

const REDISTANCE_ITERATIONS: usize = 10;

static ALL_LIQUID: ConstantScalarField3 = ConstantScalarField3(-MAX_DISTANCE);

/// Where the liquid is. Negative signed distance is liquid; cells outside
/// it are air and hold zero pressure.
#[derive(Default)]
pub enum FluidSdf {
    /// The whole domain is liquid.
    #[default]
    Everywhere,
    Field(Box<dyn ScalarField3 + Send>),
    /// Index of an advectable scalar layer holding a level set. It moves
    /// with the flow and is redistanced after every advection.
    LevelSet(usize),
}

impl fmt::Debug for FluidSdf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Everywhere => f.write_str("Everywhere"),
            Self::Field(_) => f.write_str("Field(..)"),
            Self::LevelSet(index) => f.debug_tuple("LevelSet").field(index).finish(),
        }
    }
}

fn liquid_field<'a>(fluid_sdf: &'a FluidSdf, level_set: Option<&'a ScalarGrid3>) -> &'a dyn ScalarField3 {
    match (fluid_sdf, level_set) {
        (FluidSdf::Field(field), _) => field.as_ref(),
        (FluidSdf::LevelSet(_), Some(grid)) => grid,
        _ => &ALL_LIQUID,
    }
}

/// Source of fluid state, run at the start of every sub-step.
pub trait GridEmitter3: Send {
    fn update(&mut self, grids: &mut GridSystemData3, current_time: f64, time_interval: f64);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SolverStage {
    BeginStep,
    ExternalForces,
    Viscosity,
    Pressure,
    Advection,
    EndStep,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StageReport {
    pub stage: SolverStage,
    pub time_interval: f64,
    pub elapsed: Duration,
}

pub type StageCallback = Box<dyn FnMut(&StageReport) + Send>;

/// Single-phase grid fluid on a MAC velocity field. Each sub-step adds
/// gravity, diffuses, projects and advects, re-applying the boundary
/// constraint after every stage.
pub struct GridFluidSolver3 {
    clock: AnimationClock,
    grids: GridSystemData3,
    gravity: DVec3,
    viscosity_coefficient: f64,
    max_cfl: f64,
    use_compressed_linear_system: bool,
    collider: Option<Arc<dyn Collider3>>,
    emitter: Option<Box<dyn GridEmitter3>>,
    fluid_sdf: FluidSdf,
    advection_solver: Option<AdvectionSolver3>,
    diffusion_solver: Option<GridDiffusionSolver3>,
    pressure_solver: Option<GridPressureSolver3>,
    boundary_condition_solver: GridBoundaryConditionSolver3,
    stage_callback: Option<StageCallback>,
}

impl GridFluidSolver3 {
    pub fn new(config: GridFluidSolverConfig) -> Result<Self> {
        validate_grid_spacing(config.grid_spacing)?;
        let pressure_solver = config.pressure.map(|kind| kind.build(config.linear_solver));
        let mut boundary_condition_solver = pressure_solver
            .as_ref()
            .map_or_else(GridBoundaryConditionSolver3::fractional, |solver| {
                solver.suggested_boundary_condition_solver()
            });
        boundary_condition_solver.set_closed_domain_boundary_flag(config.closed_domain_boundary_flag);

        let mut clock = AnimationClock::default();
        clock.set_is_using_fixed_sub_time_steps(config.use_fixed_sub_time_steps);
        clock.set_number_of_fixed_sub_time_steps(config.number_of_fixed_sub_time_steps);

        log::info!(
            "grid fluid solver {}x{}x{} spacing {:?}",
            config.resolution.x,
            config.resolution.y,
            config.resolution.z,
            config.grid_spacing
        );
        let mut solver = Self {
            clock,
            grids: GridSystemData3::new(config.resolution, config.grid_spacing, config.grid_origin),
            gravity: config.gravity,
            viscosity_coefficient: config.viscosity_coefficient.max(0.0),
            max_cfl: config.max_cfl.max(EPSILON),
            use_compressed_linear_system: config.use_compressed_linear_system,
            collider: None,
            emitter: None,
            fluid_sdf: FluidSdf::Everywhere,
            advection_solver: config.advection,
            diffusion_solver: config.diffusion.map(|kind| kind.build(config.linear_solver)),
            pressure_solver,
            boundary_condition_solver,
            stage_callback: None,
        };
        solver.update_boundary_cache();
        Ok(solver)
    }

    pub fn grid_system_data(&self) -> &GridSystemData3 {
        &self.grids
    }

    pub fn grid_system_data_mut(&mut self) -> &mut GridSystemData3 {
        &mut self.grids
    }

    pub fn velocity(&self) -> &FaceCenteredGrid3 {
        self.grids.velocity()
    }

    pub fn resolution(&self) -> Size3 {
        self.grids.resolution()
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.grids.grid_spacing()
    }

    pub fn grid_origin(&self) -> DVec3 {
        self.grids.origin()
    }

    pub fn resize_grid(&mut self, resolution: Size3, grid_spacing: DVec3, origin: DVec3) -> Result<()> {
        validate_grid_spacing(grid_spacing)?;
        self.grids.resize(resolution, grid_spacing, origin);
        self.update_boundary_cache();
        Ok(())
    }

    pub fn gravity(&self) -> DVec3 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: DVec3) {
        self.gravity = gravity;
    }

    pub fn viscosity_coefficient(&self) -> f64 {
        self.viscosity_coefficient
    }

    pub fn set_viscosity_coefficient(&mut self, viscosity_coefficient: f64) {
        self.viscosity_coefficient = viscosity_coefficient.max(0.0);
    }

    pub fn max_cfl(&self) -> f64 {
        self.max_cfl
    }

    pub fn set_max_cfl(&mut self, max_cfl: f64) {
        self.max_cfl = max_cfl.max(EPSILON);
    }

    pub fn use_compressed_linear_system(&self) -> bool {
        self.use_compressed_linear_system
    }

    pub fn set_use_compressed_linear_system(&mut self, compressed: bool) {
        self.use_compressed_linear_system = compressed;
    }

    pub fn closed_domain_boundary_flag(&self) -> DomainFaces {
        self.boundary_condition_solver.closed_domain_boundary_flag()
    }

    pub fn set_closed_domain_boundary_flag(&mut self, flag: DomainFaces) {
        self.boundary_condition_solver.set_closed_domain_boundary_flag(flag);
    }

    pub fn collider(&self) -> Option<&Arc<dyn Collider3>> {
        self.collider.as_ref()
    }

    pub fn set_collider(&mut self, collider: Option<Arc<dyn Collider3>>) {
        self.collider = collider;
        self.update_boundary_cache();
    }

    pub fn set_emitter(&mut self, emitter: Option<Box<dyn GridEmitter3>>) {
        self.emitter = emitter;
    }

    pub fn advection_solver(&self) -> Option<AdvectionSolver3> {
        self.advection_solver
    }

    pub fn set_advection_solver(&mut self, solver: Option<AdvectionSolver3>) {
        self.advection_solver = solver;
    }

    pub fn diffusion_solver(&self) -> Option<&GridDiffusionSolver3> {
        self.diffusion_solver.as_ref()
    }

    pub fn set_diffusion_solver(&mut self, solver: Option<GridDiffusionSolver3>) {
        self.diffusion_solver = solver;
    }

    pub fn pressure_solver(&self) -> Option<&GridPressureSolver3> {
        self.pressure_solver.as_ref()
    }

    /// Also swaps the boundary solver for the one the pressure solver
    /// expects, keeping the closed-domain flag.
    pub fn set_pressure_solver(&mut self, solver: Option<GridPressureSolver3>) {
        if let Some(pressure) = &solver {
            let flag = self.closed_domain_boundary_flag();
            self.boundary_condition_solver = pressure.suggested_boundary_condition_solver();
            self.boundary_condition_solver.set_closed_domain_boundary_flag(flag);
            self.update_boundary_cache();
        }
        self.pressure_solver = solver;
    }

    pub fn boundary_condition_solver(&self) -> &GridBoundaryConditionSolver3 {
        &self.boundary_condition_solver
    }

    pub fn collider_sdf(&self) -> &ScalarGrid3 {
        self.boundary_condition_solver.collider_sdf()
    }

    pub fn collider_velocity_field(&self) -> &ColliderVelocityField3 {
        self.boundary_condition_solver.collider_velocity_field()
    }

    pub fn fluid_sdf(&self) -> &dyn ScalarField3 {
        match &self.fluid_sdf {
            FluidSdf::Everywhere => &ALL_LIQUID,
            FluidSdf::Field(field) => field.as_ref(),
            FluidSdf::LevelSet(index) => self.grids.advectable_scalar_data_at(*index),
        }
    }

    pub fn set_fluid_sdf(&mut self, fluid_sdf: FluidSdf) -> Result<()> {
        if let FluidSdf::LevelSet(index) = fluid_sdf {
            if index >= self.grids.number_of_advectable_scalar_data() {
                return Err(SimError::UnknownLayer { index });
            }
        }
        self.fluid_sdf = fluid_sdf;
        Ok(())
    }

    /// Adds a cell-centred advectable layer sampled from `initial` and
    /// makes it the liquid level set. Returns the layer index.
    pub fn add_liquid_level_set(&mut self, initial: &dyn ScalarField3) -> usize {
        let bounds = self.grids.bounding_box();
        let far = (bounds.upper - bounds.lower).length().max(1.0);
        let index = self
            .grids
            .add_advectable_scalar_data(DataLayout::CellCentered, far);
        let mut layer = self.grids.advectable_scalar_data_at_mut(index);
        let grid = layer.grid();
        layer.fill_with_index(|i, j, k| initial.sample(grid.position(i, j, k)));
        self.fluid_sdf = FluidSdf::LevelSet(index);
        index
    }

    /// Liquid volume with the interface smeared over one cell.
    pub fn liquid_volume(&self) -> f64 {
        let spacing = self.grids.grid_spacing();
        let cells = DataLayout::CellCentered.data_grid(self.grids.resolution(), spacing, self.grids.origin());
        let band = spacing.min_element();
        let fluid_sdf = self.fluid_sdf();
        let shares = parallel::collect_indexed(cells.len(), |index| {
            let (i, j, k) = cells.coord(index);
            smeared_heaviside(fluid_sdf.sample(cells.position(i, j, k)), band)
        });
        shares.iter().sum::<f64>() * spacing.x * spacing.y * spacing.z
    }

    pub fn set_stage_callback(&mut self, callback: Option<StageCallback>) {
        self.stage_callback = callback;
    }

    /// Largest cell-centre speed after one step of gravity, in cells per
    /// `time_interval`. NaN when any velocity sample is NaN.
    pub fn cfl(&self, time_interval: f64) -> f64 {
        let velocity = self.grids.velocity();
        let resolution = velocity.resolution();
        if resolution.is_empty() {
            return 0.0;
        }
        let gravity = self.gravity;
        let speeds = parallel::collect_indexed(resolution.len(), |index| {
            let (i, j, k) = resolution.coord(index);
            let value = velocity.value_at_cell_center(i, j, k) + time_interval * gravity;
            if value.is_nan() {
                f64::NAN
            } else {
                value.abs().max_element()
            }
        });
        if speeds.iter().any(|speed| speed.is_nan()) {
            return f64::NAN;
        }
        let max_speed = speeds.into_iter().fold(0.0, f64::max);
        max_speed * time_interval / self.grids.grid_spacing().min_element()
    }

    fn extrapolation_depth(&self) -> usize {
        self.max_cfl.ceil() as usize
    }

    fn has_free_surface(&self) -> bool {
        !matches!(self.fluid_sdf, FluidSdf::Everywhere)
    }

    fn level_set_snapshot(&self) -> Option<ScalarGrid3> {
        match self.fluid_sdf {
            FluidSdf::LevelSet(index) => Some(self.grids.advectable_scalar_data_at(index).clone()),
            _ => None,
        }
    }

    fn update_boundary_cache(&mut self) {
        self.boundary_condition_solver.update_collider(
            self.collider.clone(),
            self.grids.resolution(),
            self.grids.grid_spacing(),
            self.grids.origin(),
        );
    }

    fn apply_boundary_condition(&mut self) {
        let depth = self.extrapolation_depth();
        self.boundary_condition_solver
            .constrain_velocity(self.grids.velocity_mut().into_inner(), depth);
    }

    fn run_stage(
        &mut self,
        stage: SolverStage,
        time_interval: f64,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let start = Instant::now();
        body(self)?;
        let elapsed = start.elapsed();
        log::debug!("{stage:?} took {:.3} ms", elapsed.as_secs_f64() * 1e3);
        if let Some(callback) = self.stage_callback.as_mut() {
            callback(&StageReport {
                stage,
                time_interval,
                elapsed,
            });
        }
        Ok(())
    }

    fn begin_advance_time_step(&mut self, time_interval: f64) -> Result<()> {
        let current_time = self.clock.current_time_in_seconds();
        if let Some(collider) = &self.collider {
            collider.update(current_time, time_interval);
        }
        if let Some(emitter) = self.emitter.as_mut() {
            emitter.update(&mut self.grids, current_time, time_interval);
        }
        self.update_boundary_cache();
        self.apply_boundary_condition();
        Ok(())
    }

    fn compute_external_forces(&mut self, time_interval: f64) -> Result<()> {
        let gravity = self.gravity;
        let mut velocity = self.grids.velocity_mut();
        for axis in 0..3 {
            if gravity[axis].abs() > EPSILON {
                let delta = time_interval * gravity[axis];
                velocity
                    .component_mut(axis)
                    .update_with_index(|_, _, _, value| value + delta);
            }
        }
        self.apply_boundary_condition();
        Ok(())
    }

    fn compute_viscosity(&mut self, time_interval: f64) -> Result<()> {
        if self.diffusion_solver.is_none() || self.viscosity_coefficient <= EPSILON {
            return Ok(());
        }
        let level_set = self.level_set_snapshot();
        let fluid_sdf = liquid_field(&self.fluid_sdf, level_set.as_ref());
        let source = self.grids.velocity().clone();
        if let Some(diffusion) = self.diffusion_solver.as_mut() {
            diffusion.solve_face_centered(
                &source,
                self.viscosity_coefficient,
                time_interval,
                self.grids.velocity_mut().into_inner(),
                self.boundary_condition_solver.collider_sdf(),
                fluid_sdf,
            )?;
        }
        self.apply_boundary_condition();
        Ok(())
    }

    fn compute_pressure(&mut self, time_interval: f64) -> Result<()> {
        if self.pressure_solver.is_none() {
            return Ok(());
        }
        let depth = self.extrapolation_depth();
        let free_surface = self.has_free_surface();
        let level_set = self.level_set_snapshot();
        let fluid_sdf = liquid_field(&self.fluid_sdf, level_set.as_ref());
        let source = self.grids.velocity().clone();
        if let Some(pressure) = self.pressure_solver.as_mut() {
            pressure.solve(
                &source,
                time_interval,
                self.grids.velocity_mut().into_inner(),
                self.boundary_condition_solver.collider_sdf(),
                self.boundary_condition_solver.collider_velocity_field(),
                fluid_sdf,
                self.use_compressed_linear_system,
            )?;
            log::debug!(
                "pressure solve: {} iterations, residual {:e}",
                pressure.linear_system_solver().last_number_of_iterations(),
                pressure.linear_system_solver().last_residual()
            );
        }
        if free_surface {
            extrapolate_into_air(self.grids.velocity_mut().into_inner(), fluid_sdf, depth);
        }
        self.apply_boundary_condition();
        Ok(())
    }

    fn compute_advection(&mut self, time_interval: f64) -> Result<()> {
        let Some(advection) = self.advection_solver else {
            return Ok(());
        };
        let depth = self.extrapolation_depth();
        let sdf = self.boundary_condition_solver.collider_sdf();
        let flow = self.grids.velocity().clone();

        for index in 0..self.grids.number_of_advectable_scalar_data() {
            let grid = self.grids.advectable_scalar_data_at_mut(index).into_inner();
            let source = grid.clone();
            advection.advect_scalar(&source, &flow, time_interval, grid, sdf)?;
            extrapolate_into_collider(grid, sdf, depth);
        }

        for index in 0..self.grids.number_of_advectable_vector_data() {
            match self.grids.advectable_vector_data_at_mut(index).into_inner() {
                VectorGrid3::Collocated(grid) => {
                    let source = grid.clone();
                    advection.advect_collocated(&source, &flow, time_interval, grid, sdf)?;
                    for axis in 0..3 {
                        extrapolate_into_collider(grid.component_mut(axis), sdf, depth);
                    }
                }
                VectorGrid3::FaceCentered(grid) => {
                    let source = grid.clone();
                    advection.advect_face_centered(&source, &flow, time_interval, grid, sdf)?;
                    for axis in 0..3 {
                        extrapolate_into_collider(grid.component_mut(axis), sdf, depth);
                    }
                }
            }
        }

        if let FluidSdf::LevelSet(index) = self.fluid_sdf {
            let level_set = self.grids.advectable_scalar_data_at_mut(index).into_inner();
            let h = level_set.grid().spacing().min_element();
            let redistanced = reinitialize(level_set, REDISTANCE_ITERATIONS, 0.3 * h);
            level_set.copy_data_from(&redistanced)?;
        }

        advection.advect_face_centered(
            &flow,
            &flow,
            time_interval,
            self.grids.velocity_mut().into_inner(),
            sdf,
        )?;
        self.apply_boundary_condition();
        Ok(())
    }
}

fn extrapolate_into_collider(grid: &mut ScalarGrid3, collider_sdf: &dyn ScalarField3, depth: usize) {
    let data_grid = grid.grid();
    let size = data_grid.size();
    let valid = parallel::collect_indexed(size.len(), |index| {
        let (i, j, k) = size.coord(index);
        !is_inside_sdf(collider_sdf.sample(data_grid.position(i, j, k)))
    });
    extrapolate_in_place(grid, &valid, depth);
}

/// Carries face velocities from faces touching liquid out into the air.
fn extrapolate_into_air(velocity: &mut FaceCenteredGrid3, fluid_sdf: &dyn ScalarField3, depth: usize) {
    let spacing = velocity.grid_spacing();
    for axis in 0..3 {
        let half = 0.5 * spacing[axis] * DVec3::AXES[axis];
        let component = velocity.component_mut(axis);
        let grid = component.grid();
        let size = grid.size();
        let valid = parallel::collect_indexed(size.len(), |index| {
            let (i, j, k) = size.coord(index);
            let pos = grid.position(i, j, k);
            is_inside_sdf(fluid_sdf.sample(pos - half)) || is_inside_sdf(fluid_sdf.sample(pos + half))
        });
        extrapolate_in_place(component, &valid, depth);
    }
}

impl PhysicsAnimation for GridFluidSolver3 {
    fn clock(&self) -> &AnimationClock {
        &self.clock
    }

    fn clock_mut(&mut self) -> &mut AnimationClock {
        &mut self.clock
    }

    fn on_initialize(&mut self) -> Result<()> {
        let current_time = self.clock.current_time_in_seconds();
        if let Some(collider) = &self.collider {
            collider.update(current_time, 0.0);
        }
        if let Some(emitter) = self.emitter.as_mut() {
            emitter.update(&mut self.grids, current_time, 0.0);
        }
        self.update_boundary_cache();
        Ok(())
    }

    fn on_advance_time_step(&mut self, time_interval: f64) -> Result<()> {
        if self.grids.resolution().is_empty() {
            log::warn!("skipping sub-step on empty grid {:?}", self.grids.resolution());
            return Ok(());
        }
        self.run_stage(SolverStage::BeginStep, time_interval, |s| {
            s.begin_advance_time_step(time_interval)
        })?;
        self.run_stage(SolverStage::ExternalForces, time_interval, |s| {
            s.compute_external_forces(time_interval)
        })?;
        self.run_stage(SolverStage::Viscosity, time_interval, |s| {
            s.compute_viscosity(time_interval)
        })?;
        self.run_stage(SolverStage::Pressure, time_interval, |s| {
            s.compute_pressure(time_interval)
        })?;
        self.run_stage(SolverStage::Advection, time_interval, |s| {
            s.compute_advection(time_interval)
        })?;
        self.run_stage(SolverStage::EndStep, time_interval, |_| Ok(()))
    }

    fn number_of_sub_time_steps(&self, time_interval: f64) -> Result<usize> {
        let cfl = self.cfl(time_interval);
        if !cfl.is_finite() {
            return Err(SimError::NonFiniteVelocity { cfl });
        }
        let steps = ((cfl / self.max_cfl).ceil() as usize).max(1);
        log::debug!("cfl {cfl:.3} -> {steps} sub-steps");
        Ok(steps)
    }
}
