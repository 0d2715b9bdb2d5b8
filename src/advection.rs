use crate::error::{ensure_same_grid, Result};
use crate::field::{ScalarField3, ScalarGrid3, VectorField3};
use crate::level_set::EPSILON;
use crate::mac::FaceCenteredGrid3;
use crate::parallel;
use crate::vec_field::CollocatedVectorGrid3;
use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdvectionSolver3 {
    #[default]
    SemiLagrangian,
    CubicSemiLagrangian,
}

impl AdvectionSolver3 {
    pub fn advect_scalar(
        &self,
        input: &ScalarGrid3,
        flow: &dyn VectorField3,
        time_interval: f64,
        output: &mut ScalarGrid3,
        boundary_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        ensure_same_grid("advection", input.grid(), output.grid())?;
        let h = input.grid().spacing().min_element();
        let grid = output.grid();
        output.update_with_index(|i, j, k, value| {
            let pos = grid.position(i, j, k);
            if boundary_sdf.sample(pos) > 0.0 {
                let departure = back_trace(flow, time_interval, h, pos, boundary_sdf);
                self.sample(input, departure)
            } else {
                value
            }
        });
        Ok(())
    }

    pub fn advect_collocated(
        &self,
        input: &CollocatedVectorGrid3,
        flow: &dyn VectorField3,
        time_interval: f64,
        output: &mut CollocatedVectorGrid3,
        boundary_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        ensure_same_grid("advection", input.grid(), output.grid())?;
        let grid = input.grid();
        let h = grid.spacing().min_element();
        let size = grid.size();
        let departures = parallel::collect_indexed(grid.len(), |index| {
            let (i, j, k) = size.coord(index);
            let pos = grid.position(i, j, k);
            (boundary_sdf.sample(pos) > 0.0)
                .then(|| back_trace(flow, time_interval, h, pos, boundary_sdf))
        });
        for axis in 0..3 {
            let source = input.component(axis);
            let departures = &departures;
            output.component_mut(axis).update_with_index(|i, j, k, value| {
                match departures[size.idx(i, j, k)] {
                    Some(departure) => self.sample(source, departure),
                    None => value,
                }
            });
        }
        Ok(())
    }

    pub fn advect_face_centered(
        &self,
        input: &FaceCenteredGrid3,
        flow: &dyn VectorField3,
        time_interval: f64,
        output: &mut FaceCenteredGrid3,
        boundary_sdf: &dyn ScalarField3,
    ) -> Result<()> {
        for axis in 0..3 {
            ensure_same_grid("advection", input.component(axis).grid(), output.component(axis).grid())?;
        }
        let h = input.grid_spacing().min_element();
        for axis in 0..3 {
            let source = input.component(axis);
            let target = output.component_mut(axis);
            let grid = target.grid();
            target.update_with_index(|i, j, k, value| {
                let pos = grid.position(i, j, k);
                if boundary_sdf.sample(pos) > 0.0 {
                    let departure = back_trace(flow, time_interval, h, pos, boundary_sdf);
                    self.sample(source, departure)
                } else {
                    value
                }
            });
        }
        Ok(())
    }

    fn sample(&self, grid: &ScalarGrid3, point: DVec3) -> f64 {
        match self {
            Self::SemiLagrangian => grid.sample(point),
            Self::CubicSemiLagrangian => sample_monotonic_cubic(grid, point),
        }
    }
}

/// Walks backwards along `flow` for `time_interval` with midpoint steps no
/// longer than one cell. If a step crosses the boundary surface the walk
/// stops at the crossing, interpolated from the two SDF values.
pub fn back_trace(
    flow: &dyn VectorField3,
    time_interval: f64,
    h: f64,
    start: DVec3,
    boundary_sdf: &dyn ScalarField3,
) -> DVec3 {
    let mut remaining = time_interval;
    let mut p0 = start;
    let mut p1 = start;
    while remaining > EPSILON {
        let v0 = flow.sample(p0);
        let sub_steps = (v0.length() * remaining / h).ceil().max(1.0);
        let dt = remaining / sub_steps;

        let mid = p0 - 0.5 * dt * v0;
        p1 = p0 - dt * flow.sample(mid);

        let phi0 = boundary_sdf.sample(p0);
        let phi1 = boundary_sdf.sample(p1);
        if phi0 * phi1 < 0.0 {
            let w = phi1.abs() / (phi0.abs() + phi1.abs());
            p1 = w * p0 + (1.0 - w) * p1;
            break;
        }

        remaining -= dt;
        p0 = p1;
    }
    p1
}

/// Catmull-Rom segment between `f1` and `f2` with tangents zeroed wherever
/// they disagree in sign with the segment slope, so it never overshoots.
pub fn monotonic_catmull_rom(f0: f64, f1: f64, f2: f64, f3: f64, t: f64) -> f64 {
    let mut d1 = 0.5 * (f2 - f0);
    let mut d2 = 0.5 * (f3 - f1);
    let delta = f2 - f1;
    if delta.abs() < EPSILON {
        d1 = 0.0;
        d2 = 0.0;
    }
    if delta.signum() != d1.signum() {
        d1 = 0.0;
    }
    if delta.signum() != d2.signum() {
        d2 = 0.0;
    }
    let a3 = d1 + d2 - 2.0 * delta;
    let a2 = 3.0 * delta - 2.0 * d1 - d2;
    ((a3 * t + a2) * t + d1) * t + f1
}

fn sample_monotonic_cubic(grid: &ScalarGrid3, point: DVec3) -> f64 {
    if grid.data().is_empty() {
        return 0.0;
    }
    let g = grid.grid().grid_coordinates(point);
    let base = g.floor();
    let t = g - base;
    let (i0, j0, k0) = (base.x as i64, base.y as i64, base.z as i64);

    let mut planes = [0.0; 4];
    for (dk, plane) in planes.iter_mut().enumerate() {
        let mut rows = [0.0; 4];
        for (dj, row) in rows.iter_mut().enumerate() {
            let k = k0 + dk as i64 - 1;
            let j = j0 + dj as i64 - 1;
            *row = monotonic_catmull_rom(
                grid.get_clamped(i0 - 1, j, k),
                grid.get_clamped(i0, j, k),
                grid.get_clamped(i0 + 1, j, k),
                grid.get_clamped(i0 + 2, j, k),
                t.x,
            );
        }
        *plane = monotonic_catmull_rom(rows[0], rows[1], rows[2], rows[3], t.y);
    }
    monotonic_catmull_rom(planes[0], planes[1], planes[2], planes[3], t.z)
}
