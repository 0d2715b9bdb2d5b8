use crate::field::{ScalarGrid3, VectorField3};
use crate::grid::{DataGrid3, Size3};
use crate::parallel;
use glam::DVec3;

/// Staggered (MAC) velocity. Each component lives on the faces normal to its
/// own axis, so its array is one sample longer along that axis.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceCenteredGrid3 {
    resolution: Size3,
    spacing: DVec3,
    origin: DVec3,
    u: ScalarGrid3,
    v: ScalarGrid3,
    w: ScalarGrid3,
}

impl FaceCenteredGrid3 {
    pub fn new(resolution: Size3, spacing: DVec3, origin: DVec3, fill: DVec3) -> Self {
        let u = ScalarGrid3::new(face_grid(0, resolution, spacing, origin), fill.x);
        let v = ScalarGrid3::new(face_grid(1, resolution, spacing, origin), fill.y);
        let w = ScalarGrid3::new(face_grid(2, resolution, spacing, origin), fill.z);
        Self {
            resolution,
            spacing,
            origin,
            u,
            v,
            w,
        }
    }

    pub fn resize(&mut self, resolution: Size3, spacing: DVec3, origin: DVec3, fill: DVec3) {
        *self = Self::new(resolution, spacing, origin, fill);
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn u(&self) -> &ScalarGrid3 {
        &self.u
    }

    pub fn v(&self) -> &ScalarGrid3 {
        &self.v
    }

    pub fn w(&self) -> &ScalarGrid3 {
        &self.w
    }

    pub fn u_mut(&mut self) -> &mut ScalarGrid3 {
        &mut self.u
    }

    pub fn v_mut(&mut self) -> &mut ScalarGrid3 {
        &mut self.v
    }

    pub fn w_mut(&mut self) -> &mut ScalarGrid3 {
        &mut self.w
    }

    pub fn component(&self, axis: usize) -> &ScalarGrid3 {
        match axis {
            0 => &self.u,
            1 => &self.v,
            _ => &self.w,
        }
    }

    pub fn component_mut(&mut self, axis: usize) -> &mut ScalarGrid3 {
        match axis {
            0 => &mut self.u,
            1 => &mut self.v,
            _ => &mut self.w,
        }
    }

    pub fn fill(&mut self, value: DVec3) {
        self.u.fill(value.x);
        self.v.fill(value.y);
        self.w.fill(value.z);
    }

    pub fn cell_center_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin + self.spacing * (DVec3::new(i as f64, j as f64, k as f64) + 0.5)
    }

    pub fn sample(&self, point: DVec3) -> DVec3 {
        DVec3::new(
            self.u.sample(point),
            self.v.sample(point),
            self.w.sample(point),
        )
    }

    pub fn value_at_cell_center(&self, i: usize, j: usize, k: usize) -> DVec3 {
        0.5 * DVec3::new(
            self.u.get(i, j, k) + self.u.get(i + 1, j, k),
            self.v.get(i, j, k) + self.v.get(i, j + 1, k),
            self.w.get(i, j, k) + self.w.get(i, j, k + 1),
        )
    }

    pub fn divergence_at_cell_center(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.u.get(i + 1, j, k) - self.u.get(i, j, k)) / self.spacing.x
            + (self.v.get(i, j + 1, k) - self.v.get(i, j, k)) / self.spacing.y
            + (self.w.get(i, j, k + 1) - self.w.get(i, j, k)) / self.spacing.z
    }

    pub fn max_abs_component(&self) -> f64 {
        self.u
            .max_abs()
            .max(self.v.max_abs())
            .max(self.w.max_abs())
    }

    pub fn max_abs_divergence(&self) -> f64 {
        let res = self.resolution;
        let values = parallel::collect_indexed(res.len(), |index| {
            let (i, j, k) = res.coord(index);
            self.divergence_at_cell_center(i, j, k)
        });
        parallel::max_abs(&values)
    }
}

impl VectorField3 for FaceCenteredGrid3 {
    fn sample(&self, point: DVec3) -> DVec3 {
        FaceCenteredGrid3::sample(self, point)
    }
}

pub(crate) fn face_grid(axis: usize, resolution: Size3, spacing: DVec3, origin: DVec3) -> DataGrid3 {
    let size = if resolution.is_empty() {
        Size3::default()
    } else {
        resolution.grown_along(axis)
    };
    let mut offset = 0.5 * spacing;
    match axis {
        0 => offset.x = 0.0,
        1 => offset.y = 0.0,
        _ => offset.z = 0.0,
    }
    DataGrid3::new(size, spacing, origin + offset)
}
