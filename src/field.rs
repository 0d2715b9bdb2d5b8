use crate::error::{ensure_same_grid, Result};
use crate::grid::{DataGrid3, Size3};
use crate::parallel::{self, for_each_indexed};
use glam::DVec3;
use serde::{Deserialize, Serialize};

const GRADIENT_DELTA: f64 = 1e-4;

pub trait ScalarField3: Sync {
    fn sample(&self, point: DVec3) -> f64;

    fn gradient(&self, point: DVec3) -> DVec3 {
        let dx = DVec3::X * GRADIENT_DELTA;
        let dy = DVec3::Y * GRADIENT_DELTA;
        let dz = DVec3::Z * GRADIENT_DELTA;
        DVec3::new(
            self.sample(point + dx) - self.sample(point - dx),
            self.sample(point + dy) - self.sample(point - dy),
            self.sample(point + dz) - self.sample(point - dz),
        ) / (2.0 * GRADIENT_DELTA)
    }
}

pub trait VectorField3: Sync {
    fn sample(&self, point: DVec3) -> DVec3;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantScalarField3(pub f64);

impl ScalarField3 for ConstantScalarField3 {
    fn sample(&self, _point: DVec3) -> f64 {
        self.0
    }

    fn gradient(&self, _point: DVec3) -> DVec3 {
        DVec3::ZERO
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantVectorField3(pub DVec3);

impl VectorField3 for ConstantVectorField3 {
    fn sample(&self, _point: DVec3) -> DVec3 {
        self.0
    }
}

pub struct CustomScalarField3<F>(pub F);

impl<F: Fn(DVec3) -> f64 + Sync> ScalarField3 for CustomScalarField3<F> {
    fn sample(&self, point: DVec3) -> f64 {
        (self.0)(point)
    }
}

pub struct CustomVectorField3<F>(pub F);

impl<F: Fn(DVec3) -> DVec3 + Sync> VectorField3 for CustomVectorField3<F> {
    fn sample(&self, point: DVec3) -> DVec3 {
        (self.0)(point)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayout {
    #[default]
    CellCentered,
    VertexCentered,
}

impl DataLayout {
    pub fn data_grid(self, resolution: Size3, spacing: DVec3, origin: DVec3) -> DataGrid3 {
        match self {
            DataLayout::CellCentered => DataGrid3::new(resolution, spacing, origin + 0.5 * spacing),
            DataLayout::VertexCentered => {
                let size = if resolution.is_empty() {
                    Size3::default()
                } else {
                    Size3::new(resolution.x + 1, resolution.y + 1, resolution.z + 1)
                };
                DataGrid3::new(size, spacing, origin)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarGrid3 {
    grid: DataGrid3,
    data: Vec<f64>,
}

impl ScalarGrid3 {
    pub fn new(grid: DataGrid3, fill: f64) -> Self {
        let data = vec![fill; grid.len()];
        Self { grid, data }
    }

    pub fn cell_centered(resolution: Size3, spacing: DVec3, origin: DVec3, fill: f64) -> Self {
        Self::with_layout(DataLayout::CellCentered, resolution, spacing, origin, fill)
    }

    pub fn vertex_centered(resolution: Size3, spacing: DVec3, origin: DVec3, fill: f64) -> Self {
        Self::with_layout(DataLayout::VertexCentered, resolution, spacing, origin, fill)
    }

    pub fn with_layout(
        layout: DataLayout,
        resolution: Size3,
        spacing: DVec3,
        origin: DVec3,
        fill: f64,
    ) -> Self {
        Self::new(layout.data_grid(resolution, spacing, origin), fill)
    }

    pub fn from_fn(grid: DataGrid3, f: impl Fn(usize, usize, usize) -> f64 + Sync) -> Self {
        let size = grid.size();
        let data = parallel::collect_indexed(grid.len(), |index| {
            let (i, j, k) = size.coord(index);
            f(i, j, k)
        });
        Self { grid, data }
    }

    pub fn grid(&self) -> DataGrid3 {
        self.grid
    }

    pub fn size(&self) -> Size3 {
        self.grid.size()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.grid.position(i, j, k)
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.grid.idx(i, j, k)]
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        let index = self.grid.idx(i, j, k);
        self.data[index] = value;
    }

    pub fn get_clamped(&self, i: i64, j: i64, k: i64) -> f64 {
        let (ci, cj, ck) = self.grid.clamp_coord(i, j, k);
        self.get(ci, cj, ck)
    }

    pub fn sample(&self, point: DVec3) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let g = self.grid.grid_coordinates(point);
        let base = g.floor();
        let t = g - base;
        let (i0, j0, k0) = (base.x as i64, base.y as i64, base.z as i64);
        let c000 = self.get_clamped(i0, j0, k0);
        let c100 = self.get_clamped(i0 + 1, j0, k0);
        let c010 = self.get_clamped(i0, j0 + 1, k0);
        let c110 = self.get_clamped(i0 + 1, j0 + 1, k0);
        let c001 = self.get_clamped(i0, j0, k0 + 1);
        let c101 = self.get_clamped(i0 + 1, j0, k0 + 1);
        let c011 = self.get_clamped(i0, j0 + 1, k0 + 1);
        let c111 = self.get_clamped(i0 + 1, j0 + 1, k0 + 1);
        let x00 = lerp(c000, c100, t.x);
        let x10 = lerp(c010, c110, t.x);
        let x01 = lerp(c001, c101, t.x);
        let x11 = lerp(c011, c111, t.x);
        lerp(lerp(x00, x10, t.y), lerp(x01, x11, t.y), t.z)
    }

    pub fn gradient(&self, point: DVec3) -> DVec3 {
        let h = self.grid.spacing();
        let dx = DVec3::new(h.x, 0.0, 0.0);
        let dy = DVec3::new(0.0, h.y, 0.0);
        let dz = DVec3::new(0.0, 0.0, h.z);
        DVec3::new(
            (self.sample(point + dx) - self.sample(point - dx)) / (2.0 * h.x),
            (self.sample(point + dy) - self.sample(point - dy)) / (2.0 * h.y),
            (self.sample(point + dz) - self.sample(point - dz)) / (2.0 * h.z),
        )
    }

    pub fn laplacian_at(&self, i: usize, j: usize, k: usize) -> f64 {
        let h = self.grid.spacing();
        let center = self.get(i, j, k);
        let (i, j, k) = (i as i64, j as i64, k as i64);
        let lx = self.get_clamped(i - 1, j, k) + self.get_clamped(i + 1, j, k) - 2.0 * center;
        let ly = self.get_clamped(i, j - 1, k) + self.get_clamped(i, j + 1, k) - 2.0 * center;
        let lz = self.get_clamped(i, j, k - 1) + self.get_clamped(i, j, k + 1) - 2.0 * center;
        lx / (h.x * h.x) + ly / (h.y * h.y) + lz / (h.z * h.z)
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize, usize) -> f64 + Sync) {
        let size = self.grid.size();
        for_each_indexed(&mut self.data, |index, value| {
            let (i, j, k) = size.coord(index);
            *value = f(i, j, k);
        });
    }

    pub fn update_with_index(&mut self, f: impl Fn(usize, usize, usize, f64) -> f64 + Sync) {
        let size = self.grid.size();
        for_each_indexed(&mut self.data, |index, value| {
            let (i, j, k) = size.coord(index);
            *value = f(i, j, k, *value);
        });
    }

    /// Copies sample values from a grid with the same layout.
    pub fn copy_data_from(&mut self, other: &Self) -> Result<()> {
        ensure_same_grid("copy_data_from", self.grid, other.grid)?;
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn max_abs(&self) -> f64 {
        parallel::max_abs(&self.data)
    }
}

impl ScalarField3 for ScalarGrid3 {
    fn sample(&self, point: DVec3) -> f64 {
        ScalarGrid3::sample(self, point)
    }

    fn gradient(&self, point: DVec3) -> DVec3 {
        ScalarGrid3::gradient(self, point)
    }
}

pub(crate) fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
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

    fn linear_grid() -> ScalarGrid3 {
        let grid = DataLayout::CellCentered.data_grid(Size3::new(4, 4, 4), DVec3::ONE, DVec3::ZERO);
        ScalarGrid3::from_fn(grid, |i, j, k| i as f64 + 2.0 * j as f64 - k as f64)
    }

    #[test]
    fn cell_centered_samples_sit_at_cell_centers() {
        let field = ScalarGrid3::cell_centered(Size3::new(2, 2, 2), DVec3::splat(2.0), DVec3::ZERO, 0.0);
        assert_eq!(field.position(1, 0, 1), DVec3::new(3.0, 1.0, 3.0));
        assert_eq!(field.size(), Size3::new(2, 2, 2));
    }

    #[test]
    fn vertex_centered_grows_every_axis() {
        let field = ScalarGrid3::vertex_centered(Size3::new(2, 3, 4), DVec3::ONE, DVec3::ZERO, 1.0);
        assert_eq!(field.size(), Size3::new(3, 4, 5));
        assert_close(field.sum(), 60.0, 1e-12);
    }

    #[test]
    fn sample_reproduces_linear_field() {
        let field = linear_grid();
        let p = DVec3::new(1.75, 2.25, 1.5);
        let g = p - DVec3::splat(0.5);
        assert_close(field.sample(p), g.x + 2.0 * g.y - g.z, 1e-12);
    }

    #[test]
    fn gradient_of_linear_field_is_constant() {
        let field = linear_grid();
        let g = field.gradient(DVec3::new(2.0, 2.0, 2.0));
        assert_close(g.x, 1.0, 1e-12);
        assert_close(g.y, 2.0, 1e-12);
        assert_close(g.z, -1.0, 1e-12);
    }

    #[test]
    fn laplacian_of_impulse() {
        let mut field = ScalarGrid3::cell_centered(Size3::new(3, 3, 3), DVec3::ONE, DVec3::ZERO, 0.0);
        field.set(1, 1, 1, 1.0);
        assert_close(field.laplacian_at(1, 1, 1), -6.0, 1e-12);
        assert_close(field.laplacian_at(0, 1, 1), 1.0, 1e-12);
    }

    #[test]
    fn empty_grid_samples_zero() {
        let field = ScalarGrid3::cell_centered(Size3::new(0, 3, 3), DVec3::ONE, DVec3::ZERO, 5.0);
        assert!(field.data().is_empty());
        assert_eq!(field.sample(DVec3::ONE), 0.0);
    }

    #[test]
    fn copy_data_rejects_other_shapes() {
        let source = linear_grid();
        let mut same = ScalarGrid3::new(source.grid(), 0.0);
        same.copy_data_from(&source).unwrap();
        assert_eq!(same.get(3, 1, 2), 3.0);

        let mut smaller = ScalarGrid3::cell_centered(Size3::new(2, 4, 4), DVec3::ONE, DVec3::ZERO, 7.0);
        assert!(matches!(
            smaller.copy_data_from(&source),
            Err(crate::error::SimError::GridMismatch { .. })
        ));
        assert_eq!(smaller.get(0, 0, 0), 7.0);
    }

    #[test]
    fn custom_field_gradient_uses_finite_differences() {
        let field = CustomScalarField3(|p: DVec3| p.x * p.x);
        let g = field.gradient(DVec3::new(3.0, 0.0, 0.0));
        assert_close(g.x, 6.0, 1e-6);
        assert_close(g.y, 0.0, 1e-12);
    }
}
