use crate::field::{DataLayout, ScalarGrid3, VectorField3};
use crate::grid::{DataGrid3, Size3};
use glam::DVec3;

#[derive(Clone, Debug, PartialEq)]
pub struct CollocatedVectorGrid3 {
    layout: DataLayout,
    x: ScalarGrid3,
    y: ScalarGrid3,
    z: ScalarGrid3,
}

impl CollocatedVectorGrid3 {
    pub fn new(
        layout: DataLayout,
        resolution: Size3,
        spacing: DVec3,
        origin: DVec3,
        fill: DVec3,
    ) -> Self {
        let grid = layout.data_grid(resolution, spacing, origin);
        Self {
            layout,
            x: ScalarGrid3::new(grid, fill.x),
            y: ScalarGrid3::new(grid, fill.y),
            z: ScalarGrid3::new(grid, fill.z),
        }
    }

    pub fn from_fn(
        layout: DataLayout,
        resolution: Size3,
        spacing: DVec3,
        origin: DVec3,
        f: impl Fn(usize, usize, usize) -> DVec3 + Sync,
    ) -> Self {
        let grid = layout.data_grid(resolution, spacing, origin);
        Self {
            layout,
            x: ScalarGrid3::from_fn(grid, |i, j, k| f(i, j, k).x),
            y: ScalarGrid3::from_fn(grid, |i, j, k| f(i, j, k).y),
            z: ScalarGrid3::from_fn(grid, |i, j, k| f(i, j, k).z),
        }
    }

    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    pub fn grid(&self) -> DataGrid3 {
        self.x.grid()
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> DVec3 {
        DVec3::new(self.x.get(i, j, k), self.y.get(i, j, k), self.z.get(i, j, k))
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, value: DVec3) {
        self.x.set(i, j, k, value.x);
        self.y.set(i, j, k, value.y);
        self.z.set(i, j, k, value.z);
    }

    pub fn fill(&mut self, value: DVec3) {
        self.x.fill(value.x);
        self.y.fill(value.y);
        self.z.fill(value.z);
    }

    pub fn component(&self, axis: usize) -> &ScalarGrid3 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            _ => &self.z,
        }
    }

    pub fn component_mut(&mut self, axis: usize) -> &mut ScalarGrid3 {
        match axis {
            0 => &mut self.x,
            1 => &mut self.y,
            _ => &mut self.z,
        }
    }

    pub fn sample(&self, point: DVec3) -> DVec3 {
        DVec3::new(
            self.x.sample(point),
            self.y.sample(point),
            self.z.sample(point),
        )
    }
}

impl VectorField3 for CollocatedVectorGrid3 {
    fn sample(&self, point: DVec3) -> DVec3 {
        CollocatedVectorGrid3::sample(self, point)
    }
}
