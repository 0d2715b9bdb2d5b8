use crate::error::Result;
use crate::field::{DataLayout, ScalarGrid3, VectorField3};
use crate::grid::Size3;
use crate::mac::FaceCenteredGrid3;
use crate::surface::Box3;
use crate::vec_field::CollocatedVectorGrid3;
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorGridKind {
    Collocated(DataLayout),
    FaceCentered,
}

#[derive(Clone, Debug, PartialEq)]
pub enum VectorGrid3 {
    Collocated(CollocatedVectorGrid3),
    FaceCentered(FaceCenteredGrid3),
}

impl VectorGrid3 {
    pub fn new(kind: VectorGridKind, resolution: Size3, spacing: DVec3, origin: DVec3, fill: DVec3) -> Self {
        match kind {
            VectorGridKind::Collocated(layout) => {
                Self::Collocated(CollocatedVectorGrid3::new(layout, resolution, spacing, origin, fill))
            }
            VectorGridKind::FaceCentered => {
                Self::FaceCentered(FaceCenteredGrid3::new(resolution, spacing, origin, fill))
            }
        }
    }

    pub fn kind(&self) -> VectorGridKind {
        match self {
            Self::Collocated(grid) => VectorGridKind::Collocated(grid.layout()),
            Self::FaceCentered(_) => VectorGridKind::FaceCentered,
        }
    }

    pub fn sample(&self, point: DVec3) -> DVec3 {
        match self {
            Self::Collocated(grid) => grid.sample(point),
            Self::FaceCentered(grid) => grid.sample(point),
        }
    }

    pub fn component(&self, axis: usize) -> &ScalarGrid3 {
        match self {
            Self::Collocated(grid) => grid.component(axis),
            Self::FaceCentered(grid) => grid.component(axis),
        }
    }

    pub fn component_mut(&mut self, axis: usize) -> &mut ScalarGrid3 {
        match self {
            Self::Collocated(grid) => grid.component_mut(axis),
            Self::FaceCentered(grid) => grid.component_mut(axis),
        }
    }

    pub fn fill(&mut self, value: DVec3) {
        match self {
            Self::Collocated(grid) => grid.fill(value),
            Self::FaceCentered(grid) => grid.fill(value),
        }
    }
}

impl VectorField3 for VectorGrid3 {
    fn sample(&self, point: DVec3) -> DVec3 {
        VectorGrid3::sample(self, point)
    }
}

/// Writable view of one stored scalar layer. Sample values can change but
/// the layer keeps the resolution and placement the grid system gave it.
#[derive(Debug)]
pub struct ScalarLayerMut<'a>(&'a mut ScalarGrid3);

impl<'a> ScalarLayerMut<'a> {
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        self.0.set(i, j, k, value);
    }

    pub fn fill(&mut self, value: f64) {
        self.0.fill(value);
    }

    pub fn fill_with_index(&mut self, f: impl Fn(usize, usize, usize) -> f64 + Sync) {
        self.0.fill_with_index(f);
    }

    pub fn update_with_index(&mut self, f: impl Fn(usize, usize, usize, f64) -> f64 + Sync) {
        self.0.update_with_index(f);
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        self.0.data_mut()
    }

    pub fn copy_data_from(&mut self, other: &ScalarGrid3) -> Result<()> {
        self.0.copy_data_from(other)
    }

    pub(crate) fn into_inner(self) -> &'a mut ScalarGrid3 {
        self.0
    }
}

impl Deref for ScalarLayerMut<'_> {
    type Target = ScalarGrid3;

    fn deref(&self) -> &ScalarGrid3 {
        self.0
    }
}

/// Writable view of one stored vector layer; see [`ScalarLayerMut`].
#[derive(Debug)]
pub struct VectorLayerMut<'a>(&'a mut VectorGrid3);

impl<'a> VectorLayerMut<'a> {
    pub fn fill(&mut self, value: DVec3) {
        self.0.fill(value);
    }

    pub fn component_mut(&mut self, axis: usize) -> ScalarLayerMut<'_> {
        ScalarLayerMut(self.0.component_mut(axis))
    }

    pub(crate) fn into_inner(self) -> &'a mut VectorGrid3 {
        self.0
    }
}

impl Deref for VectorLayerMut<'_> {
    type Target = VectorGrid3;

    fn deref(&self) -> &VectorGrid3 {
        self.0
    }
}

/// Writable view of the MAC velocity; see [`ScalarLayerMut`].
#[derive(Debug)]
pub struct VelocityMut<'a>(&'a mut FaceCenteredGrid3);

impl<'a> VelocityMut<'a> {
    pub fn fill(&mut self, value: DVec3) {
        self.0.fill(value);
    }

    pub fn component_mut(&mut self, axis: usize) -> ScalarLayerMut<'_> {
        ScalarLayerMut(self.0.component_mut(axis))
    }

    pub(crate) fn into_inner(self) -> &'a mut FaceCenteredGrid3 {
        self.0
    }
}

impl Deref for VelocityMut<'_> {
    type Target = FaceCenteredGrid3;

    fn deref(&self) -> &FaceCenteredGrid3 {
        self.0
    }
}

#[derive(Clone, Debug)]
struct ScalarLayer {
    layout: DataLayout,
    initial: f64,
    grid: ScalarGrid3,
}

#[derive(Clone, Debug)]
struct VectorLayer {
    kind: VectorGridKind,
    initial: DVec3,
    grid: VectorGrid3,
}

/// All grids of one simulation on a shared resolution, spacing and origin.
/// The MAC velocity is always present; extra layers are appended and
/// addressed by the index returned when they were added.
#[derive(Clone, Debug)]
pub struct GridSystemData3 {
    resolution: Size3,
    grid_spacing: DVec3,
    origin: DVec3,
    velocity: FaceCenteredGrid3,
    scalar_data: Vec<ScalarLayer>,
    vector_data: Vec<VectorLayer>,
    advectable_scalar_data: Vec<ScalarLayer>,
    advectable_vector_data: Vec<VectorLayer>,
}

impl GridSystemData3 {
    pub fn new(resolution: Size3, grid_spacing: DVec3, origin: DVec3) -> Self {
        Self {
            resolution,
            grid_spacing,
            origin,
            velocity: FaceCenteredGrid3::new(resolution, grid_spacing, origin, DVec3::ZERO),
            scalar_data: Vec::new(),
            vector_data: Vec::new(),
            advectable_scalar_data: Vec::new(),
            advectable_vector_data: Vec::new(),
        }
    }

    pub fn resize(&mut self, resolution: Size3, grid_spacing: DVec3, origin: DVec3) {
        self.resolution = resolution;
        self.grid_spacing = grid_spacing;
        self.origin = origin;
        self.velocity
            .resize(resolution, grid_spacing, origin, DVec3::ZERO);
        for layer in self.scalar_data.iter_mut().chain(&mut self.advectable_scalar_data) {
            layer.grid = ScalarGrid3::with_layout(layer.layout, resolution, grid_spacing, origin, layer.initial);
        }
        for layer in self.vector_data.iter_mut().chain(&mut self.advectable_vector_data) {
            layer.grid = VectorGrid3::new(layer.kind, resolution, grid_spacing, origin, layer.initial);
        }
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.grid_spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn bounding_box(&self) -> Box3 {
        let extent = self.grid_spacing
            * DVec3::new(
                self.resolution.x as f64,
                self.resolution.y as f64,
                self.resolution.z as f64,
            );
        Box3::new(self.origin, self.origin + extent)
    }

    pub fn velocity(&self) -> &FaceCenteredGrid3 {
        &self.velocity
    }

    pub fn velocity_mut(&mut self) -> VelocityMut<'_> {
        VelocityMut(&mut self.velocity)
    }

    pub fn add_scalar_data(&mut self, layout: DataLayout, initial: f64) -> usize {
        let layer = self.scalar_layer(layout, initial);
        self.scalar_data.push(layer);
        self.scalar_data.len() - 1
    }

    pub fn add_advectable_scalar_data(&mut self, layout: DataLayout, initial: f64) -> usize {
        let layer = self.scalar_layer(layout, initial);
        self.advectable_scalar_data.push(layer);
        self.advectable_scalar_data.len() - 1
    }

    pub fn add_vector_data(&mut self, kind: VectorGridKind, initial: DVec3) -> usize {
        let layer = self.vector_layer(kind, initial);
        self.vector_data.push(layer);
        self.vector_data.len() - 1
    }

    pub fn add_advectable_vector_data(&mut self, kind: VectorGridKind, initial: DVec3) -> usize {
        let layer = self.vector_layer(kind, initial);
        self.advectable_vector_data.push(layer);
        self.advectable_vector_data.len() - 1
    }

    fn scalar_layer(&self, layout: DataLayout, initial: f64) -> ScalarLayer {
        ScalarLayer {
            layout,
            initial,
            grid: ScalarGrid3::with_layout(layout, self.resolution, self.grid_spacing, self.origin, initial),
        }
    }

    fn vector_layer(&self, kind: VectorGridKind, initial: DVec3) -> VectorLayer {
        VectorLayer {
            kind,
            initial,
            grid: VectorGrid3::new(kind, self.resolution, self.grid_spacing, self.origin, initial),
        }
    }

    pub fn scalar_data_at(&self, index: usize) -> &ScalarGrid3 {
        &self.scalar_data[index].grid
    }

    pub fn scalar_data_at_mut(&mut self, index: usize) -> ScalarLayerMut<'_> {
        ScalarLayerMut(&mut self.scalar_data[index].grid)
    }

    pub fn vector_data_at(&self, index: usize) -> &VectorGrid3 {
        &self.vector_data[index].grid
    }

    pub fn vector_data_at_mut(&mut self, index: usize) -> VectorLayerMut<'_> {
        VectorLayerMut(&mut self.vector_data[index].grid)
    }

    pub fn advectable_scalar_data_at(&self, index: usize) -> &ScalarGrid3 {
        &self.advectable_scalar_data[index].grid
    }

    pub fn advectable_scalar_data_at_mut(&mut self, index: usize) -> ScalarLayerMut<'_> {
        ScalarLayerMut(&mut self.advectable_scalar_data[index].grid)
    }

    pub fn advectable_vector_data_at(&self, index: usize) -> &VectorGrid3 {
        &self.advectable_vector_data[index].grid
    }

    pub fn advectable_vector_data_at_mut(&mut self, index: usize) -> VectorLayerMut<'_> {
        VectorLayerMut(&mut self.advectable_vector_data[index].grid)
    }

    pub fn number_of_scalar_data(&self) -> usize {
        self.scalar_data.len()
    }

    pub fn number_of_vector_data(&self) -> usize {
        self.vector_data.len()
    }

    pub fn number_of_advectable_scalar_data(&self) -> usize {
        self.advectable_scalar_data.len()
    }

    pub fn number_of_advectable_vector_data(&self) -> usize {
        self.advectable_vector_data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layers_are_indexed_per_list() {
        let mut data = GridSystemData3::new(Size3::new(4, 3, 2), DVec3::ONE, DVec3::ZERO);
        assert_eq!(data.add_scalar_data(DataLayout::CellCentered, 1.0), 0);
        assert_eq!(data.add_advectable_scalar_data(DataLayout::VertexCentered, 2.0), 0);
        assert_eq!(data.add_advectable_scalar_data(DataLayout::CellCentered, 3.0), 1);
        assert_eq!(data.add_vector_data(VectorGridKind::FaceCentered, DVec3::ONE), 0);
        assert_eq!(data.number_of_scalar_data(), 1);
        assert_eq!(data.number_of_advectable_scalar_data(), 2);
        assert_eq!(data.number_of_vector_data(), 1);
        assert_eq!(data.number_of_advectable_vector_data(), 0);
        assert_eq!(data.advectable_scalar_data_at(0).size(), Size3::new(5, 4, 3));
        assert_eq!(data.advectable_scalar_data_at(1).get(3, 2, 1), 3.0);
    }

    #[test]
    fn resize_keeps_layer_kind_and_initial_value() {
        let mut data = GridSystemData3::new(Size3::new(2, 2, 2), DVec3::ONE, DVec3::ZERO);
        let density = data.add_advectable_scalar_data(DataLayout::CellCentered, 0.5);
        let color = data.add_advectable_vector_data(
            VectorGridKind::Collocated(DataLayout::VertexCentered),
            DVec3::new(1.0, 2.0, 3.0),
        );
        data.advectable_scalar_data_at_mut(density).fill(9.0);
        data.velocity_mut().fill(DVec3::ONE);

        data.resize(Size3::new(3, 4, 5), DVec3::splat(0.5), DVec3::ONE);
        assert_eq!(data.resolution(), Size3::new(3, 4, 5));
        assert_eq!(data.velocity().u().size(), Size3::new(4, 4, 5));
        assert_eq!(data.velocity().max_abs_component(), 0.0);
        let scalar = data.advectable_scalar_data_at(density);
        assert_eq!(scalar.size(), Size3::new(3, 4, 5));
        assert_eq!(scalar.get(0, 0, 0), 0.5);
        let vector = data.advectable_vector_data_at(color);
        assert_eq!(vector.kind(), VectorGridKind::Collocated(DataLayout::VertexCentered));
        assert_eq!(vector.sample(DVec3::splat(1.2)), DVec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn layer_views_write_values_but_keep_shape() {
        let mut data = GridSystemData3::new(Size3::new(3, 2, 2), DVec3::ONE, DVec3::ZERO);
        let marker = data.add_scalar_data(DataLayout::VertexCentered, 0.0);
        let flow = data.add_advectable_vector_data(VectorGridKind::FaceCentered, DVec3::ZERO);

        let mut layer = data.scalar_data_at_mut(marker);
        layer.set(3, 2, 2, 4.0);
        layer.data_mut()[0] = -1.0;
        assert_eq!(layer.size(), Size3::new(4, 3, 3));
        let other = ScalarGrid3::cell_centered(Size3::new(3, 2, 2), DVec3::ONE, DVec3::ZERO, 1.0);
        assert!(layer.copy_data_from(&other).is_err());

        let mut vector = data.advectable_vector_data_at_mut(flow);
        vector.fill(DVec3::new(1.0, 2.0, 3.0));
        vector.component_mut(1).update_with_index(|_, j, _, value| value * j as f64);
        assert_eq!(vector.kind(), VectorGridKind::FaceCentered);

        data.velocity_mut().component_mut(2).fill(5.0);

        let scalar = data.scalar_data_at(marker);
        assert_eq!(scalar.size(), Size3::new(4, 3, 3));
        assert_eq!(scalar.get(3, 2, 2), 4.0);
        assert_eq!(scalar.get(0, 0, 0), -1.0);
        let vector = data.advectable_vector_data_at(flow);
        assert_eq!(vector.component(0).get(3, 1, 1), 1.0);
        assert_eq!(vector.component(1).get(0, 2, 0), 4.0);
        assert_eq!(vector.component(1).size(), Size3::new(3, 3, 2));
        assert_eq!(data.velocity().w().get(1, 1, 2), 5.0);
        assert_eq!(data.velocity().u().max_abs(), 0.0);
    }

    #[test]
    fn bounding_box_spans_every_cell() {
        let data = GridSystemData3::new(Size3::new(4, 2, 1), DVec3::new(0.5, 1.0, 2.0), DVec3::new(-1.0, 0.0, 0.0));
        let bounds = data.bounding_box();
        assert_eq!(bounds.lower, DVec3::new(-1.0, 0.0, 0.0));
        assert_eq!(bounds.upper, DVec3::new(1.0, 2.0, 2.0));
    }
}
