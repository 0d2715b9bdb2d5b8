use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size3 {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Size3 {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn len(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn is_empty(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }

    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.x && j < self.y && k < self.z);
        (k * self.y + j) * self.x + i
    }

    pub fn coord(&self, index: usize) -> (usize, usize, usize) {
        let i = index % self.x;
        let j = (index / self.x) % self.y;
        let k = index / (self.x * self.y);
        (i, j, k)
    }

    pub fn axis(&self, axis: usize) -> usize {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn grown_along(&self, axis: usize) -> Self {
        let mut size = *self;
        match axis {
            0 => size.x += 1,
            1 => size.y += 1,
            _ => size.z += 1,
        }
        size
    }
}

/// Placement of a 3-D sample array in world space. Sample `(i, j, k)` sits at
/// `origin + spacing * (i, j, k)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DataGrid3 {
    size: Size3,
    spacing: DVec3,
    origin: DVec3,
}

impl DataGrid3 {
    pub fn new(size: Size3, spacing: DVec3, origin: DVec3) -> Self {
        debug_assert!(spacing.min_element() > 0.0, "spacing must be > 0");
        Self {
            size,
            spacing,
            origin,
        }
    }

    pub fn size(&self) -> Size3 {
        self.size
    }

    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.size.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size.is_empty()
    }

    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        self.size.idx(i, j, k)
    }

    pub fn coord(&self, index: usize) -> (usize, usize, usize) {
        self.size.coord(index)
    }

    pub fn clamp_coord(&self, i: i64, j: i64, k: i64) -> (usize, usize, usize) {
        let max_i = self.size.x as i64 - 1;
        let max_j = self.size.y as i64 - 1;
        let max_k = self.size.z as i64 - 1;
        (
            i.clamp(0, max_i) as usize,
            j.clamp(0, max_j) as usize,
            k.clamp(0, max_k) as usize,
        )
    }

    pub fn position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.origin + self.spacing * DVec3::new(i as f64, j as f64, k as f64)
    }

    /// Continuous index coordinates of a world-space point.
    pub fn grid_coordinates(&self, point: DVec3) -> DVec3 {
        (point - self.origin) / self.spacing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips_through_coord() {
        let size = Size3::new(4, 3, 2);
        let index = size.idx(3, 1, 1);
        assert_eq!(index, 19);
        assert_eq!(size.coord(index), (3, 1, 1));
    }

    #[test]
    fn empty_when_any_axis_is_zero() {
        assert!(Size3::new(4, 0, 2).is_empty());
        assert!(!Size3::new(1, 1, 1).is_empty());
        assert_eq!(Size3::new(4, 0, 2).len(), 0);
    }

    #[test]
    fn clamp_coord_stays_in_range() {
        let grid = DataGrid3::new(Size3::new(3, 3, 3), DVec3::ONE, DVec3::ZERO);
        assert_eq!(grid.clamp_coord(-2, 1, 5), (0, 1, 2));
    }

    #[test]
    fn position_uses_origin_and_spacing() {
        let grid = DataGrid3::new(
            Size3::new(3, 3, 3),
            DVec3::new(0.5, 1.0, 2.0),
            DVec3::new(1.0, -1.0, 0.0),
        );
        assert_eq!(grid.position(2, 1, 1), DVec3::new(2.0, 0.0, 2.0));
    }
}
