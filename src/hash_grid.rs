use crate::error::{Result, SimError};
use crate::grid::Size3;
use crate::parallel::should_parallel;
use glam::{DVec3, I64Vec3};
use rayon::prelude::*;

pub trait PointNeighborSearcher3 {
    fn build(&mut self, points: &[DVec3]);

    fn for_each_nearby_point(
        &self,
        origin: DVec3,
        radius: f64,
        callback: &mut dyn FnMut(usize, DVec3),
    );

    fn has_nearby_point(&self, origin: DVec3, radius: f64) -> bool;
}

/// Uniform bucket grid over wrapped cell coordinates. Points are kept sorted
/// by bucket key so every bucket is a contiguous slice of `points`.
///
/// Queries only visit the 8 buckets around the origin, so they are complete
/// for radii up to half the grid spacing.
#[derive(Clone, Debug)]
pub struct PointHashGridSearcher3 {
    grid_spacing: f64,
    resolution: Size3,
    points: Vec<DVec3>,
    keys: Vec<usize>,
    sorted_indices: Vec<usize>,
    start_index_table: Vec<Option<usize>>,
    end_index_table: Vec<Option<usize>>,
}

impl PointHashGridSearcher3 {
    pub fn new(resolution: Size3, grid_spacing: f64) -> Result<Self> {
        if !grid_spacing.is_finite() || grid_spacing <= 0.0 {
            return Err(SimError::InvalidHashGridSpacing {
                spacing: grid_spacing,
            });
        }
        let resolution = Size3::new(
            resolution.x.max(1),
            resolution.y.max(1),
            resolution.z.max(1),
        );
        Ok(Self {
            grid_spacing,
            resolution,
            points: Vec::new(),
            keys: Vec::new(),
            sorted_indices: Vec::new(),
            start_index_table: Vec::new(),
            end_index_table: Vec::new(),
        })
    }

    pub fn build(&mut self, points: &[DVec3]) {
        self.points.clear();
        self.keys.clear();
        self.sorted_indices.clear();
        self.start_index_table.clear();
        self.end_index_table.clear();
        if points.is_empty() {
            log::debug!("hash grid built from an empty point set");
            return;
        }

        let bucket_count = self.resolution.len();
        self.start_index_table.resize(bucket_count, None);
        self.end_index_table.resize(bucket_count, None);

        let parallel = should_parallel(points.len());
        let unsorted_keys: Vec<usize> = if parallel {
            points
                .par_iter()
                .map(|p| self.hash_key_from_position(*p))
                .collect()
        } else {
            points
                .iter()
                .map(|p| self.hash_key_from_position(*p))
                .collect()
        };

        let mut sorted_indices: Vec<usize> = (0..points.len()).collect();
        if parallel {
            sorted_indices.par_sort_unstable_by_key(|&i| unsorted_keys[i]);
            self.points = sorted_indices.par_iter().map(|&i| points[i]).collect();
            self.keys = sorted_indices.par_iter().map(|&i| unsorted_keys[i]).collect();
        } else {
            sorted_indices.sort_unstable_by_key(|&i| unsorted_keys[i]);
            self.points = sorted_indices.iter().map(|&i| points[i]).collect();
            self.keys = sorted_indices.iter().map(|&i| unsorted_keys[i]).collect();
        }
        self.sorted_indices = sorted_indices;

        let n = self.keys.len();
        self.start_index_table[self.keys[0]] = Some(0);
        self.end_index_table[self.keys[n - 1]] = Some(n);
        for i in 1..n {
            if self.keys[i] > self.keys[i - 1] {
                self.start_index_table[self.keys[i]] = Some(i);
                self.end_index_table[self.keys[i - 1]] = Some(i);
            }
        }

        let mut occupied = 0usize;
        let mut max_per_bucket = 0usize;
        for (start, end) in self.start_index_table.iter().zip(&self.end_index_table) {
            if let (Some(start), Some(end)) = (start, end) {
                occupied += 1;
                max_per_bucket = max_per_bucket.max(end - start);
            }
        }
        log::debug!(
            "hash grid: {} points in {} buckets, average {:.3} max {} per bucket",
            n,
            occupied,
            n as f64 / occupied.max(1) as f64,
            max_per_bucket
        );
    }

    pub fn for_each_nearby_point(
        &self,
        origin: DVec3,
        radius: f64,
        mut callback: impl FnMut(usize, DVec3),
    ) {
        if self.points.is_empty() {
            return;
        }
        let radius_sq = radius * radius;
        for (start, end) in self.nearby_ranges(origin) {
            for j in start..end {
                let point = self.points[j];
                if point.distance_squared(origin) <= radius_sq {
                    callback(self.sorted_indices[j], point);
                }
            }
        }
    }

    pub fn has_nearby_point(&self, origin: DVec3, radius: f64) -> bool {
        if self.points.is_empty() {
            return false;
        }
        let radius_sq = radius * radius;
        self.nearby_ranges(origin).any(|(start, end)| {
            self.points[start..end]
                .iter()
                .any(|point| point.distance_squared(origin) <= radius_sq)
        })
    }

    pub fn bucket_index(&self, position: DVec3) -> I64Vec3 {
        (position / self.grid_spacing).floor().as_i64vec3()
    }

    pub fn hash_key_from_bucket_index(&self, bucket: I64Vec3) -> usize {
        let x = bucket.x.rem_euclid(self.resolution.x as i64) as usize;
        let y = bucket.y.rem_euclid(self.resolution.y as i64) as usize;
        let z = bucket.z.rem_euclid(self.resolution.z as i64) as usize;
        (z * self.resolution.y + y) * self.resolution.x + x
    }

    pub fn hash_key_from_position(&self, position: DVec3) -> usize {
        self.hash_key_from_bucket_index(self.bucket_index(position))
    }

    /// The 8 buckets around `origin`, leaning toward the half of its own
    /// bucket the point falls in.
    pub fn nearby_keys(&self, origin: DVec3) -> [usize; 8] {
        let base = self.bucket_index(origin);
        let center = (base.as_dvec3() + 0.5) * self.grid_spacing;
        let step = |axis_center: f64, axis_origin: f64| -> i64 {
            if axis_center <= axis_origin {
                1
            } else {
                -1
            }
        };
        let offset = I64Vec3::new(
            step(center.x, origin.x),
            step(center.y, origin.y),
            step(center.z, origin.z),
        );
        let mut keys = [0usize; 8];
        for (n, key) in keys.iter_mut().enumerate() {
            let mut bucket = base;
            if n & 4 != 0 {
                bucket.x += offset.x;
            }
            if n & 2 != 0 {
                bucket.y += offset.y;
            }
            if n & 1 != 0 {
                bucket.z += offset.z;
            }
            *key = self.hash_key_from_bucket_index(bucket);
        }
        keys
    }

    fn nearby_ranges(&self, origin: DVec3) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut keys = self.nearby_keys(origin);
        keys.sort_unstable();
        keys.into_iter()
            .enumerate()
            .filter(move |(n, key)| *n == 0 || keys[n - 1] != *key)
            .filter_map(move |(_, key)| {
                match (self.start_index_table[key], self.end_index_table[key]) {
                    (Some(start), Some(end)) => Some((start, end)),
                    _ => None,
                }
            })
    }

    pub fn grid_spacing(&self) -> f64 {
        self.grid_spacing
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    pub fn keys(&self) -> &[usize] {
        &self.keys
    }

    pub fn sorted_indices(&self) -> &[usize] {
        &self.sorted_indices
    }

    pub fn start_index_table(&self) -> &[Option<usize>] {
        &self.start_index_table
    }

    pub fn end_index_table(&self) -> &[Option<usize>] {
        &self.end_index_table
    }
}

impl PointNeighborSearcher3 for PointHashGridSearcher3 {
    fn build(&mut self, points: &[DVec3]) {
        PointHashGridSearcher3::build(self, points);
    }

    fn for_each_nearby_point(
        &self,
        origin: DVec3,
        radius: f64,
        callback: &mut dyn FnMut(usize, DVec3),
    ) {
        PointHashGridSearcher3::for_each_nearby_point(self, origin, radius, callback);
    }

    fn has_nearby_point(&self, origin: DVec3, radius: f64) -> bool {
        PointHashGridSearcher3::has_nearby_point(self, origin, radius)
    }
}

/// Linear scan over every point.
#[derive(Clone, Debug, Default)]
pub struct PointListSearcher3 {
    points: Vec<DVec3>,
}

impl PointListSearcher3 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[DVec3] {
        &self.points
    }
}

impl PointNeighborSearcher3 for PointListSearcher3 {
    fn build(&mut self, points: &[DVec3]) {
        self.points.clear();
        self.points.extend_from_slice(points);
    }

    fn for_each_nearby_point(
        &self,
        origin: DVec3,
        radius: f64,
        callback: &mut dyn FnMut(usize, DVec3),
    ) {
        let radius_sq = radius * radius;
        for (i, point) in self.points.iter().enumerate() {
            if point.distance_squared(origin) <= radius_sq {
                callback(i, *point);
            }
        }
    }

    fn has_nearby_point(&self, origin: DVec3, radius: f64) -> bool {
        let radius_sq = radius * radius;
        self.points
            .iter()
            .any(|point| point.distance_squared(origin) <= radius_sq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scattered_points(count: usize) -> Vec<DVec3> {
        let mut state = 0x2545_f491_u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % 10_000) as f64 / 10_000.0
        };
        (0..count)
            .map(|_| DVec3::new(next() * 6.0 - 3.0, next() * 6.0 - 3.0, next() * 6.0 - 3.0))
            .collect()
    }

    fn neighbors(searcher: &dyn PointNeighborSearcher3, origin: DVec3, radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        searcher.for_each_nearby_point(origin, radius, &mut |i, _| found.push(i));
        found.sort_unstable();
        found
    }

    #[test]
    fn rejects_non_positive_spacing() {
        assert!(PointHashGridSearcher3::new(Size3::new(4, 4, 4), 0.0).is_err());
        assert!(PointHashGridSearcher3::new(Size3::new(4, 4, 4), f64::NAN).is_err());
    }

    #[test]
    fn zero_resolution_is_clamped() {
        let searcher = PointHashGridSearcher3::new(Size3::new(0, 3, 0), 1.0).unwrap();
        assert_eq!(searcher.resolution(), Size3::new(1, 3, 1));
    }

    #[test]
    fn negative_buckets_wrap() {
        let searcher = PointHashGridSearcher3::new(Size3::new(4, 4, 4), 1.0).unwrap();
        assert_eq!(searcher.hash_key_from_bucket_index(I64Vec3::new(-1, 0, 0)), 3);
        assert_eq!(searcher.hash_key_from_bucket_index(I64Vec3::new(0, -1, 0)), 12);
        assert_eq!(searcher.hash_key_from_bucket_index(I64Vec3::new(5, 4, -4)), 1);
    }

    #[test]
    fn empty_build_answers_nothing() {
        let mut searcher = PointHashGridSearcher3::new(Size3::new(4, 4, 4), 1.0).unwrap();
        searcher.build(&[]);
        assert!(searcher.start_index_table().is_empty());
        assert!(!searcher.has_nearby_point(DVec3::ZERO, 10.0));
        assert!(neighbors(&searcher, DVec3::ZERO, 10.0).is_empty());
    }

    #[test]
    fn buckets_hold_exactly_their_points() {
        let points = scattered_points(500);
        let mut searcher = PointHashGridSearcher3::new(Size3::new(5, 4, 3), 0.7).unwrap();
        searcher.build(&points);

        let mut seen = searcher.sorted_indices().to_vec();
        seen.sort_unstable();
        assert_eq!(seen, (0..points.len()).collect::<Vec<_>>());
        assert!(searcher.keys().windows(2).all(|w| w[0] <= w[1]));

        for key in 0..searcher.resolution().len() {
            let expected = points
                .iter()
                .filter(|p| searcher.hash_key_from_position(**p) == key)
                .count();
            match (searcher.start_index_table()[key], searcher.end_index_table()[key]) {
                (Some(start), Some(end)) => {
                    assert_eq!(end - start, expected);
                    assert!(searcher.keys()[start..end].iter().all(|k| *k == key));
                }
                (None, None) => assert_eq!(expected, 0),
                _ => panic!("bucket {key} has a half-filled table entry"),
            }
        }
        for (j, original) in searcher.sorted_indices().iter().enumerate() {
            assert_eq!(searcher.points()[j], points[*original]);
        }
    }

    #[test]
    fn queries_match_brute_force() {
        let points = scattered_points(400);
        let mut hash = PointHashGridSearcher3::new(Size3::new(4, 4, 4), 1.0).unwrap();
        let mut list = PointListSearcher3::new();
        hash.build(&points);
        list.build(&points);
        for origin in scattered_points(30) {
            let expected = neighbors(&list, origin, 0.5);
            assert_eq!(neighbors(&hash, origin, 0.5), expected);
            assert_eq!(hash.has_nearby_point(origin, 0.5), !expected.is_empty());
        }
    }

    #[test]
    fn tiny_resolution_reports_each_point_once() {
        let points = scattered_points(100);
        let mut hash = PointHashGridSearcher3::new(Size3::new(1, 2, 1), 1.0).unwrap();
        let mut list = PointListSearcher3::new();
        hash.build(&points);
        list.build(&points);
        let origin = DVec3::new(0.2, -0.4, 0.1);
        assert_eq!(neighbors(&hash, origin, 0.5), neighbors(&list, origin, 0.5));
    }

    #[test]
    fn radius_is_inclusive() {
        let mut hash = PointHashGridSearcher3::new(Size3::new(4, 4, 4), 1.0).unwrap();
        hash.build(&[DVec3::new(0.5, 0.0, 0.0)]);
        assert!(hash.has_nearby_point(DVec3::ZERO, 0.5));
        assert!(!hash.has_nearby_point(DVec3::ZERO, 0.49));
    }
}
