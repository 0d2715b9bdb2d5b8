use crate::error::{ensure_len, ensure_same_grid, Result};
use crate::field::ScalarGrid3;
use crate::parallel;
use glam::I64Vec3;

pub const EPSILON: f64 = 1e-12;
pub const MAX_DISTANCE: f64 = f64::MAX;

pub fn is_inside_sdf(phi: f64) -> bool {
    phi < 0.0
}

/// Length fraction of the segment between two SDF samples that lies inside.
pub fn fraction_inside_sdf(phi0: f64, phi1: f64) -> f64 {
    match (is_inside_sdf(phi0), is_inside_sdf(phi1)) {
        (true, true) => 1.0,
        (true, false) => phi0 / (phi0 - phi1),
        (false, true) => phi1 / (phi1 - phi0),
        (false, false) => 0.0,
    }
}

/// Area fraction of a square face that lies inside, from its corner samples.
pub fn fraction_inside(bottom_left: f64, bottom_right: f64, top_left: f64, top_right: f64) -> f64 {
    let mut corners = [bottom_left, bottom_right, top_right, top_left];
    let inside_count = corners.iter().filter(|phi| is_inside_sdf(**phi)).count();
    match inside_count {
        4 => 1.0,
        3 => {
            while is_inside_sdf(corners[0]) {
                corners.rotate_left(1);
            }
            let side0 = 1.0 - fraction_inside_sdf(corners[0], corners[3]);
            let side1 = 1.0 - fraction_inside_sdf(corners[0], corners[1]);
            1.0 - 0.5 * side0 * side1
        }
        2 => {
            while !is_inside_sdf(corners[0]) {
                corners.rotate_left(1);
            }
            if is_inside_sdf(corners[2]) {
                let middle: f64 = corners.iter().map(|phi| 0.25 * phi).sum();
                if is_inside_sdf(middle) {
                    let outside_a = (1.0 - fraction_inside_sdf(corners[0], corners[3]))
                        * (1.0 - fraction_inside_sdf(corners[2], corners[3]));
                    let outside_b = (1.0 - fraction_inside_sdf(corners[2], corners[1]))
                        * (1.0 - fraction_inside_sdf(corners[0], corners[1]));
                    1.0 - 0.5 * (outside_a + outside_b)
                } else {
                    let inside_a = fraction_inside_sdf(corners[0], corners[1])
                        * fraction_inside_sdf(corners[0], corners[3]);
                    let inside_b = fraction_inside_sdf(corners[2], corners[1])
                        * fraction_inside_sdf(corners[2], corners[3]);
                    0.5 * (inside_a + inside_b)
                }
            } else {
                if !is_inside_sdf(corners[1]) {
                    corners.rotate_left(3);
                }
                let side_left = fraction_inside_sdf(corners[0], corners[3]);
                let side_right = fraction_inside_sdf(corners[1], corners[2]);
                0.5 * (side_left + side_right)
            }
        }
        1 => {
            while !is_inside_sdf(corners[0]) {
                corners.rotate_left(1);
            }
            let side0 = fraction_inside_sdf(corners[0], corners[3]);
            let side1 = fraction_inside_sdf(corners[0], corners[1]);
            0.5 * side0 * side1
        }
        _ => 0.0,
    }
}

/// Pushes values from `valid` samples into neighbouring invalid ones, one ring
/// per pass. Each newly reached sample takes the mean of its valid 6-neighbours.
pub fn extrapolate_to_region(
    input: &ScalarGrid3,
    valid: &[bool],
    depth: usize,
    output: &mut ScalarGrid3,
) -> Result<()> {
    ensure_same_grid("extrapolate_to_region", input.grid(), output.grid())?;
    ensure_len("extrapolate_to_region", input.data().len(), valid.len())?;
    output.data_mut().copy_from_slice(input.data());
    extrapolate_in_place(output, valid, depth);
    Ok(())
}

/// Same as [`extrapolate_to_region`] for a marker list already known to
/// match `grid`.
pub(crate) fn extrapolate_in_place(grid: &mut ScalarGrid3, valid: &[bool], depth: usize) {
    let size = grid.size();
    let mut values = grid.data().to_vec();
    let mut mask = valid.to_vec();
    for _ in 0..depth {
        let next: Vec<(f64, bool)> = parallel::collect_indexed(values.len(), |index| {
            if mask[index] {
                return (values[index], true);
            }
            let (i, j, k) = size.coord(index);
            let mut sum = 0.0;
            let mut count = 0usize;
            let mut visit = |neighbor: usize| {
                if mask[neighbor] {
                    sum += values[neighbor];
                    count += 1;
                }
            };
            if i > 0 {
                visit(index - 1);
            }
            if i + 1 < size.x {
                visit(index + 1);
            }
            if j > 0 {
                visit(index - size.x);
            }
            if j + 1 < size.y {
                visit(index + size.x);
            }
            if k > 0 {
                visit(index - size.x * size.y);
            }
            if k + 1 < size.z {
                visit(index + size.x * size.y);
            }
            if count > 0 {
                (sum / count as f64, true)
            } else {
                (values[index], false)
            }
        });
        let mut grew = false;
        for (index, (value, now_valid)) in next.into_iter().enumerate() {
            grew |= now_valid && !mask[index];
            values[index] = value;
            mask[index] = now_valid;
        }
        if !grew {
            break;
        }
    }
    grid.data_mut().copy_from_slice(&values);
}

/// Liquid share of a sample whose interface is smeared over `band` on each
/// side: 1 deep inside, 0 far outside.
pub fn smeared_heaviside(phi: f64, band: f64) -> f64 {
    if band <= 0.0 {
        return if is_inside_sdf(phi) { 1.0 } else { 0.0 };
    }
    let t = ((phi + band) / (2.0 * band)).clamp(0.0, 1.0);
    1.0 - t * t * (3.0 - 2.0 * t)
}

/// Pulls `phi` back toward a signed distance field by pseudo-time
/// iterations of `phi_t = sign(phi0) (1 - |grad phi|)`, keeping the zero
/// crossing where it is.
pub fn reinitialize(phi: &ScalarGrid3, iterations: usize, pseudo_time_step: f64) -> ScalarGrid3 {
    if iterations == 0 || pseudo_time_step == 0.0 || phi.data().is_empty() {
        return phi.clone();
    }
    let h = phi.grid().spacing().min_element();
    let sign: Vec<f64> = phi.data().iter().map(|value| smooth_sign(*value, h)).collect();
    let mut current = phi.clone();
    for _ in 0..iterations {
        let previous = current.clone();
        let sign = &sign;
        current.update_with_index(|i, j, k, value| {
            let s = sign[previous.grid().idx(i, j, k)];
            if s == 0.0 || !s.is_finite() {
                return value;
            }
            let grad = godunov_gradient(&previous, I64Vec3::new(i as i64, j as i64, k as i64), s);
            value - pseudo_time_step * s * (grad - 1.0)
        });
    }
    current
}

fn smooth_sign(value: f64, h: f64) -> f64 {
    value / (value * value + h * h).sqrt()
}

fn godunov_gradient(phi: &ScalarGrid3, c: I64Vec3, sign: f64) -> f64 {
    let spacing = phi.grid().spacing();
    let center = phi.get_clamped(c.x, c.y, c.z);
    let mut sum = 0.0;
    for (axis, step) in [I64Vec3::X, I64Vec3::Y, I64Vec3::Z].into_iter().enumerate() {
        let (up, down) = (c + step, c - step);
        let forward = (phi.get_clamped(up.x, up.y, up.z) - center) / spacing[axis];
        let backward = (center - phi.get_clamped(down.x, down.y, down.z)) / spacing[axis];
        sum += if sign > 0.0 {
            backward.max(0.0).powi(2) + forward.min(0.0).powi(2)
        } else {
            forward.max(0.0).powi(2) + backward.min(0.0).powi(2)
        };
    }
    sum.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Size3;
    use glam::DVec3;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    #[test]
    fn segment_fraction_cases() {
        assert_close(fraction_inside_sdf(-1.0, -2.0), 1.0, 1e-12);
        assert_close(fraction_inside_sdf(1.0, 2.0), 0.0, 1e-12);
        assert_close(fraction_inside_sdf(-1.0, 3.0), 0.25, 1e-12);
        assert_close(fraction_inside_sdf(3.0, -1.0), 0.25, 1e-12);
    }

    #[test]
    fn face_fraction_corner_cases() {
        assert_close(fraction_inside(-1.0, -1.0, -1.0, -1.0), 1.0, 1e-12);
        assert_close(fraction_inside(1.0, 1.0, 1.0, 1.0), 0.0, 1e-12);
        // one corner inside, cut through both edge midpoints
        assert_close(fraction_inside(-1.0, 1.0, 1.0, 1.0), 0.125, 1e-12);
        // three corners inside mirrors the single-corner case
        assert_close(fraction_inside(1.0, -1.0, -1.0, -1.0), 0.875, 1e-12);
        // bottom edge inside, horizontal cut halfway up
        assert_close(fraction_inside(-1.0, -1.0, 1.0, 1.0), 0.5, 1e-12);
        // left edge inside
        assert_close(fraction_inside(-1.0, 1.0, -1.0, 1.0), 0.5, 1e-12);
    }

    #[test]
    fn diagonal_corners_use_center_sample() {
        let outside_center = fraction_inside(-1.0, 3.0, 3.0, -1.0);
        assert_close(outside_center, 0.0625, 1e-12);
        let inside_center = fraction_inside(-3.0, 1.0, 1.0, -3.0);
        assert_close(inside_center, 1.0 - 0.0625, 1e-12);
    }

    #[test]
    fn extrapolation_fills_by_depth() {
        let mut input = ScalarGrid3::cell_centered(Size3::new(5, 1, 1), DVec3::ONE, DVec3::ZERO, 0.0);
        input.set(0, 0, 0, 2.0);
        let valid = vec![true, false, false, false, false];
        let mut output = input.clone();
        extrapolate_to_region(&input, &valid, 2, &mut output).unwrap();
        assert_eq!(output.data(), &[2.0, 2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn extrapolation_averages_valid_neighbors() {
        let mut input = ScalarGrid3::cell_centered(Size3::new(3, 1, 1), DVec3::ONE, DVec3::ZERO, 0.0);
        input.set(0, 0, 0, 1.0);
        input.set(2, 0, 0, 3.0);
        let valid = vec![true, false, true];
        let mut output = input.clone();
        extrapolate_to_region(&input, &valid, 1, &mut output).unwrap();
        assert_close(output.get(1, 0, 0), 2.0, 1e-12);
    }

    #[test]
    fn extrapolation_rejects_short_marker_list() {
        let input = ScalarGrid3::cell_centered(Size3::new(3, 1, 1), DVec3::ONE, DVec3::ZERO, 1.0);
        let mut output = input.clone();
        let result = extrapolate_to_region(&input, &[true, false], 1, &mut output);
        assert!(matches!(
            result,
            Err(crate::error::SimError::LengthMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn heaviside_is_smooth_across_the_band() {
        assert_eq!(smeared_heaviside(-2.0, 1.0), 1.0);
        assert_eq!(smeared_heaviside(2.0, 1.0), 0.0);
        assert_close(smeared_heaviside(0.0, 1.0), 0.5, 1e-12);
        assert_close(smeared_heaviside(-0.5, 1.0) + smeared_heaviside(0.5, 1.0), 1.0, 1e-12);
        assert_eq!(smeared_heaviside(-0.1, 0.0), 1.0);
    }

    #[test]
    fn reinitialization_keeps_distance_field() {
        let grid = crate::field::DataLayout::CellCentered.data_grid(Size3::new(4, 6, 3), DVec3::ONE, DVec3::ZERO);
        let phi = ScalarGrid3::from_fn(grid, |_, j, _| j as f64 - 2.5);
        let redistanced = reinitialize(&phi, 5, 0.3);
        for j in 0..6 {
            assert_close(redistanced.get(2, j, 1), phi.get(2, j, 1), 1e-9);
        }
    }

    #[test]
    fn reinitialization_flattens_steep_field() {
        let grid = crate::field::DataLayout::CellCentered.data_grid(Size3::new(8, 1, 1), DVec3::ONE, DVec3::ZERO);
        let phi = ScalarGrid3::from_fn(grid, |i, _, _| 3.0 * (i as f64 - 3.5));
        let redistanced = reinitialize(&phi, 40, 0.3);
        assert!(redistanced.get(4, 0, 0) > 0.0);
        assert!(redistanced.get(3, 0, 0) < 0.0);
        let slope = redistanced.get(5, 0, 0) - redistanced.get(4, 0, 0);
        assert!((slope - 1.0).abs() < 0.2, "slope {slope} not near unit");
    }
}
