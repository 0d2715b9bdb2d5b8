use crate::grid::{DataGrid3, Size3};
use glam::DVec3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("grid spacing must be finite and positive, got {spacing}")]
    InvalidGridSpacing { spacing: DVec3 },

    #[error("hash grid spacing must be finite and positive, got {spacing}")]
    InvalidHashGridSpacing { spacing: f64 },

    #[error("{operation}: grids differ ({expected:?} vs {found:?} samples)")]
    GridMismatch {
        operation: &'static str,
        expected: Size3,
        found: Size3,
    },

    #[error("{operation}: expected {expected} values, got {found}")]
    LengthMismatch {
        operation: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("velocity field is not finite (cfl = {cfl})")]
    NonFiniteVelocity { cfl: f64 },

    #[error("no advectable scalar layer at index {index}")]
    UnknownLayer { index: usize },

    #[error("invalid solver configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

pub(crate) fn validate_grid_spacing(spacing: DVec3) -> Result<()> {
    if spacing.is_finite() && spacing.min_element() > 0.0 {
        Ok(())
    } else {
        Err(SimError::InvalidGridSpacing { spacing })
    }
}

pub(crate) fn ensure_same_grid(operation: &'static str, expected: DataGrid3, found: DataGrid3) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SimError::GridMismatch {
            operation,
            expected: expected.size(),
            found: found.size(),
        })
    }
}

pub(crate) fn ensure_len(operation: &'static str, expected: usize, found: usize) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SimError::LengthMismatch {
            operation,
            expected,
            found,
        })
    }
}
