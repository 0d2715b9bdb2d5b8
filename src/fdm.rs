use crate::grid::Size3;
use crate::parallel::{self, for_each_indexed};

pub trait LinearOperator: Sync {
    fn len(&self) -> usize;

    fn apply(&self, x: &[f64], out: &mut [f64]);

    fn diagonal(&self, row: usize) -> f64;
}

/// One row of the symmetric 7-point stencil. Only the positive-direction
/// neighbours are stored; the negative ones come from the previous rows.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FdmMatrixRow3 {
    pub center: f64,
    pub right: f64,
    pub up: f64,
    pub front: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FdmMatrix3 {
    size: Size3,
    rows: Vec<FdmMatrixRow3>,
}

impl FdmMatrix3 {
    pub fn new(size: Size3) -> Self {
        Self {
            size,
            rows: vec![FdmMatrixRow3::default(); size.len()],
        }
    }

    pub fn size(&self) -> Size3 {
        self.size
    }

    pub fn rows(&self) -> &[FdmMatrixRow3] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [FdmMatrixRow3] {
        &mut self.rows
    }

    pub fn row(&self, i: usize, j: usize, k: usize) -> &FdmMatrixRow3 {
        &self.rows[self.size.idx(i, j, k)]
    }

    pub fn row_mut(&mut self, i: usize, j: usize, k: usize) -> &mut FdmMatrixRow3 {
        let index = self.size.idx(i, j, k);
        &mut self.rows[index]
    }
}

impl LinearOperator for FdmMatrix3 {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        let size = self.size;
        let rows = &self.rows;
        let stride_y = size.x;
        let stride_z = size.x * size.y;
        for_each_indexed(out, |index, value| {
            let (i, j, k) = size.coord(index);
            let row = &rows[index];
            let mut sum = row.center * x[index];
            if i + 1 < size.x {
                sum += row.right * x[index + 1];
            }
            if i > 0 {
                sum += rows[index - 1].right * x[index - 1];
            }
            if j + 1 < size.y {
                sum += row.up * x[index + stride_y];
            }
            if j > 0 {
                sum += rows[index - stride_y].up * x[index - stride_y];
            }
            if k + 1 < size.z {
                sum += row.front * x[index + stride_z];
            }
            if k > 0 {
                sum += rows[index - stride_z].front * x[index - stride_z];
            }
            *value = sum;
        });
    }

    fn diagonal(&self, row: usize) -> f64 {
        self.rows[row].center
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FdmLinearSystem3 {
    pub a: FdmMatrix3,
    pub x: Vec<f64>,
    pub b: Vec<f64>,
}

impl FdmLinearSystem3 {
    pub fn new(size: Size3) -> Self {
        Self {
            a: FdmMatrix3::new(size),
            x: vec![0.0; size.len()],
            b: vec![0.0; size.len()],
        }
    }

    pub fn size(&self) -> Size3 {
        self.a.size()
    }

    pub fn resize(&mut self, size: Size3) {
        if self.a.size() != size {
            *self = Self::new(size);
        } else {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.a.rows.fill(FdmMatrixRow3::default());
        self.x.fill(0.0);
        self.b.fill(0.0);
    }
}

/// Compressed sparse row matrix, filled one row at a time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatrixCsr {
    cols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl MatrixCsr {
    pub fn new(cols: usize) -> Self {
        Self {
            cols,
            row_ptr: vec![0],
            col_idx: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn clear(&mut self, cols: usize) {
        self.cols = cols;
        self.row_ptr.clear();
        self.row_ptr.push(0);
        self.col_idx.clear();
        self.values.clear();
    }

    pub fn add_row(&mut self, entries: &[(usize, f64)]) {
        for &(col, value) in entries {
            debug_assert!(col < self.cols, "column {col} out of range");
            self.col_idx.push(col);
            self.values.push(value);
        }
        self.row_ptr.push(self.col_idx.len());
    }

    pub fn n_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.row_ptr[row]..self.row_ptr[row + 1];
        self.col_idx[range.clone()]
            .iter()
            .zip(&self.values[range])
            .filter(|(c, _)| **c == col)
            .map(|(_, value)| *value)
            .sum()
    }

    pub fn mul_vec(&self, x: &[f64], out: &mut [f64]) {
        let row_ptr = &self.row_ptr;
        let col_idx = &self.col_idx;
        let values = &self.values;
        for_each_indexed(out, |row, value| {
            let mut sum = 0.0;
            for n in row_ptr[row]..row_ptr[row + 1] {
                sum += values[n] * x[col_idx[n]];
            }
            *value = sum;
        });
    }
}

impl LinearOperator for MatrixCsr {
    fn len(&self) -> usize {
        self.n_rows()
    }

    fn apply(&self, x: &[f64], out: &mut [f64]) {
        self.mul_vec(x, out);
    }

    fn diagonal(&self, row: usize) -> f64 {
        self.get(row, row)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FdmCompressedLinearSystem3 {
    pub a: MatrixCsr,
    pub x: Vec<f64>,
    pub b: Vec<f64>,
}

impl FdmCompressedLinearSystem3 {
    pub fn new() -> Self {
        Self {
            a: MatrixCsr::new(0),
            x: Vec::new(),
            b: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.a.clear(0);
        self.x.clear();
        self.b.clear();
    }
}

pub(crate) fn residual_into<A: LinearOperator>(a: &A, x: &[f64], b: &[f64], out: &mut [f64]) {
    a.apply(x, out);
    for_each_indexed(out, |i, value| *value = b[i] - *value);
}

pub(crate) fn residual_norm<A: LinearOperator>(a: &A, x: &[f64], b: &[f64], scratch: &mut [f64]) -> f64 {
    residual_into(a, x, b, scratch);
    parallel::max_abs(scratch)
}
