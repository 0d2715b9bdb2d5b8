use crate::error::{ensure_len, Result};
use crate::fdm::{residual_into, residual_norm, FdmCompressedLinearSystem3, FdmLinearSystem3, LinearOperator};
use crate::parallel::{dot, for_each_indexed};
use serde::{Deserialize, Serialize};

const BREAKDOWN_EPSILON: f64 = 1e-300;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearSolverKind {
    Cg,
    #[default]
    Pcg,
    Jacobi,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverConfig {
    pub kind: LinearSolverKind,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub residual_check_interval: usize,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            kind: LinearSolverKind::Pcg,
            max_iterations: 100,
            tolerance: 1e-12,
            residual_check_interval: 10,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct CgWorkspace {
    r: Vec<f64>,
    z: Vec<f64>,
    d: Vec<f64>,
    q: Vec<f64>,
    inv_diag: Vec<f64>,
}

impl CgWorkspace {
    fn resize(&mut self, len: usize) {
        self.r.resize(len, 0.0);
        self.z.resize(len, 0.0);
        self.d.resize(len, 0.0);
        self.q.resize(len, 0.0);
        self.inv_diag.resize(len, 0.0);
    }
}

/// Iterative solver for the symmetric systems built by the diffusion and
/// pressure solvers. Hitting the iteration cap is not an error: `x` keeps the
/// last iterate and the diagnostics report how far it got.
#[derive(Clone, Debug)]
pub struct LinearSystemSolver {
    config: LinearSolverConfig,
    last_number_of_iterations: usize,
    last_residual: f64,
    workspace: CgWorkspace,
}

impl Default for LinearSystemSolver {
    fn default() -> Self {
        Self::new(LinearSolverConfig::default())
    }
}

impl LinearSystemSolver {
    pub fn new(config: LinearSolverConfig) -> Self {
        Self {
            config: LinearSolverConfig {
                residual_check_interval: config.residual_check_interval.max(1),
                tolerance: config.tolerance.max(0.0),
                ..config
            },
            last_number_of_iterations: 0,
            last_residual: f64::MAX,
            workspace: CgWorkspace::default(),
        }
    }

    pub fn config(&self) -> LinearSolverConfig {
        self.config
    }

    pub fn kind(&self) -> LinearSolverKind {
        self.config.kind
    }

    pub fn max_number_of_iterations(&self) -> usize {
        self.config.max_iterations
    }

    pub fn tolerance(&self) -> f64 {
        self.config.tolerance
    }

    pub fn last_number_of_iterations(&self) -> usize {
        self.last_number_of_iterations
    }

    pub fn last_residual(&self) -> f64 {
        self.last_residual
    }

    /// Returns whether the residual reached the tolerance. Mismatched
    /// vector lengths are an error.
    pub fn solve(&mut self, system: &mut FdmLinearSystem3) -> Result<bool> {
        self.solve_operator(&system.a, &system.b, &mut system.x)
    }

    pub fn solve_compressed(&mut self, system: &mut FdmCompressedLinearSystem3) -> Result<bool> {
        self.solve_operator(&system.a, &system.b, &mut system.x)
    }

    pub fn solve_operator<A: LinearOperator>(&mut self, a: &A, b: &[f64], x: &mut [f64]) -> Result<bool> {
        ensure_len("linear solve rhs", a.len(), b.len())?;
        ensure_len("linear solve solution", a.len(), x.len())?;
        self.workspace.resize(a.len());
        let (iterations, residual) = match self.config.kind {
            LinearSolverKind::Cg => self.conjugate_gradient(a, b, x, false),
            LinearSolverKind::Pcg => self.conjugate_gradient(a, b, x, true),
            LinearSolverKind::Jacobi => self.jacobi(a, b, x),
        };
        self.last_number_of_iterations = iterations;
        self.last_residual = residual;
        let converged = residual <= self.config.tolerance;
        if !converged {
            log::warn!(
                "{:?} solver stopped after {} iterations with residual {:e}",
                self.config.kind,
                iterations,
                residual
            );
        }
        Ok(converged)
    }

    fn conjugate_gradient<A: LinearOperator>(
        &mut self,
        a: &A,
        b: &[f64],
        x: &mut [f64],
        preconditioned: bool,
    ) -> (usize, f64) {
        let tolerance = self.config.tolerance;
        let max_iterations = self.config.max_iterations;
        let CgWorkspace {
            r,
            z,
            d,
            q,
            inv_diag,
        } = &mut self.workspace;

        for_each_indexed(inv_diag, |i, value| {
            let diagonal = a.diagonal(i);
            *value = if preconditioned && diagonal.abs() > BREAKDOWN_EPSILON {
                1.0 / diagonal
            } else {
                1.0
            };
        });

        residual_into(a, x, b, r);
        let initial = crate::parallel::max_abs(r);
        if initial <= tolerance || max_iterations == 0 {
            return (0, initial);
        }
        precondition(r, inv_diag, z);
        d.copy_from_slice(z);
        let mut sigma = dot(r, z);

        let mut iterations = 0;
        while iterations < max_iterations {
            a.apply(d, q);
            let denom = dot(d, q);
            if denom.abs() < BREAKDOWN_EPSILON {
                break;
            }
            let alpha = sigma / denom;
            for_each_indexed(x, |i, value| *value += alpha * d[i]);
            for_each_indexed(r, |i, value| *value -= alpha * q[i]);
            iterations += 1;

            let norm = crate::parallel::max_abs(r);
            log::trace!("cg iteration {iterations}: residual {norm:e}");
            if norm <= tolerance {
                break;
            }
            precondition(r, inv_diag, z);
            let sigma_new = dot(r, z);
            let beta = sigma_new / sigma;
            for_each_indexed(d, |i, value| *value = z[i] + beta * *value);
            sigma = sigma_new;
        }
        (iterations, residual_norm(a, x, b, q))
    }

    fn jacobi<A: LinearOperator>(&mut self, a: &A, b: &[f64], x: &mut [f64]) -> (usize, f64) {
        let tolerance = self.config.tolerance;
        let check_interval = self.config.residual_check_interval;
        let CgWorkspace { r, q, .. } = &mut self.workspace;

        let mut residual = residual_norm(a, x, b, r);
        let mut iterations = 0;
        while iterations < self.config.max_iterations && residual > tolerance {
            residual_into(a, x, b, r);
            for_each_indexed(x, |i, value| {
                let diagonal = a.diagonal(i);
                if diagonal.abs() > BREAKDOWN_EPSILON {
                    *value += r[i] / diagonal;
                }
            });
            iterations += 1;
            if iterations % check_interval == 0 || iterations == self.config.max_iterations {
                residual = residual_norm(a, x, b, q);
                log::trace!("jacobi iteration {iterations}: residual {residual:e}");
            }
        }
        (iterations, residual)
    }
}

fn precondition(r: &[f64], inv_diag: &[f64], z: &mut [f64]) {
    for_each_indexed(z, |i, value| *value = inv_diag[i] * r[i]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdm::MatrixCsr;
    use crate::grid::Size3;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol,
            "expected {a} to be within {tol} of {b}"
        );
    }

    fn small_system() -> FdmCompressedLinearSystem3 {
        let mut system = FdmCompressedLinearSystem3::new();
        system.a.clear(2);
        system.a.add_row(&[(0, 4.0), (1, 1.0)]);
        system.a.add_row(&[(0, 1.0), (1, 3.0)]);
        system.b = vec![1.0, 2.0];
        system.x = vec![0.0, 0.0];
        system
    }

    fn laplacian_system(size: Size3) -> FdmLinearSystem3 {
        let mut system = FdmLinearSystem3::new(size);
        for index in 0..size.len() {
            let (i, j, k) = size.coord(index);
            let row = system.a.row_mut(i, j, k);
            row.center = 7.0;
            if i + 1 < size.x {
                row.right = -1.0;
            }
            if j + 1 < size.y {
                row.up = -1.0;
            }
            if k + 1 < size.z {
                row.front = -1.0;
            }
            system.b[index] = (index % 5) as f64 - 2.0;
        }
        system
    }

    #[test]
    fn cg_solves_two_by_two() {
        let mut system = small_system();
        let mut solver = LinearSystemSolver::new(LinearSolverConfig {
            kind: LinearSolverKind::Cg,
            ..Default::default()
        });
        assert!(solver.solve_compressed(&mut system).unwrap());
        assert_close(system.x[0], 1.0 / 11.0, 1e-12);
        assert_close(system.x[1], 7.0 / 11.0, 1e-12);
        assert!(solver.last_number_of_iterations() <= 2);
    }

    #[test]
    fn zero_iterations_report_initial_residual() {
        let mut system = small_system();
        let mut solver = LinearSystemSolver::new(LinearSolverConfig {
            kind: LinearSolverKind::Cg,
            max_iterations: 0,
            ..Default::default()
        });
        assert!(!solver.solve_compressed(&mut system).unwrap());
        assert_eq!(system.x, vec![0.0, 0.0]);
        assert_eq!(solver.last_number_of_iterations(), 0);
        assert_close(solver.last_residual(), 2.0, 1e-12);
    }

    #[test]
    fn pcg_and_jacobi_agree_on_stencil_system() {
        let size = Size3::new(4, 3, 2);
        let mut pcg_system = laplacian_system(size);
        let mut jacobi_system = pcg_system.clone();

        let mut pcg = LinearSystemSolver::default();
        assert!(pcg.solve(&mut pcg_system).unwrap());

        let mut jacobi = LinearSystemSolver::new(LinearSolverConfig {
            kind: LinearSolverKind::Jacobi,
            max_iterations: 500,
            tolerance: 1e-10,
            residual_check_interval: 5,
        });
        assert!(jacobi.solve(&mut jacobi_system).unwrap());
        assert!(jacobi.last_residual() <= 1e-10);
        for (a, b) in pcg_system.x.iter().zip(&jacobi_system.x) {
            assert_close(*a, *b, 1e-9);
        }
    }

    #[test]
    fn capped_iterations_keep_best_effort_solution() {
        let size = Size3::new(6, 6, 6);
        let mut system = laplacian_system(size);
        let mut solver = LinearSystemSolver::new(LinearSolverConfig {
            kind: LinearSolverKind::Jacobi,
            max_iterations: 2,
            tolerance: 1e-14,
            residual_check_interval: 1,
        });
        let initial = system.b.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(!solver.solve(&mut system).unwrap());
        assert_eq!(solver.last_number_of_iterations(), 2);
        assert!(solver.last_residual() < initial);
    }

    #[test]
    fn mismatched_rhs_is_rejected() {
        let mut system = small_system();
        system.b.push(0.0);
        let mut solver = LinearSystemSolver::default();
        assert!(matches!(
            solver.solve_compressed(&mut system),
            Err(crate::error::SimError::LengthMismatch { expected: 2, found: 3, .. })
        ));
        assert_eq!(system.x, vec![0.0, 0.0]);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config: LinearSolverConfig =
            serde_json::from_str(r#"{"kind":"Jacobi","max_iterations":7}"#).unwrap();
        assert_eq!(config.kind, LinearSolverKind::Jacobi);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.tolerance, 1e-12);
    }
}
