//! Sparse direct solver facade.
//!
//! Wraps the LU decomposition from the [`faer`](https://github.com/sarah-ek/faer-rs)
//! library behind the three-phase contract the integrator needs: symbolic
//! analysis once per sparsity pattern (keyed by the `(ia, ja)` fingerprint),
//! numeric factorization whenever values change, and a triangular solve per
//! right-hand side. faer stores column-major, so the facade keeps a scatter
//! table mapping CSR entry slots to CSC slots; the table is rebuilt only
//! when the pattern changes.

use faer::linalg::solvers::Solve;
use faer::reborrow::Reborrow;
use faer::sparse::linalg::solvers::{Lu, SymbolicLu};
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use faer::Col;
use log::warn;

use crate::error::{DaeError, MatrixError};
use crate::linear_solver_error;
use crate::matrix::CsrMatrix;
use crate::scalar::{Float, IndexType};

/// Condition-number lower bounds above this trip the ill-conditioning
/// warning counter.
const CONDITION_WARN_THRESHOLD: Float = 0.01 / Float::EPSILON;

pub struct SparseLu {
    dim: usize,
    fingerprint: Option<u64>,
    symbolic: Option<SymbolicLu<IndexType>>,
    csc: Option<SparseColMat<IndexType, Float>>,
    // CSR entry slot -> CSC entry slot
    scatter: Vec<usize>,
    lu: Option<Lu<IndexType, Float>>,
    matrix_norm: Float,
    rhs: Col<Float>,
    factorizations: usize,
    solves: usize,
    condition_warnings: usize,
}

impl Default for SparseLu {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseLu {
    pub fn new() -> Self {
        Self {
            dim: 0,
            fingerprint: None,
            symbolic: None,
            csc: None,
            scatter: Vec::new(),
            lu: None,
            matrix_norm: 0.0,
            rhs: Col::zeros(0),
            factorizations: 0,
            solves: 0,
            condition_warnings: 0,
        }
    }

    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    pub fn solves(&self) -> usize {
        self.solves
    }

    pub fn condition_warnings(&self) -> usize {
        self.condition_warnings
    }

    /// Numeric factorization of `g`. Runs the symbolic analysis first if the
    /// structural pattern differs from the cached one. A failed pivot is
    /// reported as [`crate::error::LinearSolverError::SingularMatrix`],
    /// which callers treat as a recoverable, step-local condition.
    pub fn factorize(&mut self, g: &CsrMatrix) -> Result<(), DaeError> {
        if g.nrows() != g.ncols() {
            return Err(DaeError::from(MatrixError::WrongShape {
                expected: g.nrows(),
                nrows: g.nrows(),
                ncols: g.ncols(),
            }));
        }
        let fingerprint = g.pattern_fingerprint();
        if self.fingerprint != Some(fingerprint) {
            self.analyze(g)?;
            self.fingerprint = Some(fingerprint);
        }

        // scatter CSR values into the cached CSC storage
        let csc = self.csc.as_mut().unwrap();
        let vals = csc.val_mut();
        for (k, &p) in self.scatter.iter().enumerate() {
            vals[p] = g.values()[k];
        }

        self.matrix_norm = (0..g.nrows())
            .map(|i| g.row(i).1.iter().map(|v| v.abs()).sum::<Float>())
            .fold(0.0, Float::max);

        let csc = self.csc.as_ref().unwrap();
        self.factorizations += 1;
        match Lu::try_new_with_symbolic(self.symbolic.as_ref().unwrap().clone(), csc.rb()) {
            Ok(lu) => {
                self.lu = Some(lu);
                Ok(())
            }
            Err(_) => {
                self.lu = None;
                Err(linear_solver_error!(SingularMatrix))
            }
        }
    }

    /// Solve `G * y = b` in place using the last successful factorization.
    pub fn solve_in_place(&mut self, b: &mut [Float]) -> Result<(), DaeError> {
        let lu = self
            .lu
            .as_ref()
            .ok_or_else(|| linear_solver_error!(NotFactorized))?;
        if b.len() != self.dim {
            return Err(linear_solver_error!(WrongRhsLength {
                expected: self.dim,
                found: b.len(),
            }));
        }
        let mut bnorm: Float = 0.0;
        for (i, &bi) in b.iter().enumerate() {
            self.rhs[i] = bi;
            bnorm = bnorm.max(bi.abs());
        }
        lu.solve_in_place(&mut self.rhs);
        self.solves += 1;

        let mut ynorm: Float = 0.0;
        for (i, bi) in b.iter_mut().enumerate() {
            *bi = self.rhs[i];
            ynorm = ynorm.max(bi.abs());
        }
        if !ynorm.is_finite() {
            // a zero pivot slipped through the factorization as inf/NaN
            return Err(linear_solver_error!(SingularMatrix));
        }
        // ||G||_inf * ||y||_inf / ||b||_inf is a cheap lower bound on the
        // condition number
        if bnorm > 0.0 && self.matrix_norm * ynorm / bnorm > CONDITION_WARN_THRESHOLD {
            if self.condition_warnings == 0 {
                warn!(
                    "linear system is ill-conditioned (condition number at least {:e})",
                    self.matrix_norm * ynorm / bnorm
                );
            }
            self.condition_warnings += 1;
        }
        Ok(())
    }

    /// Symbolic analysis: build the CSC image of the pattern, the scatter
    /// table and the symbolic LU. Backend failures here (allocation,
    /// index overflow) are fatal.
    fn analyze(&mut self, g: &CsrMatrix) -> Result<(), DaeError> {
        let n = g.nrows();
        let nnz = g.nnz();

        let mut col_ptr = vec![0usize; n + 1];
        for &j in g.col_indices() {
            col_ptr[j + 1] += 1;
        }
        for j in 0..n {
            col_ptr[j + 1] += col_ptr[j];
        }
        let mut next = col_ptr[..n].to_vec();
        let mut row_idx = vec![0usize; nnz];
        self.scatter.clear();
        self.scatter.resize(nnz, 0);
        for i in 0..n {
            let (start, end) = (g.row_pointers()[i], g.row_pointers()[i + 1]);
            for k in start..end {
                let j = g.col_indices()[k];
                let pos = next[j];
                next[j] += 1;
                row_idx[pos] = i;
                self.scatter[k] = pos;
            }
        }

        let symbolic_mat = SymbolicSparseColMat::new_checked(n, n, col_ptr, None, row_idx);
        let csc = SparseColMat::new(symbolic_mat, vec![0.0; nnz]);
        let symbolic = SymbolicLu::try_new(csc.symbolic())
            .map_err(|e| linear_solver_error!(Backend, format!("{e:?}")))?;

        self.dim = n;
        self.csc = Some(csc);
        self.symbolic = Some(symbolic);
        self.lu = None;
        self.rhs = Col::zeros(n);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinearSolverError;
    use crate::matrix::CsrMatrix;

    #[test]
    fn test_factorize_and_solve() {
        // G = | 2  0  1 |
        //     | 0  3  0 |
        //     | 1  0  2 |
        let g = CsrMatrix::from_arrays(
            3,
            3,
            vec![2.0, 1.0, 3.0, 1.0, 2.0],
            vec![0, 2, 1, 0, 2],
            vec![0, 2, 3, 5],
        )
        .unwrap();
        let mut lu = SparseLu::new();
        lu.factorize(&g).unwrap();
        let mut b = [5.0, 6.0, 7.0];
        lu.solve_in_place(&mut b).unwrap();
        // solution of the system above for b = (5, 6, 7)
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 2.0).abs() < 1e-12);
        assert!((b[2] - 3.0).abs() < 1e-12);
        assert_eq!(lu.factorizations(), 1);
        assert_eq!(lu.solves(), 1);
    }

    #[test]
    fn test_symbolic_reused_for_same_pattern() {
        let mut g = CsrMatrix::from_diagonal(&[2.0, 4.0]);
        let mut lu = SparseLu::new();
        lu.factorize(&g).unwrap();
        let fp = g.pattern_fingerprint();
        // same pattern, new values: no new symbolic analysis is observable,
        // but the numeric factorization must pick up the new values
        g = CsrMatrix::from_diagonal(&[8.0, 16.0]);
        assert_eq!(g.pattern_fingerprint(), fp);
        lu.factorize(&g).unwrap();
        let mut b = [8.0, 32.0];
        lu.solve_in_place(&mut b).unwrap();
        assert!((b[0] - 1.0).abs() < 1e-12);
        assert!((b[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_reported() {
        // stored zero on the diagonal makes the matrix numerically singular
        let g = CsrMatrix::from_diagonal(&[1.0, 0.0]);
        let mut lu = SparseLu::new();
        let result = lu.factorize(&g).and_then(|_| {
            let mut b = [1.0, 1.0];
            lu.solve_in_place(&mut b)
        });
        assert!(matches!(
            result,
            Err(DaeError::LinearSolverError(
                LinearSolverError::SingularMatrix
            ))
        ));
    }

    #[test]
    fn test_solve_before_factorize_fails() {
        let mut lu = SparseLu::new();
        let mut b = [1.0];
        assert!(matches!(
            lu.solve_in_place(&mut b),
            Err(DaeError::LinearSolverError(LinearSolverError::NotFactorized))
        ));
    }
}
