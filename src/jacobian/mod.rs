//! Jacobian evaluation engine.
//!
//! Two strategies behind one interface: a user-supplied analytic Jacobian,
//! or a finite-difference estimate built one column at a time with
//! `ε = tol · max(|xⱼ|, 1)`. In both cases the sparsity pattern is fixed
//! after the first evaluation, since the linear solver caches its symbolic
//! factorization against it. For the analytic variant a pattern change on a
//! later call is a hard error rather than a silent re-analysis; for the
//! finite-difference variant, entries that were structurally zero at
//! discovery stay out of the pattern.

use log::debug;

use crate::error::{DaeError, MatrixError};
use crate::matrix::CsrMatrix;
use crate::ode_solver::equations::{Jacobian, Rhs};
use crate::scalar::Float;
use crate::solver_error;

pub(crate) struct JacobianEngine<'a> {
    analytic: Option<&'a mut dyn Jacobian>,
    fd_tol: Float,
    n: usize,
    jac: CsrMatrix,
    // locked pattern, captured on the first evaluation
    pattern_row_pointers: Vec<usize>,
    pattern_col_indices: Vec<usize>,
    pattern_locked: bool,
    // finite differences: base residual, perturbed residual, perturbed state
    f0: Vec<Float>,
    f1: Vec<Float>,
    x_pert: Vec<Float>,
    // per-column list of (row, value slot) into `jac`
    col_map: Vec<Vec<(usize, usize)>>,
    evaluations: usize,
}

impl<'a> JacobianEngine<'a> {
    pub fn new(analytic: Option<&'a mut dyn Jacobian>, fd_tol: Float, n: usize) -> Self {
        Self {
            analytic,
            fd_tol,
            n,
            jac: CsrMatrix::zeros(n, n),
            pattern_row_pointers: Vec::new(),
            pattern_col_indices: Vec::new(),
            pattern_locked: false,
            f0: vec![0.0; n],
            f1: vec![0.0; n],
            x_pert: vec![0.0; n],
            col_map: Vec::new(),
            evaluations: 0,
        }
    }

    pub fn is_analytic(&self) -> bool {
        self.analytic.is_some()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Evaluate `J(x, t)` and return a reference to the internal matrix.
    pub fn eval(
        &mut self,
        rhs: &mut dyn Rhs,
        x: &[Float],
        t: Float,
    ) -> Result<&CsrMatrix, DaeError> {
        self.evaluations += 1;
        if self.analytic.is_some() {
            self.eval_analytic(x, t)?;
        } else {
            self.eval_finite_difference(rhs, x, t);
        }
        if !self.pattern_locked {
            self.pattern_row_pointers = self.jac.row_pointers().to_vec();
            self.pattern_col_indices = self.jac.col_indices().to_vec();
            self.pattern_locked = true;
            debug!(
                "Jacobian pattern locked: {} entries ({})",
                self.jac.nnz(),
                if self.is_analytic() {
                    "analytic"
                } else {
                    "finite differences"
                }
            );
        }
        Ok(&self.jac)
    }

    fn eval_analytic(&mut self, x: &[Float], t: Float) -> Result<(), DaeError> {
        let cb = self.analytic.as_mut().unwrap();
        self.jac.reset(self.n, self.n);
        cb.fill(&mut self.jac, x, t);
        self.jac.validate()?;
        if self.jac.nrows() != self.n || self.jac.ncols() != self.n {
            return Err(DaeError::from(MatrixError::WrongShape {
                expected: self.n,
                nrows: self.jac.nrows(),
                ncols: self.jac.ncols(),
            }));
        }
        if self.pattern_locked
            && (self.jac.row_pointers() != self.pattern_row_pointers.as_slice()
                || self.jac.col_indices() != self.pattern_col_indices.as_slice())
        {
            return Err(solver_error!(JacobianPatternChanged));
        }
        Ok(())
    }

    fn eval_finite_difference(&mut self, rhs: &mut dyn Rhs, x: &[Float], t: Float) {
        rhs.call(x, t, &mut self.f0);
        if !self.pattern_locked {
            self.discover_pattern(rhs, x, t);
            return;
        }
        self.x_pert.copy_from_slice(x);
        for j in 0..self.n {
            if self.col_map[j].is_empty() {
                continue;
            }
            let eps = self.fd_tol * x[j].abs().max(1.0);
            self.x_pert[j] = x[j] + eps;
            rhs.call(&self.x_pert, t, &mut self.f1);
            self.x_pert[j] = x[j];
            let values = self.jac.values_mut();
            for &(i, slot) in &self.col_map[j] {
                values[slot] = (self.f1[i] - self.f0[i]) / eps;
            }
        }
    }

    /// First finite-difference call: probe every column, keep the entries
    /// that respond, and build the column-to-slot scatter for later calls.
    fn discover_pattern(&mut self, rhs: &mut dyn Rhs, x: &[Float], t: Float) {
        let mut rows: Vec<Vec<(usize, Float)>> = vec![Vec::new(); self.n];
        self.x_pert.copy_from_slice(x);
        for j in 0..self.n {
            let eps = self.fd_tol * x[j].abs().max(1.0);
            self.x_pert[j] = x[j] + eps;
            rhs.call(&self.x_pert, t, &mut self.f1);
            self.x_pert[j] = x[j];
            for i in 0..self.n {
                let d = (self.f1[i] - self.f0[i]) / eps;
                if d != 0.0 {
                    rows[i].push((j, d));
                }
            }
        }
        self.jac.reset(self.n, self.n);
        self.jac.reserve(rows.iter().map(Vec::len).sum());
        for entries in rows {
            self.jac.append_row(entries);
        }
        self.col_map = vec![Vec::new(); self.n];
        for (slot, (i, j, _)) in self.jac.triplet_iter().enumerate() {
            self.col_map[j].push((i, slot));
        }
    }
}
