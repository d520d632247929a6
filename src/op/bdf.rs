//! Per-step nonlinear operator for the BDF discretization.
//!
//! At order `k` with step-scaled coefficients `α₀..α_k` the accepted states
//! `x_n, x_{n-1}, …` enter only through the fixed combination
//! `ψ = Σ_{i≥1} αᵢ x_{n+1-i}`, so it is precomputed once per attempted step:
//!
//!   r(x) = M (α₀ x + ψ) − dt f(x, t_{n+1})
//!   G(x) = α₀ M − dt J(x, t_{n+1})

use crate::error::DaeError;
use crate::jacobian::JacobianEngine;
use crate::matrix::CsrMatrix;
use crate::ode_solver::equations::Rhs;
use crate::ode_solver::history::HistoryRing;
use crate::scalar::Float;
use crate::vector::axpy;

pub(crate) struct BdfResidual {
    mass: CsrMatrix,
    alpha0: Float,
    dt: Float,
    t_new: Float,
    psi: Vec<Float>,
    xtmp: Vec<Float>,
    ftmp: Vec<Float>,
}

impl BdfResidual {
    pub fn new(mass: CsrMatrix) -> Self {
        let n = mass.nrows();
        Self {
            mass,
            alpha0: 0.0,
            dt: 0.0,
            t_new: 0.0,
            psi: vec![0.0; n],
            xtmp: vec![0.0; n],
            ftmp: vec![0.0; n],
        }
    }

    /// Fix the step data: coefficients `alpha[0..=k]`, the step size, the
    /// target time, and the history contribution `ψ`.
    pub fn set_step(&mut self, alpha: &[Float], dt: Float, t_new: Float, history: &HistoryRing) {
        self.alpha0 = alpha[0];
        self.dt = dt;
        self.t_new = t_new;
        self.psi.fill(0.0);
        for (i, &ai) in alpha.iter().enumerate().skip(1) {
            axpy(ai, history.state(i - 1), &mut self.psi);
        }
    }

    /// `r = M (α₀ x + ψ) − dt f(x, t_{n+1})`.
    pub fn residual(&mut self, rhs: &mut dyn Rhs, x: &[Float], r: &mut [Float]) {
        rhs.call(x, self.t_new, &mut self.ftmp);
        for (xt, (&xi, &pi)) in self.xtmp.iter_mut().zip(x.iter().zip(&self.psi)) {
            *xt = self.alpha0 * xi + pi;
        }
        self.mass.mul_vec(&self.xtmp, r);
        axpy(-self.dt, &self.ftmp, r);
    }

    /// `G = α₀ M − dt J(x, t_{n+1})`, merged on the union pattern so the
    /// linear solver's symbolic factorization stays valid.
    pub fn jacobian(
        &mut self,
        engine: &mut JacobianEngine<'_>,
        rhs: &mut dyn Rhs,
        x: &[Float],
        g: &mut CsrMatrix,
    ) -> Result<(), DaeError> {
        let j = engine.eval(rhs, x, self.t_new)?;
        g.linear_combination(self.alpha0, &self.mass, -self.dt, j)
    }
}
