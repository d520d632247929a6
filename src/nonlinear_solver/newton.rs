//! Damped (modified) Newton iteration for the per-step nonlinear system.
//!
//! Solves `G Δ = −r(x)` with the factorization held by the linear solver
//! facade and applies `x ← x + λ Δ`. The factorization is whatever the
//! integrator last installed; it may have been built at an earlier step or
//! a different iterate, which is exactly the modified-Newton reuse the step
//! assembler's rebuild policy arranges.

use crate::error::{DaeError, LinearSolverError};
use crate::linear_solver::SparseLu;
use crate::nonlinear_solver::{Convergence, ConvergenceStatus};
use crate::ode_solver::equations::Rhs;
use crate::op::bdf::BdfResidual;
use crate::scalar::Float;
use crate::vector::{all_finite, axpy, norm_l2};

/// Five halvings of the full step; below this the line search gives up and
/// the iteration counts as diverged.
const LAMBDA_MIN: Float = 0.03125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NewtonOutcome {
    Converged { iterations: usize, damped: bool },
    Stalled,
    Diverged,
    SingularJacobian,
}

pub(crate) struct NewtonWorkspace {
    delta: Vec<Float>,
    r: Vec<Float>,
    x_trial: Vec<Float>,
    r_trial: Vec<Float>,
}

impl NewtonWorkspace {
    pub fn new(n: usize) -> Self {
        Self {
            delta: vec![0.0; n],
            r: vec![0.0; n],
            x_trial: vec![0.0; n],
            r_trial: vec![0.0; n],
        }
    }
}

/// Run the damped Newton loop, overwriting `x` (entered as the predictor)
/// with the final iterate. Only backend failures propagate as errors; all
/// numerical failure modes are reported through [`NewtonOutcome`].
pub(crate) fn newton_solve(
    x: &mut [Float],
    op: &mut BdfResidual,
    rhs: &mut dyn Rhs,
    lu: &mut SparseLu,
    convergence: &mut Convergence,
    ws: &mut NewtonWorkspace,
) -> Result<NewtonOutcome, DaeError> {
    convergence.reset();
    let mut damped = false;

    op.residual(rhs, x, &mut ws.r);
    if !all_finite(&ws.r) {
        return Ok(NewtonOutcome::Diverged);
    }
    let mut rnorm = norm_l2(&ws.r);

    for iter in 1..=convergence.max_iter() {
        for (d, ri) in ws.delta.iter_mut().zip(&ws.r) {
            *d = -*ri;
        }
        match lu.solve_in_place(&mut ws.delta) {
            Ok(()) => {}
            Err(DaeError::LinearSolverError(LinearSolverError::SingularMatrix)) => {
                return Ok(NewtonOutcome::SingularJacobian)
            }
            Err(e) => return Err(e),
        }

        let dnorm = convergence.norm(&ws.delta, x);
        match convergence.check_step(dnorm) {
            ConvergenceStatus::Converged => {
                axpy(1.0, &ws.delta, x);
                return Ok(NewtonOutcome::Converged {
                    iterations: iter,
                    damped,
                });
            }
            ConvergenceStatus::Diverged => return Ok(NewtonOutcome::Diverged),
            ConvergenceStatus::Continue => {}
        }

        // line search: halve lambda until the residual norm decreases
        let mut lambda: Float = 1.0;
        loop {
            ws.x_trial.copy_from_slice(x);
            axpy(lambda, &ws.delta, &mut ws.x_trial);
            op.residual(rhs, &ws.x_trial, &mut ws.r_trial);
            let rnorm_trial = norm_l2(&ws.r_trial);
            if rnorm_trial.is_finite() && rnorm_trial < rnorm {
                x.copy_from_slice(&ws.x_trial);
                std::mem::swap(&mut ws.r, &mut ws.r_trial);
                rnorm = rnorm_trial;
                if lambda < 1.0 {
                    damped = true;
                }
                break;
            }
            lambda *= 0.5;
            if lambda < LAMBDA_MIN {
                return Ok(NewtonOutcome::Diverged);
            }
        }
    }
    Ok(NewtonOutcome::Stalled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CsrMatrix;
    use crate::ode_solver::history::HistoryRing;
    use crate::scalar::Float;

    fn setup(x0: &[Float]) -> (BdfResidual, HistoryRing, NewtonWorkspace, Convergence) {
        let n = x0.len();
        let op = BdfResidual::new(CsrMatrix::identity(n));
        let mut history = HistoryRing::new(6);
        history.push(0.0, x0);
        let ws = NewtonWorkspace::new(n);
        let convergence = Convergence::new(1e-10, 1e-10, 15);
        (op, history, ws, convergence)
    }

    #[test]
    fn test_newton_solves_linear_step() {
        // backward Euler step of x' = -x from x = 1, dt = 0.1:
        // x_new = 1 / 1.1
        let dt = 0.1;
        let (mut op, history, mut ws, mut convergence) = setup(&[1.0]);
        op.set_step(&[1.0, -1.0], dt, dt, &history);
        let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0];

        // G = 1 - dt * (-1) = 1.1
        let g = CsrMatrix::from_diagonal(&[1.0 + dt]);
        let mut lu = SparseLu::new();
        lu.factorize(&g).unwrap();

        let mut x = [1.0];
        let outcome =
            newton_solve(&mut x, &mut op, &mut rhs, &mut lu, &mut convergence, &mut ws).unwrap();
        assert!(matches!(outcome, NewtonOutcome::Converged { .. }));
        assert!((x[0] - 1.0 / 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_newton_reports_singular_factorization() {
        let dt = 0.1;
        let (mut op, history, mut ws, mut convergence) = setup(&[1.0]);
        op.set_step(&[1.0, -1.0], dt, dt, &history);
        let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0];

        let g = CsrMatrix::from_diagonal(&[0.0]);
        let mut lu = SparseLu::new();
        let mut x = [1.0];
        let singular_at_factorize = lu.factorize(&g).is_err();
        if singular_at_factorize {
            return; // already classified by the facade
        }
        let outcome =
            newton_solve(&mut x, &mut op, &mut rhs, &mut lu, &mut convergence, &mut ws).unwrap();
        assert_eq!(outcome, NewtonOutcome::SingularJacobian);
    }

    #[test]
    fn test_newton_stalls_on_flat_jacobian_mismatch() {
        // grossly wrong iteration matrix makes progress too slow to finish
        let dt = 1.0;
        let (mut op, history, mut ws, mut convergence) = setup(&[1.0]);
        op.set_step(&[1.0, -1.0], dt, dt, &history);
        let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0].powi(3) - 10.0;

        let g = CsrMatrix::from_diagonal(&[1e5]);
        let mut lu = SparseLu::new();
        lu.factorize(&g).unwrap();

        let mut x = [1.0];
        let outcome =
            newton_solve(&mut x, &mut op, &mut rhs, &mut lu, &mut convergence, &mut ws).unwrap();
        assert!(matches!(
            outcome,
            NewtonOutcome::Stalled | NewtonOutcome::Diverged
        ));
    }
}
