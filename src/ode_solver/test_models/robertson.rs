//! Robertson chemical kinetics as a semi-explicit DAE:
//!
//!   x1' = -0.04 x1 + 1e4 x2 x3
//!   x2' =  0.04 x1 - 1e4 x2 x3 - 3e7 x2^2
//!    0  =  x1 + x2 + x3 - 1
//!
//! with M = diag(1, 1, 0). The third equation is a conservation law; the
//! classic stress test for stiff DAE integrators.

use crate::matrix::CsrMatrix;
use crate::ode_solver::equations::{Jacobian, MassMatrix, Rhs};
use crate::scalar::Float;

pub struct Robertson;

impl Rhs for Robertson {
    fn call(&mut self, x: &[Float], _t: Float, f: &mut [Float]) {
        f[0] = -0.04 * x[0] + 1.0e4 * x[1] * x[2];
        f[1] = 0.04 * x[0] - 1.0e4 * x[1] * x[2] - 3.0e7 * x[1] * x[1];
        f[2] = x[0] + x[1] + x[2] - 1.0;
    }
}

pub struct RobertsonMass;

impl MassMatrix for RobertsonMass {
    fn fill(&mut self, m: &mut CsrMatrix) {
        m.reset(3, 3);
        m.append_row([(0, 1.0)]);
        m.append_row([(1, 1.0)]);
        // stored zero keeps the algebraic row in the structural pattern
        m.append_row([(2, 0.0)]);
    }
}

pub struct RobertsonJacobian;

impl Jacobian for RobertsonJacobian {
    fn fill(&mut self, j: &mut CsrMatrix, x: &[Float], _t: Float) {
        j.append_row([(0, -0.04), (1, 1.0e4 * x[2]), (2, 1.0e4 * x[1])]);
        j.append_row([
            (0, 0.04),
            (1, -1.0e4 * x[2] - 6.0e7 * x[1]),
            (2, -1.0e4 * x[1]),
        ]);
        j.append_row([(0, 1.0), (1, 1.0), (2, 1.0)]);
    }
}

/// Returns a structurally different pattern on every call after the first.
#[derive(Default)]
pub struct PatternChangingJacobian {
    calls: usize,
}

impl Jacobian for PatternChangingJacobian {
    fn fill(&mut self, j: &mut CsrMatrix, x: &[Float], t: Float) {
        self.calls += 1;
        if self.calls == 1 {
            RobertsonJacobian.fill(j, x, t);
        } else {
            // drops the (0, 2) entry
            j.append_row([(0, -0.04), (1, 1.0e4 * x[2])]);
            j.append_row([
                (0, 0.04),
                (1, -1.0e4 * x[2] - 6.0e7 * x[1]),
                (2, -1.0e4 * x[1]),
            ]);
            j.append_row([(0, 1.0), (1, 1.0), (2, 1.0)]);
        }
    }
}
