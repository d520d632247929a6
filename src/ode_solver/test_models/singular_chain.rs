//! Two-variable chain with a singular mass matrix:
//!
//!   x1' = -x1,   0 = x2 - x1^2,   M = diag(1, 0)
//!
//! The algebraic variable must track the square of the differential one.

use crate::matrix::CsrMatrix;
use crate::ode_solver::equations::{MassMatrix, Rhs};
use crate::scalar::Float;

pub struct SingularChain;

impl Rhs for SingularChain {
    fn call(&mut self, x: &[Float], _t: Float, f: &mut [Float]) {
        f[0] = -x[0];
        f[1] = x[1] - x[0] * x[0];
    }
}

pub struct SingularChainMass;

impl MassMatrix for SingularChainMass {
    fn fill(&mut self, m: &mut CsrMatrix) {
        m.reset(2, 2);
        m.append_row([(0, 1.0)]);
        m.append_row([(1, 0.0)]);
    }
}
