//! Prothero–Robinson style stiff scalar problem:
//!
//!   x' = -1000 (x - cos t) - sin t,   x(0) = 0
//!
//! whose solution collapses onto `cos t` after a fast transient.

use crate::ode_solver::equations::Rhs;
use crate::scalar::Float;

pub struct StiffScalar;

impl Rhs for StiffScalar {
    fn call(&mut self, x: &[Float], t: Float, f: &mut [Float]) {
        f[0] = -1000.0 * (x[0] - t.cos()) - t.sin();
    }
}
