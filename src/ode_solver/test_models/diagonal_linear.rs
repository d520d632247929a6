//! `x' = A x` with `A = diag(-1, -1e-1, ..., -1e-9)`: ten uncoupled decay
//! rates spanning nine orders of magnitude, solved from `x0 = 1`.

use crate::ode_solver::equations::Rhs;
use crate::scalar::Float;

pub const N: usize = 10;

pub fn rate(i: usize) -> Float {
    -(10.0 as Float).powi(-(i as i32))
}

pub fn initial() -> [Float; N] {
    [1.0; N]
}

pub fn exact(i: usize, t: Float) -> Float {
    (rate(i) * t).exp()
}

pub struct DiagonalLinear;

impl Rhs for DiagonalLinear {
    fn call(&mut self, x: &[Float], _t: Float, f: &mut [Float]) {
        for i in 0..N {
            f[i] = rate(i) * x[i];
        }
    }
}
