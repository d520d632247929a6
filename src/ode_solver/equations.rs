//! User-facing problem description.
//!
//! A problem is four capabilities: the residual `f(x, t)`, the constant mass
//! matrix `M`, an optional analytic Jacobian `∂f/∂x`, and an optional
//! post-step observer. Each is a small trait with a blanket impl for the
//! matching closure shape, so both structs and closures work:
//!
//! ```
//! use daesol::{Float, Rhs};
//!
//! struct Decay;
//! impl Rhs for Decay {
//!     fn call(&mut self, x: &[Float], _t: Float, f: &mut [Float]) {
//!         f[0] = -x[0];
//!     }
//! }
//!
//! let mut closure = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0];
//! let _as_rhs: &mut dyn Rhs = &mut closure;
//! ```

use crate::matrix::CsrMatrix;
use crate::scalar::Float;

/// Right-hand side `f(x, t)` of `M x' = f(x, t)`.
///
/// For rows where the mass matrix is structurally zero, the corresponding
/// component of `f` is an algebraic constraint `0 = f_i(x, t)`. The
/// implementation must be pure with respect to solver-visible state; user
/// private state may mutate (the receiver is `&mut self`).
pub trait Rhs {
    fn call(&mut self, x: &[Float], t: Float, f: &mut [Float]);
}

impl<F> Rhs for F
where
    F: FnMut(&[Float], Float, &mut [Float]),
{
    fn call(&mut self, x: &[Float], t: Float, f: &mut [Float]) {
        self(x, t, f)
    }
}

/// Provider of the constant `N x N` mass matrix.
///
/// Called exactly once per solve; the result is cached. The holder passed in
/// is owned by the solver and already sized: fill it row by row with
/// [`CsrMatrix::append_row`] (or overwrite it wholesale). A singular matrix
/// is legal and encodes algebraic constraints.
pub trait MassMatrix {
    fn fill(&mut self, m: &mut CsrMatrix);
}

impl<F> MassMatrix for F
where
    F: FnMut(&mut CsrMatrix),
{
    fn fill(&mut self, m: &mut CsrMatrix) {
        self(m)
    }
}

/// Identity mass matrix of size `n`, for plain stiff ODE systems.
pub struct MassIdentity(pub usize);

impl MassMatrix for MassIdentity {
    fn fill(&mut self, m: &mut CsrMatrix) {
        m.reset(self.0, self.0);
        m.reserve(self.0);
        for i in 0..self.0 {
            m.append_row([(i, 1.0)]);
        }
    }
}

/// Analytic Jacobian `J = ∂f/∂x` at `(x, t)`.
///
/// Optional; without it the solver falls back to a finite-difference
/// estimate. The sparsity pattern is validated on the first call and locked:
/// a later call that produces a different pattern aborts the solve.
pub trait Jacobian {
    fn fill(&mut self, j: &mut CsrMatrix, x: &[Float], t: Float);
}

impl<F> Jacobian for F
where
    F: FnMut(&mut CsrMatrix, &[Float], Float),
{
    fn fill(&mut self, j: &mut CsrMatrix, x: &[Float], t: Float) {
        self(j, x, t)
    }
}

/// Post-step notification with the accepted state and its time.
///
/// Invoked after the step is committed to history, in strictly increasing
/// time order, exactly once per accepted step. Rejected steps are never
/// observed.
pub trait Observer {
    fn observe(&mut self, x: &[Float], t: Float);
}

impl<F> Observer for F
where
    F: FnMut(&[Float], Float),
{
    fn observe(&mut self, x: &[Float], t: Float) {
        self(x, t)
    }
}
