//! # daesol
//!
//! A solver for stiff ordinary differential equations and semi-explicit
//! differential-algebraic equations of the form
//!
//! ```text
//! M · x'(t) = f(x, t),    x(t0) = x0,    t ∈ [t0, t1]
//! ```
//!
//! where `M` is a constant sparse mass matrix. A singular `M` encodes
//! algebraic constraints; the identity reduces the problem to a stiff ODE.
//!
//! The integrator is a variable-order, variable-step Backward
//! Differentiation Formula (BDF) method of orders 1 to 6. Every step forms a
//! nonlinear system that is driven to the configured tolerances by a damped
//! Newton iteration, with the sparse iteration matrix `α₀·M − dt·J`
//! factorized by the LU decomposition from the
//! [faer](https://github.com/sarah-ek/faer-rs) library and reused across
//! steps while it stays serviceable. Step size and order follow the Newton
//! convergence behavior: easy steps grow `dt`, slow ones shrink it, and
//! failed ones are rejected and retried.
//!
//! ## Describing a problem
//!
//! A problem is given to the solver as a set of callbacks: an [`Rhs`] for
//! `f(x, t)`, a [`MassMatrix`] filled once per solve (see [`MassIdentity`]
//! for plain ODEs), an optional analytic [`Jacobian`] (finite differences
//! otherwise), and an optional [`Observer`] invoked after every accepted
//! step. Sparse matrices cross the API boundary in three-array CSR form via
//! [`CsrMatrix`].
//!
//! ```
//! use daesol::{CsrMatrix, Float, Solver, SolverConfig};
//!
//! // x1' = -x1, 0 = x2 - x1 with M = diag(1, 0)
//! let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| {
//!     f[0] = -x[0];
//!     f[1] = x[1] - x[0];
//! };
//! let mut mass = |m: &mut CsrMatrix| {
//!     m.reset(2, 2);
//!     m.append_row([(0, 1.0)]);
//!     m.append_row([(1, 0.0)]);
//! };
//! let mut x = [1.0, 1.0];
//! let mut solver = Solver::new(&mut rhs, &mut mass, SolverConfig::default());
//! let stats = solver.solve(&mut x, 1.0).unwrap();
//! assert!(stats.steps > 0);
//! assert!((x[0] - x[1]).abs() < 1e-5);
//! ```
//!
//! ## Precision
//!
//! The `f64` feature (default) builds the crate in double precision; `f32`
//! (with default features disabled) builds it in single precision. The
//! [`Float`] alias and all tolerance defaults follow the selection.
//!
//! ## Diagnostics
//!
//! The solver reports counters in [`SolverStats`] and emits `log` records
//! gated by [`SolverConfig::verbosity`]; install any `log` backend to see
//! them. Failures are categorized in [`DaeError`], with stable process exit
//! codes available from [`DaeError::exit_code`] for CLI wrappers.

pub mod error;
pub mod linear_solver;
pub mod matrix;
pub mod ode_solver;
pub mod scalar;

pub(crate) mod jacobian;
pub(crate) mod nonlinear_solver;
pub(crate) mod op;
pub(crate) mod vector;

pub use error::{DaeError, LinearSolverError, MatrixError, SolverError};
pub use matrix::CsrMatrix;
pub use ode_solver::bdf::{Solver, SolverStats};
pub use ode_solver::config::{SolverConfig, TimeStepping};
pub use ode_solver::equations::{Jacobian, MassIdentity, MassMatrix, Observer, Rhs};
pub use scalar::{Float, IndexType, MAX_ORDER};
