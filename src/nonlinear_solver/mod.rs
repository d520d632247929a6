pub(crate) mod convergence;
pub(crate) mod newton;

pub(crate) use convergence::{Convergence, ConvergenceStatus};
pub(crate) use newton::{newton_solve, NewtonOutcome, NewtonWorkspace};
