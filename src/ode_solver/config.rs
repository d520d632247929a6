//! Solver configuration.

use crate::error::DaeError;
use crate::scalar::{Float, MAX_ORDER};
use crate::solver_error;

#[cfg(not(feature = "f32"))]
mod defaults {
    use crate::scalar::Float;
    pub const ATOL: Float = 1.0e-6;
    pub const RTOL: Float = 1.0e-6;
    pub const DT_MIN: Float = 1.0e-14;
    pub const FD_TOL: Float = 1.0e-8;
}

#[cfg(feature = "f32")]
mod defaults {
    use crate::scalar::Float;
    pub const ATOL: Float = 1.0e-4;
    pub const RTOL: Float = 1.0e-4;
    pub const DT_MIN: Float = 1.0e-6;
    pub const FD_TOL: Float = 1.0e-3;
}

/// Time-stepping scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeStepping {
    /// Constant step `dt_init` (except for the final clip onto `t1`).
    Fixed,
    /// Step size driven by the Newton convergence signals.
    #[default]
    Adaptive,
    /// As `Adaptive`, and additionally lowers the BDF order on slow
    /// convergence before touching the step size budget.
    AdaptiveWithOrder,
}

/// Flat record of the recognized solver options.
///
/// The defaults scale with the build-time precision; validation happens at
/// the start of every solve, before any integration work.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Start time.
    pub t0: Float,
    /// Initial step size.
    pub dt_init: Float,
    /// Hard lower bound on the step size; going below it aborts the solve.
    pub dt_min: Float,
    /// Hard upper bound on the step size.
    pub dt_max: Float,
    /// Maximum BDF order, 1..=6.
    pub bdf_order: usize,
    /// Absolute tolerance of the Newton convergence norm.
    pub atol: Float,
    /// Relative tolerance of the Newton convergence norm.
    pub rtol: Float,
    /// Newton iteration cap per step attempt.
    pub max_newton_iter: usize,
    pub time_stepping: TimeStepping,
    /// Consecutive easy steps before the step size is enlarged.
    pub dt_increase_threshold: usize,
    pub dt_increase_factor: Float,
    pub dt_decrease_factor: Float,
    /// Finite-difference perturbation tolerance.
    pub fd_tol: Float,
    /// Diagnostic detail, 0 (silent) to 3 (per Newton iteration).
    pub verbosity: u8,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            t0: 0.0,
            dt_init: 1.0e-2,
            dt_min: defaults::DT_MIN,
            dt_max: 100.0,
            bdf_order: 2,
            atol: defaults::ATOL,
            rtol: defaults::RTOL,
            max_newton_iter: 15,
            time_stepping: TimeStepping::default(),
            dt_increase_threshold: 4,
            dt_increase_factor: 2.0,
            dt_decrease_factor: 0.5,
            fd_tol: defaults::FD_TOL,
            verbosity: 0,
        }
    }
}

impl SolverConfig {
    /// Reject programmer errors before any integration begins.
    pub(crate) fn validate(&self) -> Result<(), DaeError> {
        if self.bdf_order < 1 || self.bdf_order > MAX_ORDER {
            return Err(solver_error!(
                InvalidConfig,
                format!("bdf_order must be in 1..={MAX_ORDER}, got {}", self.bdf_order)
            ));
        }
        if !(self.atol > 0.0) || !(self.rtol > 0.0) {
            return Err(solver_error!(
                InvalidConfig,
                format!("tolerances must be positive: atol = {}, rtol = {}", self.atol, self.rtol)
            ));
        }
        if !(self.dt_init > 0.0) || !(self.dt_min > 0.0) || !(self.dt_max > 0.0) {
            return Err(solver_error!(
                InvalidConfig,
                "step sizes must be positive".to_string()
            ));
        }
        if self.dt_min > self.dt_max || self.dt_init > self.dt_max {
            return Err(solver_error!(
                InvalidConfig,
                format!(
                    "step bounds are inconsistent: dt_min = {}, dt_init = {}, dt_max = {}",
                    self.dt_min, self.dt_init, self.dt_max
                )
            ));
        }
        if self.max_newton_iter == 0 {
            return Err(solver_error!(
                InvalidConfig,
                "max_newton_iter must be at least 1".to_string()
            ));
        }
        if !(self.dt_increase_factor > 1.0) {
            return Err(solver_error!(
                InvalidConfig,
                format!("dt_increase_factor must exceed 1, got {}", self.dt_increase_factor)
            ));
        }
        if !(self.dt_decrease_factor > 0.0) || !(self.dt_decrease_factor < 1.0) {
            return Err(solver_error!(
                InvalidConfig,
                format!("dt_decrease_factor must be in (0, 1), got {}", self.dt_decrease_factor)
            ));
        }
        if !(self.fd_tol > 0.0) {
            return Err(solver_error!(
                InvalidConfig,
                format!("fd_tol must be positive, got {}", self.fd_tol)
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SolverConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_options() {
        let mut c = SolverConfig {
            bdf_order: 7,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        c.bdf_order = 0;
        assert!(c.validate().is_err());

        let c = SolverConfig {
            atol: -1.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = SolverConfig {
            dt_init: 1e3,
            dt_max: 1.0,
            ..Default::default()
        };
        assert!(c.validate().is_err());

        let c = SolverConfig {
            dt_decrease_factor: 1.5,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }
}
