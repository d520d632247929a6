//! Step-size and order controller.
//!
//! A small state machine driven by the Newton outcome of each attempted
//! step. Accuracy pressure arrives indirectly: a step the nonlinear solver
//! finds hard is a step the discretization finds inaccurate, so the step
//! size follows the convergence signals within the `[dt_min, dt_max]`
//! bounds. The order ramps up from 1 by one per accepted step; with a
//! single known history point higher-order BDF is undefined, which makes
//! the ramp double as the initialization strategy.

use log::{debug, trace};

use crate::error::DaeError;
use crate::ode_solver::config::{SolverConfig, TimeStepping};
use crate::scalar::Float;
use crate::solver_error;

/// Abort a step after this many consecutive rejections.
const MAX_STEP_REJECTIONS: usize = 20;

/// Outcome classification of an attempted step, as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepSignal {
    ConvergedEasily,
    Converged,
    Slow,
    Failed,
    Singular,
}

pub(crate) struct StepController {
    scheme: TimeStepping,
    dt: Float,
    order: usize,
    max_order: usize,
    dt_init: Float,
    dt_min: Float,
    dt_max: Float,
    increase_factor: Float,
    decrease_factor: Float,
    increase_threshold: usize,
    consecutive_easy: usize,
    rejections: usize,
}

impl StepController {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            scheme: config.time_stepping,
            dt: config.dt_init.min(config.dt_max),
            order: 1,
            max_order: config.bdf_order,
            dt_init: config.dt_init,
            dt_min: config.dt_min,
            dt_max: config.dt_max,
            increase_factor: config.dt_increase_factor,
            decrease_factor: config.dt_decrease_factor,
            increase_threshold: config.dt_increase_threshold.max(1),
            consecutive_easy: 0,
            rejections: 0,
        }
    }

    /// Proposed `(dt, order)` for the next attempt.
    pub fn proposal(&self) -> (Float, usize) {
        (self.dt, self.order)
    }

    /// Successful step: reset the rejection budget, ramp the order, and let
    /// the signal steer the step size.
    pub fn on_accept(&mut self, signal: StepSignal) {
        self.rejections = 0;
        if self.order < self.max_order {
            self.order += 1;
        }
        if self.scheme == TimeStepping::Fixed {
            self.dt = self.dt_init.min(self.dt_max);
            return;
        }
        match signal {
            StepSignal::ConvergedEasily => {
                self.consecutive_easy += 1;
                if self.consecutive_easy >= self.increase_threshold {
                    self.consecutive_easy = 0;
                    self.dt = (self.dt * self.increase_factor).min(self.dt_max);
                    trace!("step size increased to {:e}", self.dt);
                }
            }
            StepSignal::Converged => {
                self.consecutive_easy = 0;
            }
            StepSignal::Slow => {
                self.consecutive_easy = 0;
                if self.scheme == TimeStepping::AdaptiveWithOrder && self.order > 1 {
                    self.order -= 1;
                    trace!("order lowered to {} on slow convergence", self.order);
                } else {
                    self.dt = (self.dt * self.decrease_factor).max(self.dt_min);
                    trace!("step size decreased to {:e} on slow convergence", self.dt);
                }
            }
            // rejected attempts go through on_reject
            StepSignal::Failed | StepSignal::Singular => unreachable!(),
        }
    }

    /// Rejected step: shrink the step, drop the order, enforce the budgets.
    pub fn on_reject(&mut self, signal: StepSignal, t: Float) -> Result<(), DaeError> {
        self.consecutive_easy = 0;
        self.rejections += 1;
        if self.rejections > MAX_STEP_REJECTIONS {
            return Err(solver_error!(TooManyRejections {
                t: t as f64,
                count: self.rejections,
            }));
        }
        if self.order > 1 {
            self.order -= 1;
        }
        self.dt *= self.decrease_factor;
        debug!(
            "step rejected ({:?}) at t = {t:e}; retrying with dt = {:e}, order {}",
            signal, self.dt, self.order
        );
        if self.dt < self.dt_min {
            return Err(solver_error!(StepSizeTooSmall {
                t: t as f64,
                dt: self.dt as f64,
                dt_min: self.dt_min as f64,
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SolverError;

    fn adaptive_config() -> SolverConfig {
        SolverConfig {
            dt_init: 1.0,
            dt_min: 1e-10,
            dt_max: 8.0,
            bdf_order: 4,
            dt_increase_threshold: 2,
            dt_increase_factor: 2.0,
            dt_decrease_factor: 0.5,
            time_stepping: TimeStepping::Adaptive,
            ..Default::default()
        }
    }

    #[test]
    fn test_order_ramps_one_per_accepted_step() {
        let mut c = StepController::new(&adaptive_config());
        assert_eq!(c.proposal().1, 1);
        c.on_accept(StepSignal::Converged);
        assert_eq!(c.proposal().1, 2);
        c.on_accept(StepSignal::Converged);
        c.on_accept(StepSignal::Converged);
        c.on_accept(StepSignal::Converged);
        assert_eq!(c.proposal().1, 4); // capped at bdf_order
    }

    #[test]
    fn test_dt_grows_after_easy_streak() {
        let mut c = StepController::new(&adaptive_config());
        c.on_accept(StepSignal::ConvergedEasily);
        assert_eq!(c.proposal().0, 1.0);
        c.on_accept(StepSignal::ConvergedEasily);
        assert_eq!(c.proposal().0, 2.0);
        // a plain converged step resets the streak
        c.on_accept(StepSignal::Converged);
        c.on_accept(StepSignal::ConvergedEasily);
        assert_eq!(c.proposal().0, 2.0);
        // growth saturates at dt_max
        for _ in 0..10 {
            c.on_accept(StepSignal::ConvergedEasily);
        }
        assert_eq!(c.proposal().0, 8.0);
    }

    #[test]
    fn test_slow_convergence_shrinks_without_rejecting() {
        let mut c = StepController::new(&adaptive_config());
        c.on_accept(StepSignal::Slow);
        assert_eq!(c.proposal().0, 0.5);
        // the step was still accepted, so the order ramped
        assert_eq!(c.proposal().1, 2);
    }

    #[test]
    fn test_rejection_shrinks_and_drops_order() {
        let mut c = StepController::new(&adaptive_config());
        c.on_accept(StepSignal::Converged);
        c.on_accept(StepSignal::Converged);
        assert_eq!(c.proposal(), (1.0, 3));
        c.on_reject(StepSignal::Failed, 0.0).unwrap();
        assert_eq!(c.proposal(), (0.5, 2));
    }

    #[test]
    fn test_dt_underflow_aborts() {
        let cfg = SolverConfig {
            dt_min: 0.6,
            ..adaptive_config()
        };
        let mut c = StepController::new(&cfg);
        assert!(c.on_reject(StepSignal::Failed, 1.0).is_err());
    }

    #[test]
    fn test_rejection_budget_aborts() {
        let cfg = SolverConfig {
            dt_min: Float::MIN_POSITIVE,
            ..adaptive_config()
        };
        let mut c = StepController::new(&cfg);
        let mut last = Ok(());
        for _ in 0..(MAX_STEP_REJECTIONS + 1) {
            last = c.on_reject(StepSignal::Failed, 1.0);
        }
        assert!(matches!(
            last,
            Err(DaeError::SolverError(SolverError::TooManyRejections { .. }))
        ));
    }

    #[test]
    fn test_fixed_scheme_keeps_dt() {
        let cfg = SolverConfig {
            time_stepping: TimeStepping::Fixed,
            ..adaptive_config()
        };
        let mut c = StepController::new(&cfg);
        for _ in 0..5 {
            c.on_accept(StepSignal::ConvergedEasily);
            assert_eq!(c.proposal().0, 1.0);
        }
    }
}
