//! The BDF time integrator.
//!
//! Drives the whole state machine for one `solve` call: the step controller
//! proposes `(dt, k)`, the coefficient module turns the history ring into
//! step-scaled BDF coefficients and a predictor, the damped Newton iteration
//! solves the step's nonlinear system against the cached LU factorization,
//! and the controller digests the outcome. The iteration matrix
//! `G = α₀ M − dt J` is refactorized lazily: on the first step, on an order
//! change, when `dt` has drifted from the factorized value, after slow
//! convergence, and as a second chance before a convergence failure turns
//! into a step rejection.

use log::{debug, info, trace};
use serde::Serialize;

use crate::error::{DaeError, LinearSolverError, MatrixError};
use crate::jacobian::JacobianEngine;
use crate::linear_solver::SparseLu;
use crate::matrix::CsrMatrix;
use crate::nonlinear_solver::{newton_solve, Convergence, NewtonOutcome, NewtonWorkspace};
use crate::ode_solver::coefficients::{predict, BdfCoefficients};
use crate::ode_solver::config::SolverConfig;
use crate::ode_solver::controller::{StepController, StepSignal};
use crate::ode_solver::equations::{Jacobian, MassMatrix, Observer, Rhs};
use crate::ode_solver::history::HistoryRing;
use crate::op::bdf::BdfResidual;
use crate::scalar::{Float, MAX_ORDER};
use crate::solver_error;
use crate::vector::all_finite;

/// Reborrow an `Option<&mut dyn Jacobian>` with a lifetime tied to the
/// borrow of `opt` rather than to the trait object's own lifetime
/// parameter (which `Option::as_deref_mut` cannot shorten due to
/// invariance through the nested `&mut`).
fn reborrow_jacobian<'s>(
    opt: &'s mut Option<&mut dyn Jacobian>,
) -> Option<&'s mut dyn Jacobian> {
    match opt {
        Some(j) => Some(&mut **j),
        None => None,
    }
}

/// Relative `dt` drift from the factorized value that forces a rebuild of
/// the iteration matrix.
const REBUILD_DT_RATIO: Float = 0.3;

/// Diagnostic counters of one solve.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverStats {
    /// Accepted steps.
    pub steps: usize,
    /// Newton iterations across all step attempts.
    pub newton_iterations: usize,
    /// Rejected step attempts.
    pub rejections: usize,
    /// Jacobian evaluations (analytic calls or finite-difference sweeps).
    pub jacobian_evaluations: usize,
    /// Triangular solves.
    pub linear_solves: usize,
    /// Numeric LU factorizations.
    pub factorizations: usize,
    /// Highest BDF order used on an accepted step.
    pub max_order: usize,
    /// Ill-conditioning warnings from the linear solver.
    pub condition_warnings: usize,
}

/// Stiff DAE/ODE integrator for `M x' = f(x, t)`.
///
/// Borrows the user callbacks for its lifetime; one instance drives one
/// problem. A call to [`Solver::solve`] integrates from `t0` (configured)
/// to `t1` and overwrites `x` with the solution at `t1`.
///
/// ```
/// use daesol::{MassIdentity, Solver, SolverConfig, Float};
///
/// // x' = -x, x(0) = 1
/// let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0];
/// let mut mass = MassIdentity(1);
/// let mut solver = Solver::new(&mut rhs, &mut mass, SolverConfig::default());
/// let mut x = [1.0];
/// let stats = solver.solve(&mut x, 1.0).unwrap();
/// assert!(stats.steps > 0);
/// assert!((x[0] - (-1.0 as Float).exp()).abs() < 1e-2);
/// ```
pub struct Solver<'a> {
    rhs: &'a mut dyn Rhs,
    mass: &'a mut dyn MassMatrix,
    jacobian: Option<&'a mut dyn Jacobian>,
    observer: Option<&'a mut dyn Observer>,
    config: SolverConfig,
}

impl<'a> Solver<'a> {
    pub fn new(
        rhs: &'a mut dyn Rhs,
        mass: &'a mut dyn MassMatrix,
        config: SolverConfig,
    ) -> Self {
        Self {
            rhs,
            mass,
            jacobian: None,
            observer: None,
            config,
        }
    }

    /// Use an analytic Jacobian instead of finite differences.
    pub fn with_jacobian(mut self, jacobian: &'a mut dyn Jacobian) -> Self {
        self.jacobian = Some(jacobian);
        self
    }

    /// Receive `(x, t)` after every accepted step.
    pub fn with_observer(mut self, observer: &'a mut dyn Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Integrate to `t1`, overwriting `x` (entered as the initial condition
    /// at `t0`) with the solution. On error the contents of `x` are valid
    /// but unspecified.
    pub fn solve(&mut self, x: &mut [Float], t1: Float) -> Result<SolverStats, DaeError> {
        self.config.validate()?;
        let n = x.len();
        if n == 0 {
            return Err(solver_error!(
                InvalidConfig,
                "state vector is empty".to_string()
            ));
        }
        if !(t1 > self.config.t0) {
            return Err(solver_error!(
                InvalidConfig,
                format!("t1 = {t1} must be greater than t0 = {}", self.config.t0)
            ));
        }
        if !all_finite(x) {
            return Err(solver_error!(NonFiniteState {
                t: self.config.t0 as f64
            }));
        }

        // the mass matrix is requested once and cached for the whole solve;
        // the holder starts in builder state so the callback can append rows
        let mut mass = CsrMatrix::default();
        mass.reset(n, n);
        self.mass.fill(&mut mass);
        mass.validate()?;
        if mass.nrows() != n || mass.ncols() != n {
            return Err(DaeError::from(MatrixError::WrongShape {
                expected: n,
                nrows: mass.nrows(),
                ncols: mass.ncols(),
            }));
        }

        let verbosity = self.config.verbosity;
        let mut engine = JacobianEngine::new(
            reborrow_jacobian(&mut self.jacobian),
            self.config.fd_tol,
            n,
        );
        let mut op = BdfResidual::new(mass);
        let mut lu = SparseLu::new();
        let mut convergence =
            Convergence::new(self.config.atol, self.config.rtol, self.config.max_newton_iter);
        let mut controller = StepController::new(&self.config);
        let mut coeffs = BdfCoefficients::new();
        let mut history = HistoryRing::new(MAX_ORDER);
        let mut ws = NewtonWorkspace::new(n);
        let mut g = CsrMatrix::default();
        let mut x_work = vec![0.0; n];
        let mut stats = SolverStats::default();

        let mut t = self.config.t0;
        history.push(t, x);

        let mut have_factorization = false;
        let mut dt_at_factorization: Float = 0.0;
        let mut order_at_factorization = 0usize;
        let mut rebuild_requested = true;

        if verbosity >= 1 {
            info!("integrating from t = {t:e} to t = {t1:e}, {n} unknowns");
        }

        'stepping: loop {
            let (dt_proposed, order_proposed) = controller.proposal();
            let order = order_proposed.min(history.len());
            let mut dt = dt_proposed;
            let mut final_step = false;
            if t + dt >= t1 {
                dt = t1 - t;
                final_step = true;
            }
            let t_new = if final_step { t1 } else { t + dt };
            if t_new <= t {
                // dt vanished against the magnitude of t
                return Err(solver_error!(StepSizeTooSmall {
                    t: t as f64,
                    dt: dt as f64,
                    dt_min: self.config.dt_min as f64,
                }));
            }

            let alpha = coeffs.compute(order, dt, t_new, &history);
            op.set_step(alpha, dt, t_new, &history);
            predict(order, t_new, &history, &mut x_work);
            if verbosity >= 2 {
                debug!("attempting step to t = {t_new:e} (dt = {dt:e}, order {order})");
            }

            let needs_rebuild = rebuild_requested
                || !have_factorization
                || order != order_at_factorization
                || (dt / dt_at_factorization - 1.0).abs() > REBUILD_DT_RATIO;
            let mut fresh = false;
            if needs_rebuild {
                op.jacobian(&mut engine, &mut *self.rhs, &x_work, &mut g)?;
                match lu.factorize(&g) {
                    Ok(()) => {
                        have_factorization = true;
                        dt_at_factorization = dt;
                        order_at_factorization = order;
                        rebuild_requested = false;
                        fresh = true;
                    }
                    Err(DaeError::LinearSolverError(LinearSolverError::SingularMatrix)) => {
                        stats.rejections += 1;
                        rebuild_requested = true;
                        controller.on_reject(StepSignal::Singular, t)?;
                        continue 'stepping;
                    }
                    Err(e) => return Err(e),
                }
            }

            loop {
                let outcome = newton_solve(
                    &mut x_work,
                    &mut op,
                    &mut *self.rhs,
                    &mut lu,
                    &mut convergence,
                    &mut ws,
                )?;
                stats.newton_iterations += convergence.niter();
                if verbosity >= 3 {
                    trace!(
                        "Newton finished after {} iterations: {outcome:?}",
                        convergence.niter()
                    );
                }
                match outcome {
                    NewtonOutcome::Converged { iterations, damped } => {
                        if !all_finite(&x_work) {
                            return Err(solver_error!(NonFiniteState { t: t_new as f64 }));
                        }
                        t = t_new;
                        history.push(t, &x_work);
                        stats.steps += 1;
                        stats.max_order = stats.max_order.max(order);
                        if let Some(observer) = self.observer.as_deref_mut() {
                            observer.observe(&x_work, t);
                        }
                        let signal =
                            classify_convergence(iterations, damped, self.config.max_newton_iter);
                        if signal == StepSignal::Slow {
                            rebuild_requested = true;
                        }
                        controller.on_accept(signal);
                        if verbosity >= 2 {
                            debug!(
                                "step {} accepted at t = {t:e} ({iterations} Newton iterations, {signal:?})",
                                stats.steps
                            );
                        }
                        break;
                    }
                    NewtonOutcome::Stalled | NewtonOutcome::Diverged => {
                        if !fresh {
                            // second chance: refresh the Jacobian at the
                            // predictor before paying for a rejection
                            predict(order, t_new, &history, &mut x_work);
                            op.jacobian(&mut engine, &mut *self.rhs, &x_work, &mut g)?;
                            match lu.factorize(&g) {
                                Ok(()) => {
                                    have_factorization = true;
                                    dt_at_factorization = dt;
                                    order_at_factorization = order;
                                    fresh = true;
                                    continue;
                                }
                                Err(DaeError::LinearSolverError(
                                    LinearSolverError::SingularMatrix,
                                )) => {
                                    stats.rejections += 1;
                                    rebuild_requested = true;
                                    controller.on_reject(StepSignal::Singular, t)?;
                                    continue 'stepping;
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        stats.rejections += 1;
                        rebuild_requested = true;
                        controller.on_reject(StepSignal::Failed, t)?;
                        continue 'stepping;
                    }
                    NewtonOutcome::SingularJacobian => {
                        stats.rejections += 1;
                        rebuild_requested = true;
                        controller.on_reject(StepSignal::Singular, t)?;
                        continue 'stepping;
                    }
                }
            }

            if t >= t1 {
                x.copy_from_slice(&x_work);
                break;
            }
        }

        stats.jacobian_evaluations = engine.evaluations();
        stats.factorizations = lu.factorizations();
        stats.linear_solves = lu.solves();
        stats.condition_warnings = lu.condition_warnings();
        if verbosity >= 1 {
            info!(
                "reached t = {t:e}: {} steps, {} rejections, {} Newton iterations, {} factorizations",
                stats.steps, stats.rejections, stats.newton_iterations, stats.factorizations
            );
        }
        Ok(stats)
    }
}

/// Map a converged Newton run onto the controller's signal set.
fn classify_convergence(iterations: usize, damped: bool, max_iter: usize) -> StepSignal {
    if damped || iterations * 3 >= max_iter * 2 {
        StepSignal::Slow
    } else if iterations * 4 <= max_iter.max(4) {
        StepSignal::ConvergedEasily
    } else {
        StepSignal::Converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ode_solver::config::TimeStepping;
    use crate::ode_solver::equations::MassIdentity;
    use crate::ode_solver::test_models::{diagonal_linear, robertson, singular_chain, stiff_scalar};

    #[test]
    fn test_classify_convergence() {
        assert_eq!(classify_convergence(1, false, 15), StepSignal::ConvergedEasily);
        assert_eq!(classify_convergence(3, false, 15), StepSignal::ConvergedEasily);
        assert_eq!(classify_convergence(5, false, 15), StepSignal::Converged);
        assert_eq!(classify_convergence(10, false, 15), StepSignal::Slow);
        assert_eq!(classify_convergence(2, true, 15), StepSignal::Slow);
    }

    #[test]
    fn test_robertson_dae_with_analytic_jacobian() {
        // deliberately inconsistent x3(0) = 1e-3 to exercise initialization
        let mut x = [1.0, 0.0, 1.0e-3];
        let t1 = 4.0e6;
        let config = SolverConfig {
            dt_init: 1.0e-6,
            dt_max: t1 / 100.0,
            bdf_order: 5,
            time_stepping: TimeStepping::Adaptive,
            dt_increase_threshold: 2,
            ..Default::default()
        };
        let mut rhs = robertson::Robertson;
        let mut mass = robertson::RobertsonMass;
        let mut jac = robertson::RobertsonJacobian;
        let mut conservation_worst: Float = 0.0;
        let mut observer = |x: &[Float], _t: Float| {
            let c = (x[0] + x[1] + x[2] - 1.0).abs();
            if c > conservation_worst {
                conservation_worst = c;
            }
        };
        let stats = Solver::new(&mut rhs, &mut mass, config)
            .with_jacobian(&mut jac)
            .with_observer(&mut observer)
            .solve(&mut x, t1)
            .unwrap();
        drop(observer);

        // MATLAB ode15s reference solution
        let reference = [5.1675e-4, 2.068e-9, 9.9948e-1];
        assert!((x[0] - reference[0]).abs() / reference[0] < 0.02, "x1 = {:e}", x[0]);
        assert!((x[1] - reference[1]).abs() / reference[1] < 0.05, "x2 = {:e}", x[1]);
        assert!((x[2] - reference[2]).abs() / reference[2] < 0.02, "x3 = {:e}", x[2]);
        // the constraint row is linear, so every accepted step satisfies it
        // to machine precision
        #[cfg(not(feature = "f32"))]
        assert!(conservation_worst <= 1.0e-13, "conservation {conservation_worst:e}");
        assert!(stats.steps > 0);
    }

    #[test]
    fn test_robertson_finite_difference_matches_analytic() {
        // start mid-trajectory so every Jacobian coupling is active when the
        // finite-difference engine discovers its pattern
        let x0 = [0.7, 2.0e-5, 0.29998];
        let t1 = 1.0e2;
        let config = SolverConfig {
            dt_init: 1.0e-6,
            dt_max: t1 / 50.0,
            bdf_order: 4,
            fd_tol: 1.0e-10,
            ..Default::default()
        };

        let mut x_fd = x0;
        {
            let mut rhs = robertson::Robertson;
            let mut mass = robertson::RobertsonMass;
            Solver::new(&mut rhs, &mut mass, config.clone())
                .solve(&mut x_fd, t1)
                .unwrap();
        }

        let mut x_an = x0;
        {
            let mut rhs = robertson::Robertson;
            let mut mass = robertson::RobertsonMass;
            let mut jac = robertson::RobertsonJacobian;
            Solver::new(&mut rhs, &mut mass, config)
                .with_jacobian(&mut jac)
                .solve(&mut x_an, t1)
                .unwrap();
        }

        for (a, b) in x_fd.iter().zip(&x_an) {
            assert!((a - b).abs() <= 1.0e-4 * (1.0 + b.abs()), "{a:e} vs {b:e}");
        }
    }

    #[test]
    fn test_stiff_scalar_tracks_reference() {
        // x' = -1000 (x - cos t) - sin t, x(0) = 0; x(t) -> cos t
        let mut x = [0.0];
        let config = SolverConfig {
            dt_init: 1.0e-4,
            dt_max: 1.0e-2,
            bdf_order: 3,
            atol: 1.0e-8,
            rtol: 1.0e-8,
            ..Default::default()
        };
        let mut rhs = stiff_scalar::StiffScalar;
        let mut mass = MassIdentity(1);
        Solver::new(&mut rhs, &mut mass, config)
            .solve(&mut x, 1.0)
            .unwrap();
        let expect = (1.0 as Float).cos();
        assert!((x[0] - expect).abs() < 1.0e-3, "x = {}, cos 1 = {expect}", x[0]);
    }

    #[test]
    fn test_diagonal_system_reaches_higher_order() {
        let mut x = diagonal_linear::initial();
        let t1 = 10.0;
        let config = SolverConfig {
            dt_init: 1.0e-3,
            dt_max: 0.1,
            bdf_order: 5,
            time_stepping: TimeStepping::AdaptiveWithOrder,
            dt_increase_threshold: 2,
            ..Default::default()
        };
        let mut rhs = diagonal_linear::DiagonalLinear;
        let mut mass = MassIdentity(diagonal_linear::N);
        let stats = Solver::new(&mut rhs, &mut mass, config)
            .solve(&mut x, t1)
            .unwrap();
        for (i, xi) in x.iter().enumerate() {
            let expect = diagonal_linear::exact(i, t1);
            assert!(
                (xi - expect).abs() < 1.0e-4 * (1.0 + expect.abs()),
                "component {i}: {xi} vs {expect}"
            );
        }
        assert!(stats.max_order >= 3, "max order {}", stats.max_order);
    }

    #[test]
    fn test_singular_mass_chain_satisfies_constraint() {
        // x1' = -x1, 0 = x2 - x1^2
        let mut x = [1.0, 1.0];
        let config = SolverConfig {
            dt_init: 1.0e-3,
            dt_max: 0.02,
            bdf_order: 2,
            ..Default::default()
        };
        let atol = config.atol;
        let mut worst: Float = 0.0;
        let mut rhs = singular_chain::SingularChain;
        let mut mass = singular_chain::SingularChainMass;
        let mut observer = |x: &[Float], _t: Float| {
            let c = (x[1] - x[0] * x[0]).abs();
            if c > worst {
                worst = c;
            }
        };
        Solver::new(&mut rhs, &mut mass, config)
            .with_observer(&mut observer)
            .solve(&mut x, 2.0)
            .unwrap();
        drop(observer);
        assert!(worst <= 10.0 * atol, "constraint violation {worst:e}");
        assert!((x[0] - (-2.0 as Float).exp()).abs() < 1.0e-3);
    }

    #[test]
    fn test_jacobian_pattern_change_aborts() {
        use crate::error::SolverError;
        let mut x = [1.0, 0.0, 0.0];
        let config = SolverConfig {
            dt_init: 1.0e-6,
            ..Default::default()
        };
        let mut rhs = robertson::Robertson;
        let mut mass = robertson::RobertsonMass;
        let mut jac = robertson::PatternChangingJacobian::default();
        let err = Solver::new(&mut rhs, &mut mass, config)
            .with_jacobian(&mut jac)
            .solve(&mut x, 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            DaeError::SolverError(SolverError::JacobianPatternChanged)
        ));
    }

    #[test]
    fn test_fixed_stepping_gives_uniform_grid() {
        let dt = 0.125;
        let mut x = [1.0];
        let config = SolverConfig {
            dt_init: dt,
            time_stepping: TimeStepping::Fixed,
            ..Default::default()
        };
        let mut times = Vec::new();
        let mut rhs = |x: &[Float], _t: Float, f: &mut [Float]| f[0] = -x[0];
        let mut mass = MassIdentity(1);
        let mut observer = |_x: &[Float], t: Float| times.push(t);
        Solver::new(&mut rhs, &mut mass, config)
            .with_observer(&mut observer)
            .solve(&mut x, 1.0)
            .unwrap();
        drop(observer);
        assert_eq!(times.len(), 8);
        for (k, &t) in times.iter().enumerate() {
            assert!((t - dt * (k + 1) as Float).abs() < 1e-12);
        }
        assert_eq!(*times.last().unwrap(), 1.0);
    }

    #[test]
    fn test_observer_sees_strictly_increasing_times() {
        let mut x = [1.0, 0.0, 0.0];
        let config = SolverConfig {
            dt_init: 1.0e-6,
            dt_max: 10.0,
            bdf_order: 3,
            ..Default::default()
        };
        let mut times: Vec<Float> = Vec::new();
        let mut rhs = robertson::Robertson;
        let mut mass = robertson::RobertsonMass;
        let mut observer = |_x: &[Float], t: Float| times.push(t);
        let stats = Solver::new(&mut rhs, &mut mass, config)
            .with_observer(&mut observer)
            .solve(&mut x, 100.0)
            .unwrap();
        drop(observer);
        assert_eq!(times.len(), stats.steps);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*times.last().unwrap(), 100.0);
    }

    #[test]
    fn test_constant_problem_returns_initial_state() {
        // M x' = 0 with nonsingular M keeps x at x0
        let mut x = [3.0, -4.0];
        let config = SolverConfig::default();
        let atol = config.atol;
        let rtol = config.rtol;
        let mut rhs = |_x: &[Float], _t: Float, f: &mut [Float]| f.fill(0.0);
        let mut mass = MassIdentity(2);
        Solver::new(&mut rhs, &mut mass, config)
            .solve(&mut x, 50.0)
            .unwrap();
        assert!((x[0] - 3.0).abs() <= atol + rtol * 3.0);
        assert!((x[1] + 4.0).abs() <= atol + rtol * 4.0);
    }

    #[test]
    fn test_entry_validation() {
        let config = SolverConfig::default();
        let mut rhs = |_x: &[Float], _t: Float, f: &mut [Float]| f.fill(0.0);
        let mut mass = MassIdentity(1);

        // empty state
        let mut empty: [Float; 0] = [];
        assert!(Solver::new(&mut rhs, &mut mass, config.clone())
            .solve(&mut empty, 1.0)
            .is_err());

        // t1 before t0
        let mut x = [1.0];
        assert!(Solver::new(&mut rhs, &mut mass, config.clone())
            .solve(&mut x, -1.0)
            .is_err());

        // bad order
        let bad = SolverConfig {
            bdf_order: 9,
            ..config
        };
        assert!(Solver::new(&mut rhs, &mut mass, bad).solve(&mut x, 1.0).is_err());
    }

    #[test]
    fn test_stats_serialize() {
        let stats = SolverStats::default();
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"steps\":0"));
        assert!(json.contains("\"max_order\":0"));
    }

    #[test]
    fn test_mismatched_mass_matrix_is_rejected() {
        let mut rhs = |_x: &[Float], _t: Float, f: &mut [Float]| f.fill(0.0);
        // mass callback producing the wrong shape
        let mut mass = |m: &mut CsrMatrix| {
            m.reset(2, 2);
            m.append_row([(0, 1.0)]);
            m.append_row([(1, 1.0)]);
        };
        let mut x = [1.0, 2.0, 3.0];
        let err = Solver::new(&mut rhs, &mut mass, SolverConfig::default())
            .solve(&mut x, 1.0)
            .unwrap_err();
        assert!(matches!(err, DaeError::MatrixError(_)));
    }
}
