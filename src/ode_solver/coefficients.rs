//! Variable-step BDF coefficients and the predictor.
//!
//! The coefficients come from differentiating the Lagrange polynomial
//! through `(t_{n+1}, x_{n+1})` and the last `k` history points, evaluated
//! at `t_{n+1}` and scaled by `dt`:
//!
//!   αᵢ = dt · L'ᵢ(t_{n+1}),   i = 0..k
//!
//! so that `Σ αᵢ x_{n+1-i} = dt · x'(t_{n+1})` exactly for polynomials of
//! degree ≤ k. With uniform spacing this reproduces the classical fixed-step
//! BDF coefficients (e.g. `3/2, -2, 1/2` at order 2). The coefficients are
//! cached and only recomputed when the order, the step size or the history
//! spacing changes.

use crate::ode_solver::history::HistoryRing;
use crate::scalar::{Float, MAX_ORDER};

pub(crate) struct BdfCoefficients {
    alpha: [Float; MAX_ORDER + 1],
    taus: [Float; MAX_ORDER + 1],
    order: usize,
    valid: bool,
}

impl BdfCoefficients {
    pub fn new() -> Self {
        Self {
            alpha: [0.0; MAX_ORDER + 1],
            taus: [0.0; MAX_ORDER + 1],
            order: 0,
            valid: false,
        }
    }

    /// Coefficients `alpha[0..=order]` for a step from the newest history
    /// point to `t_new = history.time(0) + dt`.
    pub fn compute(
        &mut self,
        order: usize,
        dt: Float,
        t_new: Float,
        history: &HistoryRing,
    ) -> &[Float] {
        debug_assert!(order >= 1 && order <= MAX_ORDER);
        debug_assert!(history.len() >= order);

        let mut taus = [0.0; MAX_ORDER + 1];
        taus[0] = t_new;
        for i in 1..=order {
            taus[i] = history.time(i - 1);
        }
        if self.valid && self.order == order && self.taus[..=order] == taus[..=order] {
            return &self.alpha[..=order];
        }

        for i in 0..=order {
            self.alpha[i] = dt * lagrange_derivative_weight(i, &taus[..=order]);
        }
        self.taus = taus;
        self.order = order;
        self.valid = true;
        &self.alpha[..=order]
    }
}

/// `L'_i(tau_0)` for the Lagrange basis over the nodes `taus`.
fn lagrange_derivative_weight(i: usize, taus: &[Float]) -> Float {
    let tau0 = taus[0];
    if i == 0 {
        let mut acc = 0.0;
        for &tm in taus.iter().skip(1) {
            acc += 1.0 / (tau0 - tm);
        }
        acc
    } else {
        let ti = taus[i];
        let mut num = 1.0;
        let mut den = 1.0;
        for (m, &tm) in taus.iter().enumerate() {
            if m == i {
                continue;
            }
            if m != 0 {
                num *= tau0 - tm;
            }
            den *= ti - tm;
        }
        num / den
    }
}

/// Extrapolate the polynomial through the `order` newest history points to
/// `t_new`, writing the predictor into `x_out`.
pub(crate) fn predict(order: usize, t_new: Float, history: &HistoryRing, x_out: &mut [Float]) {
    debug_assert!(history.len() >= order);
    x_out.fill(0.0);
    for i in 0..order {
        let ti = history.time(i);
        let mut w = 1.0;
        for m in 0..order {
            if m == i {
                continue;
            }
            let tm = history.time(m);
            w *= (t_new - tm) / (ti - tm);
        }
        for (xo, &xi) in x_out.iter_mut().zip(history.state(i)) {
            *xo += w * xi;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_history(order: usize, dt: Float) -> HistoryRing {
        let mut h = HistoryRing::new(MAX_ORDER);
        for i in (0..order).rev() {
            h.push(-(i as Float) * dt, &[0.0]);
        }
        h
    }

    #[test]
    fn test_fixed_step_bdf1_and_bdf2() {
        let dt = 0.5;
        let mut c = BdfCoefficients::new();

        let h = uniform_history(1, dt);
        let alpha = c.compute(1, dt, dt, &h);
        assert!((alpha[0] - 1.0).abs() < 1e-12);
        assert!((alpha[1] + 1.0).abs() < 1e-12);

        let h = uniform_history(2, dt);
        let alpha = c.compute(2, dt, dt, &h);
        assert!((alpha[0] - 1.5).abs() < 1e-12);
        assert!((alpha[1] + 2.0).abs() < 1e-12);
        assert!((alpha[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_coefficients_differentiate_polynomials_exactly() {
        // at order k, sum_i alpha_i/dt * p(tau_i) must equal p'(tau_0) for
        // every polynomial p of degree <= k, on a non-uniform grid
        let times = [0.0, 0.3, 0.7, 1.5, 2.0, 2.3, 3.1];
        for order in 1..=MAX_ORDER {
            let mut h = HistoryRing::new(MAX_ORDER);
            for i in (1..=order).rev() {
                h.push(-times[i], &[0.0]);
            }
            let dt = times[0] - (-times[1]);
            let t_new = 0.0;
            let mut c = BdfCoefficients::new();
            let alpha = c.compute(order, dt, t_new, &h);
            for degree in 0..=order {
                // p(t) = t^degree, p'(0) = (degree == 1) as Float
                let mut deriv = 0.0;
                let taus: Vec<Float> =
                    std::iter::once(t_new).chain((1..=order).map(|i| -times[i])).collect();
                for (i, &ai) in alpha.iter().enumerate() {
                    deriv += ai / dt * taus[i].powi(degree as i32);
                }
                let expect = if degree == 1 { 1.0 } else { 0.0 };
                assert!(
                    (deriv - expect).abs() < 1e-9,
                    "order {order} degree {degree}: got {deriv}, want {expect}"
                );
            }
        }
    }

    #[test]
    fn test_predictor_is_exact_for_history_polynomial() {
        // history sampled from x(t) = 1 + 2t + 3t^2, three points
        let poly = |t: Float| 1.0 + 2.0 * t + 3.0 * t * t;
        let mut h = HistoryRing::new(MAX_ORDER);
        for &t in &[-1.0, -0.4, 0.0] {
            h.push(t, &[poly(t)]);
        }
        let mut x = [0.0];
        predict(3, 0.5, &h, &mut x);
        assert!((x[0] - poly(0.5)).abs() < 1e-10);
        // with a single history point the predictor is the current state
        predict(1, 0.5, &h, &mut x);
        assert!((x[0] - poly(0.0)).abs() < 1e-12);
    }
}
