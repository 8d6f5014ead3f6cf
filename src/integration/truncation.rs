//! Step acceptance strategies.
//!
//! A [`Truncation`] strategy looks at the history of the integration method
//! after a probed point converged and decides whether the point is accepted,
//! which step to try next and at which order.

use std::fmt::Debug;

use super::{History, IntegrationState};

/// Error constant of the trapezoidal family, indexed by order - 1.
const TRAPEZOIDAL_ERROR: [f64; 2] = [0.5, 1.0 / 12.0];

/// What a strategy sees of the integration method.
#[derive(Debug, Clone, Copy)]
pub struct TruncationContext<'a> {
    /// Points newest first; slot 0 holds the probed point
    pub history: &'a History<IntegrationState>,
    /// Order used for the probed point
    pub order: usize,
    /// Highest order the method supports
    pub max_order: usize,
    /// Number of registered state derivatives
    pub derivative_count: usize,
    /// Transient points accepted so far
    pub accepted_points: usize,
}

impl TruncationContext<'_> {
    /// Step that led to the probed point.
    pub fn delta(&self) -> f64 {
        self.history[0].delta
    }
}

/// Verdict on a probed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Keep the point
    pub accepted: bool,
    /// Next step (after acceptance) or retry step (after rejection)
    pub delta: f64,
    /// Order for the next step
    pub order: usize,
}

/// Strategy deciding step acceptance and the next step size.
pub trait Truncation: Debug + Send + Sync {
    /// Judge the probed point in slot 0 of the history.
    fn evaluate(&self, context: &TruncationContext<'_>) -> Evaluation;
}

/// Divided-difference estimate of the local truncation error of every
/// state derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTruncationError {
    pub rel_tol: f64,
    pub abs_tol: f64,
    /// Overestimation factor of the error estimate
    pub tr_tol: f64,
    /// Charge below which relative tolerance stops shrinking
    pub chg_tol: f64,
}

impl LocalTruncationError {
    /// Create a strategy with the given tolerances.
    pub fn new(rel_tol: f64, abs_tol: f64, tr_tol: f64, chg_tol: f64) -> Self {
        Self {
            rel_tol,
            abs_tol,
            tr_tol,
            chg_tol,
        }
    }

    /// Largest step allowed by every state derivative at `order`.
    fn timestep(&self, context: &TruncationContext<'_>, order: usize) -> f64 {
        let delta = context.delta();
        let mut step = f64::INFINITY;
        for derivative in 0..context.derivative_count {
            step = step.min(self.derivative_timestep(context, 2 * derivative, order));
        }
        step.min(2.0 * delta)
    }

    fn derivative_timestep(&self, context: &TruncationContext<'_>, index: usize, order: usize) -> f64 {
        let history = context.history;
        let order = order.min(history.len().saturating_sub(2)).max(1);
        let delta = context.delta();

        let q0 = history[0].values[index];
        let q1 = history[1].values[index];
        let i0 = history[0].values[index + 1];
        let i1 = history[1].values[index + 1];

        let current_tol = self.abs_tol + self.rel_tol * i0.abs().max(i1.abs());
        let charge_tol = self.rel_tol * q0.abs().max(q1.abs()).max(self.chg_tol) / delta;
        let tol = current_tol.max(charge_tol);

        // Divided differences over the last order + 2 points
        let mut diff: Vec<f64> = (0..=order + 1).map(|i| history[i].values[index]).collect();
        let mut span: Vec<f64> = (0..=order).map(|i| history[i].delta).collect();
        for j in (0..=order).rev() {
            for i in 0..=j {
                diff[i] = (diff[i] - diff[i + 1]) / span[i];
            }
            for i in 0..j {
                span[i] = span[i + 1] + history[i].delta;
            }
        }

        let factor = TRAPEZOIDAL_ERROR[order - 1];
        let del = self.tr_tol * tol / self.abs_tol.max(factor * diff[0].abs());
        match order {
            1 => del,
            2 => del.sqrt(),
            _ => (del.ln() / order as f64).exp(),
        }
    }
}

impl Truncation for LocalTruncationError {
    fn evaluate(&self, context: &TruncationContext<'_>) -> Evaluation {
        let delta = context.delta();
        let mut order = context.order;
        let mut next = self.timestep(context, order);

        if next <= 0.9 * delta {
            return Evaluation {
                accepted: false,
                delta: next,
                order,
            };
        }

        if order == 1 && context.max_order > 1 && context.accepted_points >= 2 {
            next = self.timestep(context, 2);
            order = if next > 1.05 * delta { 2 } else { 1 };
        }

        Evaluation {
            accepted: true,
            delta: next,
            order,
        }
    }
}

/// Accept every point and keep a constant step at first order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedStep {
    pub step: f64,
}

impl FixedStep {
    pub fn new(step: f64) -> Self {
        Self { step }
    }
}

impl Truncation for FixedStep {
    fn evaluate(&self, _context: &TruncationContext<'_>) -> Evaluation {
        Evaluation {
            accepted: true,
            delta: self.step,
            order: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// History of one state derivative with the given charges (newest first)
    /// and currents, all taken at step `h`.
    fn history(charges: [f64; 4], currents: [f64; 4], h: f64) -> History<IntegrationState> {
        let mut history = History::new(4, IntegrationState::default());
        for (i, point) in history.iter_mut().enumerate() {
            point.delta = h;
            point.values = vec![charges[i], currents[i]];
        }
        history
    }

    fn strategy() -> LocalTruncationError {
        LocalTruncationError::new(1e-3, 1e-12, 7.0, 1e-14)
    }

    #[test]
    fn test_no_states_doubles_step() {
        let history = History::new(4, IntegrationState {
            delta: 1e-6,
            ..Default::default()
        });
        let context = TruncationContext {
            history: &history,
            order: 1,
            max_order: 2,
            derivative_count: 0,
            accepted_points: 0,
        };
        let eval = strategy().evaluate(&context);
        assert!(eval.accepted);
        assert_relative_eq!(eval.delta, 2e-6);
        assert_eq!(eval.order, 1);
    }

    #[test]
    fn test_sharp_charge_is_rejected() {
        let history = history([1e-9, 0.0, 0.0, 0.0], [1e-3, 0.0, 0.0, 0.0], 1e-6);
        let context = TruncationContext {
            history: &history,
            order: 1,
            max_order: 2,
            derivative_count: 1,
            accepted_points: 5,
        };
        let eval = strategy().evaluate(&context);
        assert!(!eval.accepted);
        assert_relative_eq!(eval.delta, 2.8000028e-8, max_relative = 1e-6);
    }

    #[test]
    fn test_linear_charge_is_accepted() {
        let history = history([2e-9, 1e-9, 0.0, -1e-9], [1e-3; 4], 1e-6);
        let context = TruncationContext {
            history: &history,
            order: 1,
            max_order: 2,
            derivative_count: 1,
            accepted_points: 0,
        };
        let eval = strategy().evaluate(&context);
        assert!(eval.accepted);
        assert_relative_eq!(eval.delta, 2e-6);
        assert_eq!(eval.order, 1);
    }

    #[test]
    fn test_order_grows_with_history() {
        let history = history([2e-9, 1e-9, 0.0, -1e-9], [1e-3; 4], 1e-6);
        let context = TruncationContext {
            history: &history,
            order: 1,
            max_order: 2,
            derivative_count: 1,
            accepted_points: 2,
        };
        let eval = strategy().evaluate(&context);
        assert!(eval.accepted);
        assert_eq!(eval.order, 2);
        assert_relative_eq!(eval.delta, 2e-6);
    }

    #[test]
    fn test_fixed_step() {
        let history = history([1.0, 0.0, 0.0, 0.0], [0.0; 4], 1e-6);
        let context = TruncationContext {
            history: &history,
            order: 2,
            max_order: 2,
            derivative_count: 1,
            accepted_points: 10,
        };
        let eval = FixedStep::new(1e-7).evaluate(&context);
        assert_eq!(
            eval,
            Evaluation {
                accepted: true,
                delta: 1e-7,
                order: 1
            }
        );
    }
}
