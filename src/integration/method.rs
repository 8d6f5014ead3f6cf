//! Trapezoidal integration with variable step and order.

use std::sync::Arc;

use super::{History, Truncation, TruncationContext};
use crate::error::{NodalError, Result};
use crate::simulation::TimeConfig;

/// Highest order of the trapezoidal family used here.
pub const MAX_ORDER: usize = 2;

/// One point of the integration history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationState {
    /// Step that led to this point
    pub delta: f64,
    /// Circuit solution at this point
    pub solution: Vec<f64>,
    /// State derivative slots (value followed by its derivative)
    pub values: Vec<f64>,
}

/// Handle to a quantity whose time derivative is tracked by the method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateDerivative(usize);

/// Integration method shared by every transient behavior of a run.
///
/// Life cycle: [`initialize`](Self::initialize) once from the operating
/// point, then per time point [`continue_step`](Self::continue_step),
/// [`probe`](Self::probe), a Newton solve, and either
/// [`evaluate`](Self::evaluate) + [`accept`](Self::accept) or
/// [`non_convergence`](Self::non_convergence).
#[derive(Debug)]
pub struct IntegrationMethod {
    max_order: usize,
    order: usize,
    base_time: f64,
    time: f64,
    /// Coefficient of the present charge in the derivative formula
    slope: f64,
    history: History<IntegrationState>,
    state_count: usize,
    max_step: f64,
    min_step: f64,
    final_time: f64,
    accepted_points: usize,
    truncation: Arc<dyn Truncation>,
}

impl IntegrationMethod {
    /// Create a method for the time range of `config`.
    pub fn new(config: &TimeConfig, truncation: Arc<dyn Truncation>) -> Self {
        let max_step = config.max_step();
        Self {
            max_order: MAX_ORDER,
            order: 1,
            base_time: 0.0,
            time: 0.0,
            slope: 0.0,
            history: History::new(MAX_ORDER + 2, IntegrationState::default()),
            state_count: 0,
            max_step,
            min_step: config.min_step(),
            final_time: config.final_time,
            accepted_points: 0,
            truncation,
        }
    }

    /// Register a tracked quantity. Must happen before [`setup`](Self::setup).
    pub fn create_derivative(&mut self) -> StateDerivative {
        let derivative = StateDerivative(self.state_count);
        self.state_count += 2;
        derivative
    }

    /// Allocate the history for `variable_count` unknowns.
    pub fn setup(&mut self, variable_count: usize) {
        let point = IntegrationState {
            delta: self.max_step,
            solution: vec![0.0; variable_count],
            values: vec![0.0; self.state_count],
        };
        self.history = History::new(self.max_order + 2, point);
    }

    /// Seed every history slot with the operating point.
    ///
    /// Behaviors must have written their initial values into slot 0.
    pub fn initialize(&mut self, solution: &[f64]) {
        self.order = 1;
        self.base_time = 0.0;
        self.time = 0.0;
        self.accepted_points = 0;
        self.history.current_mut().solution.copy_from_slice(solution);
        self.history.replicate_current();
        for point in self.history.iter_mut() {
            point.delta = self.max_step;
        }
    }

    /// Advance to a new time point, limiting the proposed step.
    pub fn continue_step(&mut self, delta: &mut f64) {
        self.history.cycle();
        self.base_time = self.time;
        *delta = delta.min(self.max_step);
        let remaining = self.final_time - self.base_time;
        if *delta > remaining {
            *delta = remaining;
        }
    }

    /// Set up the working slot for a step of `delta` from the base time.
    pub fn probe(&mut self, delta: f64) {
        let mut time = self.base_time + delta;
        if (self.final_time - time).abs() < 0.5 * self.min_step {
            time = self.final_time;
        }
        self.time = time;
        self.history.current_mut().delta = delta;
        self.slope = match self.order {
            1 => 1.0 / delta,
            _ => 2.0 / delta,
        };
    }

    /// Compute the derivative of a tracked quantity at the probed point.
    pub fn integrate(&mut self, derivative: StateDerivative) {
        let index = derivative.0;
        let delta = self.history[0].delta;
        let q0 = self.history[0].values[index];
        let q1 = self.history[1].values[index];
        let value = match self.order {
            1 => (q0 - q1) / delta,
            _ => -self.history[1].values[index + 1] + 2.0 / delta * (q0 - q1),
        };
        self.history[0].values[index + 1] = value;
    }

    /// Let the strategy judge the probed point.
    ///
    /// Returns whether the point is accepted and the next (or retry) step.
    pub fn evaluate(&mut self) -> Result<(bool, f64)> {
        let context = TruncationContext {
            history: &self.history,
            order: self.order,
            max_order: self.max_order,
            derivative_count: self.state_count / 2,
            accepted_points: self.accepted_points,
        };
        let evaluation = self.truncation.evaluate(&context);
        self.order = evaluation.order.clamp(1, self.max_order);
        if evaluation.accepted {
            return Ok((true, evaluation.delta));
        }
        if evaluation.delta < self.min_step {
            return Err(NodalError::TimestepTooSmall {
                time: self.base_time,
                delta: evaluation.delta,
            });
        }
        log::trace!(
            "rejected t = {:.6e}, retrying with {:.3e}",
            self.time,
            evaluation.delta
        );
        Ok((false, evaluation.delta))
    }

    /// Recover from a failed Newton solve at the probed point.
    ///
    /// The last accepted solution is copied back into `solution`; returns
    /// the step to retry with.
    pub fn non_convergence(&mut self, solution: &mut [f64]) -> Result<f64> {
        let delta = self.history[0].delta / 8.0;
        self.order = 1;
        solution.copy_from_slice(&self.history[1].solution);
        if delta < self.min_step {
            return Err(NodalError::TimestepTooSmall {
                time: self.base_time,
                delta,
            });
        }
        Ok(delta)
    }

    /// Commit the probed point.
    pub fn accept(&mut self, solution: &[f64]) {
        self.history.current_mut().solution.copy_from_slice(solution);
        if self.time > 0.0 {
            self.accepted_points += 1;
        }
    }

    /// Conductance of a capacitance at the present step.
    pub fn jacobian(&self, capacitance: f64) -> f64 {
        capacitance * self.slope
    }

    /// Equivalent current of the companion model of `derivative`.
    pub fn rhs_current(&self, derivative: StateDerivative, geq: f64, voltage: f64) -> f64 {
        geq * voltage - self.derivative(derivative)
    }

    /// Set the tracked quantity at the working point.
    pub fn set_value(&mut self, derivative: StateDerivative, value: f64) {
        self.history[0].values[derivative.0] = value;
    }

    /// Tracked quantity at the working point.
    pub fn value(&self, derivative: StateDerivative) -> f64 {
        self.history[0].values[derivative.0]
    }

    /// Tracked quantity at the last accepted point.
    pub fn previous_value(&self, derivative: StateDerivative) -> f64 {
        self.history[1].values[derivative.0]
    }

    /// Time derivative at the working point.
    pub fn derivative(&self, derivative: StateDerivative) -> f64 {
        self.history[0].values[derivative.0 + 1]
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn base_time(&self) -> f64 {
        self.base_time
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn final_time(&self) -> f64 {
        self.final_time
    }

    pub fn min_step(&self) -> f64 {
        self.min_step
    }

    pub fn max_step(&self) -> f64 {
        self.max_step
    }

    /// Transient points accepted after time zero.
    pub fn accepted_points(&self) -> usize {
        self.accepted_points
    }

    pub fn history(&self) -> &History<IntegrationState> {
        &self.history
    }
}
