//! Simulation parameters.

use std::sync::Arc;

use crate::error::{NodalError, Result};
use crate::integration::Truncation;
use crate::REFERENCE_TEMPERATURE;

/// Default relative tolerance.
pub const DEFAULT_REL_TOL: f64 = 1e-3;

/// Default absolute current tolerance (amperes).
pub const DEFAULT_ABS_TOL: f64 = 1e-12;

/// Default absolute voltage tolerance (volts).
pub const DEFAULT_VOLT_TOL: f64 = 1e-6;

/// Default junction shunt conductance (siemens).
pub const DEFAULT_GMIN: f64 = 1e-12;

/// Parameters of every operating-point solve.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasingConfig {
    /// Relative tolerance on solution updates and device currents
    pub rel_tol: f64,
    /// Absolute tolerance for currents
    pub abs_tol: f64,
    /// Absolute tolerance for voltages
    pub volt_tol: f64,
    /// Nominal junction shunt conductance
    pub gmin: f64,
    /// Iteration cap for an operating point
    pub dc_max_iterations: usize,
    /// Iteration cap for the points of a DC sweep after the first
    pub sweep_max_iterations: usize,
    /// Number of decades gmin stepping starts above nominal (0 disables it)
    pub gmin_steps: usize,
    /// Number of increments of source stepping (0 disables it)
    pub source_steps: usize,
    /// Circuit temperature in kelvin
    pub temperature: f64,
    /// Nominal model temperature in kelvin
    pub nominal_temperature: f64,
}

impl Default for BiasingConfig {
    fn default() -> Self {
        Self {
            rel_tol: DEFAULT_REL_TOL,
            abs_tol: DEFAULT_ABS_TOL,
            volt_tol: DEFAULT_VOLT_TOL,
            gmin: DEFAULT_GMIN,
            dc_max_iterations: 100,
            sweep_max_iterations: 20,
            gmin_steps: 10,
            source_steps: 10,
            temperature: REFERENCE_TEMPERATURE,
            nominal_temperature: REFERENCE_TEMPERATURE,
        }
    }
}

impl BiasingConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the relative tolerance.
    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    /// Set the absolute current tolerance.
    pub fn with_abs_tol(mut self, abs_tol: f64) -> Self {
        self.abs_tol = abs_tol;
        self
    }

    /// Set the absolute voltage tolerance.
    pub fn with_volt_tol(mut self, volt_tol: f64) -> Self {
        self.volt_tol = volt_tol;
        self
    }

    /// Set the nominal junction shunt conductance.
    pub fn with_gmin(mut self, gmin: f64) -> Self {
        self.gmin = gmin;
        self
    }

    /// Set the iteration cap of an operating point.
    pub fn with_dc_max_iterations(mut self, iterations: usize) -> Self {
        self.dc_max_iterations = iterations;
        self
    }

    /// Set the iteration cap of the DC sweep points after the first.
    pub fn with_sweep_max_iterations(mut self, iterations: usize) -> Self {
        self.sweep_max_iterations = iterations;
        self
    }

    /// Set the number of gmin steps (0 disables gmin stepping).
    pub fn with_gmin_steps(mut self, steps: usize) -> Self {
        self.gmin_steps = steps;
        self
    }

    /// Set the number of source steps (0 disables source stepping).
    pub fn with_source_steps(mut self, steps: usize) -> Self {
        self.source_steps = steps;
        self
    }

    /// Set the circuit temperature in degrees Celsius.
    pub fn with_temperature_celsius(mut self, celsius: f64) -> Self {
        self.temperature = celsius + crate::CELSIUS_KELVIN;
        self
    }

    /// Check that tolerances and caps make sense.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("rel_tol", self.rel_tol),
            ("abs_tol", self.abs_tol),
            ("volt_tol", self.volt_tol),
            ("temperature", self.temperature),
            ("nominal_temperature", self.nominal_temperature),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(NodalError::invalid_simulation(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !(self.gmin.is_finite() && self.gmin >= 0.0) {
            return Err(NodalError::invalid_simulation(format!(
                "gmin must be non-negative, got {}",
                self.gmin
            )));
        }
        if self.dc_max_iterations == 0 || self.sweep_max_iterations == 0 {
            return Err(NodalError::invalid_simulation(
                "iteration caps must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Parameters of a transient analysis.
#[derive(Debug, Clone)]
pub struct TimeConfig {
    /// Suggested output step
    pub step: f64,
    /// Time at which the analysis stops
    pub final_time: f64,
    /// Time points before this are computed but not recorded
    pub start_time: f64,
    /// Largest allowed step (defaults to `min(step, (final - start) / 50)`)
    pub max_step: Option<f64>,
    /// Iteration cap for each time point
    pub max_iterations: usize,
    /// Truncation error overestimation factor
    pub tr_tol: f64,
    /// Charge tolerance (coulombs)
    pub chg_tol: f64,
    /// Use device initial conditions instead of the operating point
    pub use_ic: bool,
    /// Step control strategy (local truncation error when unset)
    pub truncation: Option<Arc<dyn Truncation>>,
}

impl TimeConfig {
    /// Create a configuration running from 0 to `final_time`.
    pub fn new(step: f64, final_time: f64) -> Self {
        Self {
            step,
            final_time,
            start_time: 0.0,
            max_step: None,
            max_iterations: 10,
            tr_tol: 7.0,
            chg_tol: 1e-14,
            use_ic: false,
            truncation: None,
        }
    }

    /// Set the first recorded time.
    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Set the largest allowed step.
    pub fn with_max_step(mut self, max_step: f64) -> Self {
        self.max_step = Some(max_step);
        self
    }

    /// Set the iteration cap of each time point.
    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the truncation error overestimation factor.
    pub fn with_tr_tol(mut self, tr_tol: f64) -> Self {
        self.tr_tol = tr_tol;
        self
    }

    /// Start from device initial conditions.
    pub fn with_use_ic(mut self, use_ic: bool) -> Self {
        self.use_ic = use_ic;
        self
    }

    /// Replace the step control strategy.
    pub fn with_truncation(mut self, truncation: Arc<dyn Truncation>) -> Self {
        self.truncation = Some(truncation);
        self
    }

    /// Largest allowed step.
    pub fn max_step(&self) -> f64 {
        self.max_step
            .unwrap_or_else(|| self.step.min((self.final_time - self.start_time) / 50.0))
    }

    /// Steps below this abort the analysis.
    pub fn min_step(&self) -> f64 {
        1e-9 * self.max_step()
    }

    /// Step of the first time point.
    pub fn initial_step(&self) -> f64 {
        (self.final_time / 50.0).min(self.step) / 10.0
    }

    /// Check that the time range and tolerances make sense.
    pub fn validate(&self) -> Result<()> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(NodalError::invalid_simulation(format!(
                "step must be positive, got {}",
                self.step
            )));
        }
        if !(self.start_time >= 0.0 && self.final_time > self.start_time) {
            return Err(NodalError::invalid_simulation(format!(
                "time range [{}, {}] is empty",
                self.start_time, self.final_time
            )));
        }
        if !(self.max_step() > 0.0) {
            return Err(NodalError::invalid_simulation("max_step must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(NodalError::invalid_simulation(
                "max_iterations must be at least 1",
            ));
        }
        if !(self.tr_tol > 0.0 && self.chg_tol > 0.0) {
            return Err(NodalError::invalid_simulation(
                "tr_tol and chg_tol must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biasing_defaults() {
        let config = BiasingConfig::default();
        assert_eq!(config.rel_tol, 1e-3);
        assert_eq!(config.abs_tol, 1e-12);
        assert_eq!(config.volt_tol, 1e-6);
        assert_eq!(config.dc_max_iterations, 100);
        assert_eq!(config.temperature, 300.15);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_tolerance() {
        let config = BiasingConfig::new().with_rel_tol(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_defaults() {
        let config = TimeConfig::new(1e-6, 1e-3);
        assert_eq!(config.max_step(), 1e-6);
        assert_eq!(config.initial_step(), 1e-7);
        assert_eq!(config.min_step(), 1e-15);
        config.validate().unwrap();

        let config = TimeConfig::new(1e-3, 1e-2);
        assert_eq!(config.max_step(), 2e-4);
    }

    #[test]
    fn test_empty_time_range() {
        let config = TimeConfig::new(1e-6, 1e-3).with_start_time(2e-3);
        assert!(config.validate().is_err());
    }
}
