//! Mutable per-run simulation state.

use num_complex::Complex64;

use super::BiasingConfig;

/// How nonlinear devices pick their junction voltages for the next load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitializationMode {
    /// Use the present solution estimate
    #[default]
    None,
    /// Use built-in junction guesses (critical voltage, or zero when off)
    Junction,
    /// Keep devices that are flagged off at zero bias
    Fix,
}

/// Everything the Newton loop and the behaviors share during one run.
#[derive(Debug, Clone)]
pub struct SimulationState {
    /// Initialization mode for the next load
    pub init: InitializationMode,
    /// Cleared by any behavior that sees a local tolerance violated
    pub is_convergent: bool,
    /// True while solving an operating point (reactive elements open/short)
    pub use_dc: bool,
    /// True if initial conditions replace the operating point
    pub use_ic: bool,
    /// Scale applied to independent sources during source stepping
    pub source_factor: f64,
    /// Shunt conductance added across nonlinear junctions
    pub gmin: f64,
    /// Shunt conductance added to every matrix diagonal during gmin stepping
    pub diagonal_gmin: f64,
    /// Circuit temperature in kelvin
    pub temperature: f64,
    /// Temperature at which model parameters were measured, in kelvin
    pub nominal_temperature: f64,
    /// Current solution estimate
    pub solution: Vec<f64>,
    /// Solution observed by the behaviors during the previous iteration
    pub old_solution: Vec<f64>,
}

impl SimulationState {
    /// Create a state using the convergence aids and temperatures of `config`.
    pub fn new(config: &BiasingConfig) -> Self {
        Self {
            init: InitializationMode::None,
            is_convergent: true,
            use_dc: true,
            use_ic: false,
            source_factor: 1.0,
            gmin: config.gmin,
            diagonal_gmin: 0.0,
            temperature: config.temperature,
            nominal_temperature: config.nominal_temperature,
            solution: Vec::new(),
            old_solution: Vec::new(),
        }
    }

    /// Allocate solution buffers for `variable_count` unknowns (ground included).
    pub fn setup(&mut self, variable_count: usize) {
        self.solution = vec![0.0; variable_count];
        self.old_solution = vec![0.0; variable_count];
    }

    /// Swap current and previous solution buffers.
    pub fn store_solution(&mut self) {
        std::mem::swap(&mut self.solution, &mut self.old_solution);
    }

    /// Voltage between two variables of the current solution.
    pub fn voltage(&self, pos: usize, neg: usize) -> f64 {
        self.solution[pos] - self.solution[neg]
    }
}

/// State of a small-signal sweep.
#[derive(Debug, Clone)]
pub struct ComplexState {
    /// Laplace variable `s = j * 2 * pi * f`
    pub laplace: Complex64,
    /// Complex solution at the current frequency
    pub solution: Vec<Complex64>,
}

impl ComplexState {
    /// Create a state for `variable_count` unknowns (ground included).
    pub fn new(variable_count: usize) -> Self {
        Self {
            laplace: Complex64::new(0.0, 0.0),
            solution: vec![Complex64::new(0.0, 0.0); variable_count],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_solution_swaps_buffers() {
        let mut state = SimulationState::new(&BiasingConfig::default());
        state.setup(3);
        state.solution.copy_from_slice(&[0.0, 1.0, 2.0]);
        let ptr = state.solution.as_ptr();

        state.store_solution();

        assert_eq!(state.old_solution, vec![0.0, 1.0, 2.0]);
        assert_eq!(state.old_solution.as_ptr(), ptr);
        assert_eq!(state.solution, vec![0.0; 3]);
    }

    #[test]
    fn test_defaults_follow_config() {
        let config = BiasingConfig::default().with_gmin(1e-9);
        let state = SimulationState::new(&config);
        assert_eq!(state.gmin, 1e-9);
        assert_eq!(state.diagonal_gmin, 0.0);
        assert_eq!(state.source_factor, 1.0);
        assert_eq!(state.init, InitializationMode::None);
    }
}
