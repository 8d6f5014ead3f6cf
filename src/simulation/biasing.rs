//! Newton engine shared by every analysis.

use std::sync::Arc;

use super::{BiasingConfig, InitializationMode, SimulationState};
use crate::algebra::EquationStore;
use crate::circuit::{validate_circuit, Circuit, VariableKind, VariableSet};
use crate::devices::{AllocationContext, Behavior, ConvergenceContext, LoadContext, TransientContext};
use crate::error::{NodalError, Result};
use crate::integration::IntegrationMethod;

/// Bookkeeping counters of one simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Newton iterations over all solves
    pub iterations: usize,
    /// Operating points and sweep points solved
    pub solves: usize,
    /// Time points probed
    pub time_points: usize,
    /// Time points accepted
    pub accepted: usize,
    /// Time points rejected by the step control
    pub rejected: usize,
}

/// A circuit bound to its variables, behaviors and equation store.
pub struct BiasingSimulation {
    pub(crate) config: BiasingConfig,
    pub(crate) variables: Arc<VariableSet>,
    pub(crate) behaviors: Vec<Box<dyn Behavior>>,
    pub(crate) state: SimulationState,
    pub(crate) store: EquationStore<f64>,
    pub(crate) statistics: Statistics,
    /// Last solve error of the running operating point search
    failure: Option<NodalError>,
    /// Whether any attempt without the diagonal shunt got past factorization
    factored: bool,
}

impl BiasingSimulation {
    /// Create behaviors for every component and allocate the equations.
    pub fn setup(circuit: &Circuit, config: &BiasingConfig) -> Result<Self> {
        config.validate()?;
        validate_circuit(circuit)?;

        let mut variables = VariableSet::new();
        let mut behaviors = Vec::with_capacity(circuit.len());
        for component in circuit.components() {
            let mut behavior = component.create_behavior()?;
            let pins: Vec<usize> = component
                .nodes()
                .iter()
                .map(|node| variables.map_node(node))
                .collect();
            behavior.connect(&pins)?;
            behaviors.push(behavior);
        }

        // Variables first so that named dependencies resolve in any order
        for behavior in behaviors.iter_mut() {
            if let Some(biasing) = behavior.biasing() {
                biasing.create_variables(&mut variables)?;
            }
        }

        let mut store = EquationStore::new(variables.len());
        for behavior in behaviors.iter_mut() {
            if let Some(biasing) = behavior.biasing() {
                biasing.allocate(&mut AllocationContext {
                    variables: &variables,
                    store: &mut store,
                })?;
            }
        }

        let mut state = SimulationState::new(config);
        state.setup(variables.len());
        for behavior in behaviors.iter_mut() {
            if let Some(biasing) = behavior.biasing() {
                biasing.temperature(&state);
            }
        }

        log::debug!(
            "setup: {} components, {} variables, {} matrix elements",
            behaviors.len(),
            variables.len(),
            store.element_count()
        );

        Ok(Self {
            config: config.clone(),
            variables: Arc::new(variables),
            behaviors,
            state,
            store,
            statistics: Statistics::default(),
            failure: None,
            factored: false,
        })
    }

    pub fn variables(&self) -> &Arc<VariableSet> {
        &self.variables
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    pub fn config(&self) -> &BiasingConfig {
        &self.config
    }

    /// Clear the store and let every behavior stamp its equations.
    pub(crate) fn load(&mut self, mut method: Option<&mut IntegrationMethod>) {
        self.store.clear();
        let time = match method.as_deref() {
            Some(method) if !self.state.use_dc => Some(method.time()),
            _ => None,
        };
        for behavior in self.behaviors.iter_mut() {
            if let Some(biasing) = behavior.biasing() {
                biasing.load(&mut LoadContext {
                    state: &mut self.state,
                    store: &mut self.store,
                    time,
                });
            }
        }

        if self.state.use_dc {
            return;
        }
        if let Some(method) = method.as_deref_mut() {
            for behavior in self.behaviors.iter_mut() {
                if let Some(transient) = behavior.transient() {
                    transient.load(&mut TransientContext {
                        state: &mut self.state,
                        store: &mut self.store,
                        method: &mut *method,
                    });
                }
            }
        }
    }

    /// Run Newton iterations until convergence or `max_iterations`.
    ///
    /// Returns false if the cap was reached. A singular matrix is an error.
    pub(crate) fn iterate(
        &mut self,
        max_iterations: usize,
        mut method: Option<&mut IntegrationMethod>,
    ) -> Result<bool> {
        for _ in 0..max_iterations {
            self.state.is_convergent = true;
            self.load(method.as_deref_mut());
            self.store.factor(self.state.diagonal_gmin)?;

            // The previous buffer now holds what the behaviors just saw
            self.state.store_solution();
            self.store.solve(&mut self.state.solution)?;
            self.statistics.iterations += 1;

            let converged = self.is_convergent();
            log::trace!(
                "iteration {}: init {:?}, converged {}",
                self.statistics.iterations,
                self.state.init,
                converged
            );

            match self.state.init {
                InitializationMode::None if converged => return Ok(true),
                InitializationMode::None => {}
                InitializationMode::Junction => self.state.init = InitializationMode::Fix,
                InitializationMode::Fix => {
                    if converged {
                        self.state.init = InitializationMode::None;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Check the state flag, every solution update and every device.
    fn is_convergent(&mut self) -> bool {
        if !self.state.is_convergent {
            return false;
        }
        let config = &self.config;
        let solution = &self.state.solution;
        let previous = &self.state.old_solution;
        for variable in self.variables.iter().skip(1) {
            let new = solution[variable.index];
            let old = previous[variable.index];
            if new.is_nan() {
                log::trace!("{variable} is not a number");
                return false;
            }
            let floor = match variable.kind {
                VariableKind::Voltage => config.volt_tol,
                VariableKind::Current => config.abs_tol,
            };
            let tol = config.rel_tol * new.abs().max(old.abs()) + floor;
            if (new - old).abs() > tol {
                return false;
            }
        }

        let mut context = ConvergenceContext {
            state: &mut self.state,
            config: &self.config,
        };
        self.behaviors.iter_mut().all(|behavior| {
            behavior
                .biasing()
                .map_or(true, |biasing| biasing.is_convergent(&mut context))
        })
    }

    /// Find an operating point, falling back to gmin and source stepping.
    ///
    /// If no attempt could factor the matrix, the factorization error is
    /// returned instead of [`NodalError::NoOperatingPoint`].
    pub(crate) fn op(
        &mut self,
        max_iterations: usize,
        mut method: Option<&mut IntegrationMethod>,
    ) -> Result<()> {
        self.statistics.solves += 1;
        let start = self.state.solution.clone();
        self.failure = None;
        self.factored = false;

        self.state.init = InitializationMode::None;
        if self.attempt(max_iterations, method.as_deref_mut()) {
            return Ok(());
        }

        if self.config.gmin_steps > 0 {
            log::warn!("direct operating point failed, starting gmin stepping");
            self.state.solution.copy_from_slice(&start);
            if self.gmin_stepping(max_iterations, method.as_deref_mut())? {
                return Ok(());
            }
        }

        if self.config.source_steps > 0 {
            log::warn!("gmin stepping failed, starting source stepping");
            self.state.solution.copy_from_slice(&start);
            if self.source_stepping(max_iterations, method.as_deref_mut())? {
                return Ok(());
            }
        }

        match self.failure.take() {
            Some(e) if !self.factored => Err(e),
            _ => Err(NodalError::NoOperatingPoint {
                iterations: self.statistics.iterations,
            }),
        }
    }

    fn gmin_stepping(
        &mut self,
        max_iterations: usize,
        mut method: Option<&mut IntegrationMethod>,
    ) -> Result<bool> {
        let steps = self.config.gmin_steps;
        let nominal = self.config.gmin.max(1e-12);
        self.state.init = InitializationMode::Junction;

        let mut converged = true;
        for i in 0..=steps {
            let gmin = nominal * 10f64.powi((steps - i) as i32);
            self.state.diagonal_gmin = gmin;
            self.state.gmin = gmin;
            log::debug!("gmin step {i}/{steps}: gmin = {gmin:.3e}");
            if !self.attempt(max_iterations, method.as_deref_mut()) {
                log::warn!("gmin step at {gmin:.3e} did not converge");
                converged = false;
                break;
            }
            self.state.init = InitializationMode::None;
        }

        self.state.gmin = self.config.gmin;
        self.state.diagonal_gmin = 0.0;
        if !converged {
            return Ok(false);
        }
        Ok(self.attempt(max_iterations, method))
    }

    fn source_stepping(
        &mut self,
        max_iterations: usize,
        mut method: Option<&mut IntegrationMethod>,
    ) -> Result<bool> {
        let steps = self.config.source_steps;
        self.state.init = InitializationMode::Junction;

        let mut converged = true;
        for i in 0..=steps {
            self.state.source_factor = i as f64 / steps as f64;
            log::debug!("source step {i}/{steps}: factor = {:.3}", self.state.source_factor);
            if !self.attempt(max_iterations, method.as_deref_mut()) {
                log::warn!("source step at factor {:.3} did not converge", self.state.source_factor);
                converged = false;
                break;
            }
        }
        self.state.source_factor = 1.0;
        Ok(converged)
    }

    /// One Newton run where a singular matrix counts as a failed attempt.
    fn attempt(&mut self, max_iterations: usize, method: Option<&mut IntegrationMethod>) -> bool {
        match self.iterate(max_iterations, method) {
            Ok(converged) => {
                self.factored |= self.state.diagonal_gmin == 0.0;
                converged
            }
            Err(e) => {
                log::debug!("continuation step failed: {e}");
                self.failure = Some(e);
                false
            }
        }
    }
}

impl std::fmt::Debug for BiasingSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiasingSimulation")
            .field("variables", &self.variables.len())
            .field("behaviors", &self.behaviors.len())
            .field("statistics", &self.statistics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{CurrentSource, Resistor, VoltageSource};
    use approx::assert_relative_eq;

    fn divider() -> Circuit {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["in", "0"], 10.0)).unwrap();
        circuit.add(Resistor::new("R1", &["in", "out"], 1e3)).unwrap();
        circuit.add(Resistor::new("R2", &["out", "0"], 3e3)).unwrap();
        circuit
    }

    #[test]
    fn test_setup_numbers_nodes_before_branches() {
        let sim = BiasingSimulation::setup(&divider(), &BiasingConfig::default()).unwrap();
        let variables = sim.variables();
        assert_eq!(variables.find("in").unwrap().index, 1);
        assert_eq!(variables.find("out").unwrap().index, 2);
        assert_eq!(variables.find_branch("V1").unwrap().index, 3);
    }

    #[test]
    fn test_linear_circuit_converges() {
        let mut sim = BiasingSimulation::setup(&divider(), &BiasingConfig::default()).unwrap();
        sim.op(100, None).unwrap();
        assert_relative_eq!(sim.state.solution[2], 7.5, epsilon = 1e-9);
        // The source delivers 2.5 mA, entering its positive terminal as -2.5 mA
        assert_relative_eq!(sim.state.solution[3], -2.5e-3, epsilon = 1e-12);
        assert_eq!(sim.statistics().iterations, 2);
    }

    #[test]
    fn test_zero_circuit_converges_in_one_iteration() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", &["a", "0"], 1e3)).unwrap();
        circuit.add(CurrentSource::new("I1", &["0", "a"], 0.0)).unwrap();
        let mut sim = BiasingSimulation::setup(&circuit, &BiasingConfig::default()).unwrap();
        sim.op(100, None).unwrap();
        assert_eq!(sim.statistics().iterations, 1);
        assert_eq!(sim.state.solution, vec![0.0, 0.0]);
    }

    #[test]
    fn test_floating_node_is_singular() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 1.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "0"], 1e3)).unwrap();
        circuit.add(Resistor::new("R2", &["b", "c"], 1e3)).unwrap();
        let mut sim = BiasingSimulation::setup(&circuit, &BiasingConfig::default()).unwrap();
        assert!(matches!(
            sim.iterate(10, None),
            Err(NodalError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_floating_node_keeps_singular_diagnosis() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 1.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "0"], 1e3)).unwrap();
        circuit.add(Resistor::new("R2", &["b", "c"], 1e3)).unwrap();
        let mut sim = BiasingSimulation::setup(&circuit, &BiasingConfig::default()).unwrap();
        assert!(matches!(
            sim.op(10, None),
            Err(NodalError::SingularMatrix { .. })
        ));
        // The shunted gmin steps did solve
        assert!(sim.statistics().iterations > 0);
    }
}
