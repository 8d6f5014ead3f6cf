//! DC operating point analysis.

use super::{BiasingConfig, BiasingSimulation, RealSolution, Statistics};
use crate::circuit::Circuit;
use crate::error::Result;

/// Solve the DC operating point of a circuit.
///
/// Capacitors are open and inductors shorted; waveform sources take their
/// value at t = 0.
#[derive(Debug, Clone, Default)]
pub struct OperatingPoint {
    pub config: BiasingConfig,
}

impl OperatingPoint {
    pub fn new(config: BiasingConfig) -> Self {
        Self { config }
    }

    /// Run the analysis.
    pub fn run(&self, circuit: &Circuit) -> Result<RealSolution> {
        self.run_with_statistics(circuit).map(|(solution, _)| solution)
    }

    /// Run the analysis and report the work it took.
    pub fn run_with_statistics(&self, circuit: &Circuit) -> Result<(RealSolution, Statistics)> {
        let mut sim = BiasingSimulation::setup(circuit, &self.config)?;
        sim.op(self.config.dc_max_iterations, None)?;
        log::debug!("operating point found in {} iterations", sim.statistics.iterations);
        let solution = RealSolution::new(sim.variables.clone(), sim.state.solution.clone());
        Ok((solution, sim.statistics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Capacitor, Inductor, Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_reactive_elements_in_dc() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["in", "0"], 5.0)).unwrap();
        circuit.add(Inductor::new("L1", &["in", "mid"], 1e-3)).unwrap();
        circuit.add(Resistor::new("R1", &["mid", "out"], 1e3)).unwrap();
        circuit.add(Capacitor::new("C1", &["out", "0"], 1e-6)).unwrap();
        circuit.add(Resistor::new("R2", &["out", "0"], 1e3)).unwrap();

        let solution = OperatingPoint::default().run(&circuit).unwrap();
        assert_relative_eq!(solution.voltage("mid").unwrap(), 5.0, epsilon = 1e-9);
        assert_relative_eq!(solution.voltage("out").unwrap(), 2.5, epsilon = 1e-9);
        assert_relative_eq!(solution.current("L1").unwrap(), 2.5e-3, epsilon = 1e-12);
    }
}
