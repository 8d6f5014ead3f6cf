//! DC sweep analysis.

use super::{BiasingConfig, BiasingSimulation, InitializationMode, RealSolution, Statistics};
use crate::circuit::Circuit;
use crate::error::{NodalError, Result};

/// Most points a DC sweep or a frequency sweep may visit.
pub const MAX_SWEEP_POINTS: usize = 10_000_000;

/// One swept independent source.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    /// Name of a voltage or current source
    pub source: String,
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl SweepSpec {
    pub fn new(source: impl Into<String>, start: f64, stop: f64, step: f64) -> Self {
        Self {
            source: source.into(),
            start,
            stop,
            step,
        }
    }

    /// Number of points, endpoints included.
    ///
    /// Fails if the sweep has no points or more than [`MAX_SWEEP_POINTS`].
    pub fn points(&self) -> Result<usize> {
        let ratio = (self.stop - self.start) / self.step;
        if !(self.step.is_finite() && self.step != 0.0) || !(ratio >= 0.0) {
            return Err(NodalError::invalid_simulation(format!(
                "sweep of '{}' from {} to {} by {} has no points",
                self.source, self.start, self.stop, self.step
            )));
        }
        let span = (ratio + 0.25).floor();
        if !(span < MAX_SWEEP_POINTS as f64) {
            return Err(NodalError::invalid_simulation(format!(
                "sweep of '{}' from {} to {} by {} exceeds {MAX_SWEEP_POINTS} points",
                self.source, self.start, self.stop, self.step
            )));
        }
        Ok(span as usize + 1)
    }

    /// Swept value at point `index`.
    pub fn value(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }
}

/// Result of one sweep point.
///
/// A point that fails to converge carries its error; the sweep goes on.
#[derive(Debug)]
pub struct SweepPoint {
    /// Swept source values, in the order the sweeps were given
    pub values: Vec<f64>,
    pub outcome: Result<RealSolution>,
}

/// Sweep the DC value of one or more independent sources.
///
/// With several sweeps the first one varies fastest.
#[derive(Debug, Clone)]
pub struct DcSweep {
    pub config: BiasingConfig,
    pub sweeps: Vec<SweepSpec>,
}

impl DcSweep {
    pub fn new(config: BiasingConfig, sweeps: Vec<SweepSpec>) -> Self {
        Self { config, sweeps }
    }

    /// Run the analysis.
    pub fn run(&self, circuit: &Circuit) -> Result<Vec<SweepPoint>> {
        self.run_with_statistics(circuit).map(|(points, _)| points)
    }

    /// Run the analysis and report the work it took.
    pub fn run_with_statistics(&self, circuit: &Circuit) -> Result<(Vec<SweepPoint>, Statistics)> {
        if self.sweeps.is_empty() {
            return Err(NodalError::invalid_simulation("a DC sweep needs at least one source"));
        }
        let counts = self
            .sweeps
            .iter()
            .map(SweepSpec::points)
            .collect::<Result<Vec<usize>>>()?;
        let total = counts
            .iter()
            .try_fold(1usize, |total, &count| total.checked_mul(count))
            .filter(|&total| total <= MAX_SWEEP_POINTS)
            .ok_or_else(|| {
                NodalError::invalid_simulation(format!(
                    "nested sweep exceeds {MAX_SWEEP_POINTS} points"
                ))
            })?;

        let mut sim = BiasingSimulation::setup(circuit, &self.config)?;
        let sources = self
            .sweeps
            .iter()
            .map(|sweep| {
                sim.behaviors
                    .iter_mut()
                    .position(|b| b.name() == sweep.source && b.source().is_some())
                    .ok_or_else(|| NodalError::SourceNotFound {
                        name: sweep.source.clone(),
                    })
            })
            .collect::<Result<Vec<usize>>>()?;

        log::debug!("DC sweep over {} points", total);

        let mut points = Vec::with_capacity(total);
        for k in 0..total {
            let mut values = Vec::with_capacity(self.sweeps.len());
            let mut rest = k;
            for ((sweep, &count), &behavior) in self.sweeps.iter().zip(&counts).zip(&sources) {
                let value = sweep.value(rest % count);
                rest /= count;
                if let Some(source) = sim.behaviors[behavior].source() {
                    source.set_dc_value(value);
                }
                values.push(value);
            }

            let outcome = solve_point(&mut sim, k == 0).map(|()| {
                RealSolution::new(sim.variables.clone(), sim.state.solution.clone())
            });
            if let Err(e) = &outcome {
                log::warn!("sweep point {values:?} failed: {e}");
                sim.state.solution.fill(0.0);
            }
            points.push(SweepPoint { values, outcome });
        }
        Ok((points, sim.statistics))
    }
}

/// Solve one point, starting from the previous point's solution.
fn solve_point(sim: &mut BiasingSimulation, first: bool) -> Result<()> {
    let dc_max = sim.config.dc_max_iterations;
    if first {
        return sim.op(dc_max, None);
    }
    sim.state.init = InitializationMode::None;
    match sim.iterate(sim.config.sweep_max_iterations, None) {
        Ok(true) => {
            sim.statistics.solves += 1;
            Ok(())
        }
        Ok(false) | Err(_) => sim.op(dc_max, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Resistor, VoltageSource};
    use approx::assert_relative_eq;

    #[test]
    fn test_point_count() {
        assert_eq!(SweepSpec::new("V1", 0.0, 1.0, 0.1).points().unwrap(), 11);
        assert_eq!(SweepSpec::new("V1", -10.0, 10.0, 1e-3).points().unwrap(), 20001);
        assert_eq!(SweepSpec::new("V1", 5.0, 0.0, -1.0).points().unwrap(), 6);
        assert_eq!(SweepSpec::new("V1", 0.0, 0.0, 1.0).points().unwrap(), 1);
    }

    #[test]
    fn test_sweep_without_points() {
        for spec in [
            SweepSpec::new("V1", 0.0, 1.0, 0.0),
            SweepSpec::new("V1", 0.0, 1.0, -0.5),
            SweepSpec::new("V1", 0.0, f64::NAN, 0.5),
        ] {
            assert!(matches!(
                spec.points(),
                Err(NodalError::InvalidSimulationParam { .. })
            ));
        }
    }

    #[test]
    fn test_oversized_sweep_is_rejected() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 0.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "0"], 1e3)).unwrap();

        let tiny_step = DcSweep::new(
            BiasingConfig::default(),
            vec![SweepSpec::new("V1", 0.0, 1.0, 1e-300)],
        );
        assert!(matches!(
            tiny_step.run(&circuit),
            Err(NodalError::InvalidSimulationParam { .. })
        ));

        let infinite = SweepSpec::new("V1", 0.0, f64::INFINITY, 1.0);
        assert!(matches!(
            infinite.points(),
            Err(NodalError::InvalidSimulationParam { .. })
        ));

        // Each sweep fits on its own, the product does not
        circuit.add(VoltageSource::new("V2", &["b", "0"], 0.0)).unwrap();
        circuit.add(Resistor::new("R2", &["b", "0"], 1e3)).unwrap();
        let nested = DcSweep::new(
            BiasingConfig::default(),
            vec![
                SweepSpec::new("V1", 0.0, 1.0, 1e-6),
                SweepSpec::new("V2", 0.0, 1.0, 1e-6),
            ],
        );
        assert!(matches!(
            nested.run(&circuit),
            Err(NodalError::InvalidSimulationParam { .. })
        ));
    }

    #[test]
    fn test_nested_sweep_first_is_innermost() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 0.0)).unwrap();
        circuit.add(VoltageSource::new("V2", &["b", "a"], 0.0)).unwrap();
        circuit.add(Resistor::new("R1", &["b", "0"], 1e3)).unwrap();

        let sweep = DcSweep::new(
            BiasingConfig::default(),
            vec![
                SweepSpec::new("V1", 0.0, 2.0, 1.0),
                SweepSpec::new("V2", 0.0, 10.0, 10.0),
            ],
        );
        let points = sweep.run(&circuit).unwrap();
        assert_eq!(points.len(), 6);
        assert_eq!(points[1].values, vec![1.0, 0.0]);
        assert_eq!(points[3].values, vec![0.0, 10.0]);
        for point in &points {
            let solution = point.outcome.as_ref().unwrap();
            assert_relative_eq!(
                solution.voltage("b").unwrap(),
                point.values[0] + point.values[1],
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_unknown_source() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 0.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "0"], 1e3)).unwrap();
        let sweep = DcSweep::new(
            BiasingConfig::default(),
            vec![SweepSpec::new("R1", 0.0, 1.0, 0.5)],
        );
        assert!(matches!(
            sweep.run(&circuit),
            Err(NodalError::SourceNotFound { .. })
        ));
    }
}
