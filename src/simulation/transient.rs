//! Time-domain analysis.
//!
//! The analysis starts from the operating point (or from device initial
//! conditions) and advances with the trapezoidal rule. Each time point goes
//! through the same cycle:
//!
//! ```text
//! accept ─> export ─> continue ─> probe ─> Newton ──ok──> evaluate ──accept──> ...
//!                                   ^          │              │
//!                                   │       failed         rejected
//!                                   └── shrink step <─────────┘
//! ```

use std::sync::Arc;

use super::{BiasingConfig, BiasingSimulation, RealSolution, Statistics, TimeConfig};
use crate::circuit::Circuit;
use crate::error::{NodalError, Result};
use crate::integration::{IntegrationMethod, LocalTruncationError, Truncation};

/// One recorded time point.
#[derive(Debug, Clone)]
pub struct TimePoint {
    pub time: f64,
    pub solution: RealSolution,
}

/// Every recorded time point of a completed run.
#[derive(Debug, Clone)]
pub struct TransientResult {
    pub points: Vec<TimePoint>,
    pub statistics: Statistics,
}

impl TransientResult {
    /// `(time, voltage)` pairs of one node.
    pub fn voltages(&self, node: &str) -> Result<Vec<(f64, f64)>> {
        self.points
            .iter()
            .map(|point| Ok((point.time, point.solution.voltage(node)?)))
            .collect()
    }
}

/// Transient analysis.
#[derive(Debug, Clone)]
pub struct Transient {
    pub biasing: BiasingConfig,
    pub time: TimeConfig,
}

impl Transient {
    pub fn new(biasing: BiasingConfig, time: TimeConfig) -> Self {
        Self { biasing, time }
    }

    /// Run to the final time, collecting every recorded point.
    pub fn run(&self, circuit: &Circuit) -> Result<TransientResult> {
        let mut run = self.start(circuit)?;
        let mut points = Vec::new();
        while let Some(point) = run.tick()? {
            points.push(point);
        }
        log::debug!(
            "transient finished: {} points, {} rejected",
            run.statistics().accepted,
            run.statistics().rejected
        );
        Ok(TransientResult {
            points,
            statistics: run.statistics(),
        })
    }

    /// Set up the analysis and solve the initial point, leaving the
    /// stepping to the caller.
    pub fn start(&self, circuit: &Circuit) -> Result<TransientRun> {
        self.time.validate()?;
        let mut sim = BiasingSimulation::setup(circuit, &self.biasing)?;

        let truncation: Arc<dyn Truncation> = match &self.time.truncation {
            Some(truncation) => Arc::clone(truncation),
            None => Arc::new(LocalTruncationError::new(
                self.biasing.rel_tol,
                self.biasing.abs_tol,
                self.time.tr_tol,
                self.time.chg_tol,
            )),
        };
        let mut method = IntegrationMethod::new(&self.time, truncation);
        for behavior in sim.behaviors.iter_mut() {
            if let Some(transient) = behavior.transient() {
                transient.create_states(&mut method)?;
            }
        }
        method.setup(sim.variables.len());

        sim.state.use_dc = true;
        sim.state.use_ic = self.time.use_ic;
        if self.time.use_ic {
            log::debug!("using initial conditions, skipping the operating point");
        } else {
            sim.op(self.biasing.dc_max_iterations, None)
                .map_err(|e| NodalError::transient_terminated(0.0, e))?;
        }

        for behavior in sim.behaviors.iter_mut() {
            if let Some(transient) = behavior.transient() {
                transient.initialize_states(&sim.state, &mut method);
            }
        }
        method.initialize(&sim.state.solution);
        sim.state.use_dc = false;

        Ok(TransientRun {
            sim,
            method,
            start_time: self.time.start_time,
            max_iterations: self.time.max_iterations,
            delta: self.time.initial_step(),
            finished: false,
        })
    }
}

/// A transient analysis driven one recorded point at a time.
pub struct TransientRun {
    sim: BiasingSimulation,
    method: IntegrationMethod,
    start_time: f64,
    max_iterations: usize,
    /// Step proposed for the next time point
    delta: f64,
    finished: bool,
}

impl TransientRun {
    /// Advance to the next recorded point.
    ///
    /// Returns `None` once the final time has been recorded. An error ends
    /// the run.
    pub fn tick(&mut self) -> Result<Option<TimePoint>> {
        if self.finished {
            return Ok(None);
        }
        self.advance().map_err(|e| {
            self.finished = true;
            NodalError::transient_terminated(self.method.time(), e)
        })
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Time of the last solved point.
    pub fn time(&self) -> f64 {
        self.method.time()
    }

    pub fn statistics(&self) -> Statistics {
        self.sim.statistics
    }

    fn advance(&mut self) -> Result<Option<TimePoint>> {
        loop {
            self.accept();

            let time = self.method.time();
            let exported = (time >= self.start_time).then(|| TimePoint {
                time,
                solution: RealSolution::new(
                    self.sim.variables.clone(),
                    self.sim.state.solution.clone(),
                ),
            });
            if time >= self.method.final_time() {
                self.finished = true;
                return Ok(exported);
            }

            self.method.continue_step(&mut self.delta);
            self.solve_next()?;
            if exported.is_some() {
                return Ok(exported);
            }
        }
    }

    fn accept(&mut self) {
        self.method.accept(&self.sim.state.solution);
        let state = &self.sim.state;
        for behavior in self.sim.behaviors.iter_mut() {
            if let Some(accept) = behavior.accept() {
                accept.accept(state);
            }
        }
        self.sim.statistics.accepted += 1;
    }

    /// Find a step whose solution converges and passes the step control.
    fn solve_next(&mut self) -> Result<()> {
        loop {
            self.method.probe(self.delta);
            // A failed factorization is retried like a non-converged solve
            let converged = match self.sim.iterate(self.max_iterations, Some(&mut self.method)) {
                Ok(converged) => converged,
                Err(e) => {
                    log::debug!("solve failed at t = {:.6e}: {e}", self.method.time());
                    false
                }
            };
            self.sim.statistics.time_points += 1;

            if !converged {
                self.sim.statistics.rejected += 1;
                self.delta = self.method.non_convergence(&mut self.sim.state.solution)?;
                log::debug!(
                    "no convergence at t = {:.6e}, retrying with {:.3e}",
                    self.method.time(),
                    self.delta
                );
                continue;
            }

            let (accepted, delta) = self.method.evaluate()?;
            self.delta = delta;
            if accepted {
                return Ok(());
            }
            self.sim.statistics.rejected += 1;
        }
    }
}

impl std::fmt::Debug for TransientRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientRun")
            .field("time", &self.method.time())
            .field("delta", &self.delta)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Capacitor, CurrentSource, Resistor, VoltageSource};
    use crate::integration::FixedStep;
    use approx::assert_relative_eq;

    fn rc(ic: Option<f64>) -> Circuit {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["in", "0"], 1.0)).unwrap();
        circuit.add(Resistor::new("R1", &["in", "out"], 1e3)).unwrap();
        let c = Capacitor::new("C1", &["out", "0"], 1e-6);
        let c = match ic {
            Some(v) => c.with_initial_condition(v),
            None => c,
        };
        circuit.add(c).unwrap();
        circuit
    }

    #[test]
    fn test_steady_state_stays_put() {
        let transient = Transient::new(BiasingConfig::default(), TimeConfig::new(1e-4, 1e-3));
        let result = transient.run(&rc(None)).unwrap();
        assert_relative_eq!(result.points[0].time, 0.0);
        let last = result.points.last().unwrap();
        assert_relative_eq!(last.time, 1e-3, epsilon = 1e-15);
        for (_, v) in result.voltages("out").unwrap() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_charging_from_initial_condition() {
        let tau = 1e-3;
        let time = TimeConfig::new(1e-5, 5e-3).with_use_ic(true);
        let transient = Transient::new(BiasingConfig::default(), time);
        let result = transient.run(&rc(Some(0.0))).unwrap();

        for (t, v) in result.voltages("out").unwrap().into_iter().skip(1) {
            let expected = 1.0 - (-t / tau).exp();
            assert_relative_eq!(v, expected, epsilon = 2e-3);
        }
        let stats = result.statistics;
        assert!(stats.time_points >= stats.accepted - 1);
    }

    #[test]
    fn test_step_by_step_matches_run() {
        let time = TimeConfig::new(1e-4, 1e-3)
            .with_max_step(1e-4)
            .with_truncation(Arc::new(FixedStep::new(1e-4)));
        let transient = Transient::new(BiasingConfig::default(), time);

        let mut circuit = Circuit::new();
        circuit.add(CurrentSource::new("I1", &["0", "out"], 1e-3)).unwrap();
        circuit.add(Capacitor::new("C1", &["out", "0"], 1e-6)).unwrap();
        circuit.add(Resistor::new("R1", &["out", "0"], 1e6)).unwrap();

        let complete = transient.run(&circuit).unwrap();
        let mut run = transient.start(&circuit).unwrap();
        let mut count = 0;
        while let Some(point) = run.tick().unwrap() {
            assert_eq!(point.time, complete.points[count].time);
            count += 1;
        }
        assert!(run.is_finished());
        assert_eq!(count, complete.points.len());
        assert!(run.tick().unwrap().is_none());
    }

    #[test]
    fn test_recording_starts_late() {
        let time = TimeConfig::new(1e-4, 1e-3).with_start_time(5e-4);
        let transient = Transient::new(BiasingConfig::default(), time);
        let result = transient.run(&rc(None)).unwrap();
        assert!(result.points.iter().all(|p| p.time >= 5e-4));
    }
}
