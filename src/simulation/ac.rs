//! Small-signal (AC) analysis.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::{
    BiasingConfig, BiasingSimulation, ComplexSolution, ComplexState, RealSolution, MAX_SWEEP_POINTS,
};
use crate::algebra::EquationStore;
use crate::circuit::Circuit;
use crate::devices::{ComplexAllocation, FrequencyContext};
use crate::error::{NodalError, Result};

/// Frequencies an AC analysis visits.
#[derive(Debug, Clone, PartialEq)]
pub enum FrequencySweep {
    /// Logarithmic, `points_per_decade` points per factor of ten
    Decade {
        points_per_decade: usize,
        start: f64,
        stop: f64,
    },
    /// Logarithmic, `points_per_octave` points per factor of two
    Octave {
        points_per_octave: usize,
        start: f64,
        stop: f64,
    },
    /// `points` evenly spaced frequencies, endpoints included
    Linear { points: usize, start: f64, stop: f64 },
    /// Explicit frequencies
    List(Vec<f64>),
}

impl FrequencySweep {
    /// Expand the sweep into its frequencies.
    pub fn frequencies(&self) -> Result<Vec<f64>> {
        match *self {
            FrequencySweep::Decade {
                points_per_decade,
                start,
                stop,
            } => logarithmic(10.0, points_per_decade, start, stop),
            FrequencySweep::Octave {
                points_per_octave,
                start,
                stop,
            } => logarithmic(2.0, points_per_octave, start, stop),
            FrequencySweep::Linear { points, start, stop } => {
                if points == 0
                    || points > MAX_SWEEP_POINTS
                    || !(start >= 0.0 && stop >= start && stop.is_finite())
                {
                    return Err(NodalError::invalid_simulation(format!(
                        "linear sweep of {points} points from {start} to {stop}"
                    )));
                }
                if points == 1 {
                    return Ok(vec![start]);
                }
                let step = (stop - start) / (points - 1) as f64;
                Ok((0..points).map(|i| start + i as f64 * step).collect())
            }
            FrequencySweep::List(ref frequencies) => {
                if frequencies.iter().any(|f| !(*f >= 0.0 && f.is_finite())) {
                    return Err(NodalError::invalid_simulation(
                        "frequencies must be finite and non-negative",
                    ));
                }
                Ok(frequencies.clone())
            }
        }
    }
}

fn logarithmic(base: f64, per_interval: usize, start: f64, stop: f64) -> Result<Vec<f64>> {
    if per_interval == 0 || !(start > 0.0 && stop >= start && stop.is_finite()) {
        return Err(NodalError::invalid_simulation(format!(
            "logarithmic sweep from {start} to {stop} with {per_interval} points per interval"
        )));
    }
    let n = per_interval as f64;
    let span = ((stop / start).log(base) * n + 0.25).floor();
    if !(span < MAX_SWEEP_POINTS as f64) {
        return Err(NodalError::invalid_simulation(format!(
            "logarithmic sweep from {start} to {stop} exceeds {MAX_SWEEP_POINTS} points"
        )));
    }
    let count = span as usize + 1;
    Ok((0..count)
        .map(|i| start * base.powf(i as f64 / n))
        .collect())
}

/// Small-signal solution at one frequency.
#[derive(Debug, Clone)]
pub struct AcPoint {
    pub frequency: f64,
    pub solution: ComplexSolution,
}

/// Result of an AC analysis.
#[derive(Debug, Clone)]
pub struct AcResult {
    /// Operating point the devices were linearized around
    pub operating_point: RealSolution,
    pub points: Vec<AcPoint>,
}

/// Linearize the circuit at its operating point and solve it in the
/// frequency domain, driven by the AC values of the independent sources.
#[derive(Debug, Clone)]
pub struct Ac {
    pub config: BiasingConfig,
    pub sweep: FrequencySweep,
}

impl Ac {
    pub fn new(config: BiasingConfig, sweep: FrequencySweep) -> Self {
        Self { config, sweep }
    }

    /// Run the analysis.
    pub fn run(&self, circuit: &Circuit) -> Result<AcResult> {
        let frequencies = self.sweep.frequencies()?;
        let mut sim = BiasingSimulation::setup(circuit, &self.config)?;
        sim.op(self.config.dc_max_iterations, None)?;
        let operating_point = RealSolution::new(sim.variables.clone(), sim.state.solution.clone());

        let size = sim.variables.len();
        let mut store = EquationStore::<Complex64>::new(size);
        for behavior in sim.behaviors.iter_mut() {
            if let Some(frequency) = behavior.frequency() {
                frequency.allocate(&mut ComplexAllocation {
                    variables: &sim.variables,
                    store: &mut store,
                })?;
                frequency.initialize(&sim.state);
            }
        }

        log::debug!("AC analysis over {} frequencies", frequencies.len());
        let mut state = ComplexState::new(size);
        let mut points = Vec::with_capacity(frequencies.len());
        for frequency in frequencies {
            state.laplace = Complex64::new(0.0, 2.0 * PI * frequency);
            store.clear();
            for behavior in sim.behaviors.iter_mut() {
                if let Some(behavior) = behavior.frequency() {
                    behavior.load(&mut FrequencyContext {
                        laplace: state.laplace,
                        store: &mut store,
                    });
                }
            }
            store.factor(0.0)?;
            store.solve(&mut state.solution)?;
            points.push(AcPoint {
                frequency,
                solution: ComplexSolution::new(sim.variables.clone(), state.solution.clone()),
            });
        }

        Ok(AcResult {
            operating_point,
            points,
        })
    }
}
