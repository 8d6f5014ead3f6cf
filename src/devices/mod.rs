//! Device models and the behavior contract they implement.
//!
//! A [`Component`] is the immutable description of a device held by the
//! circuit. Every simulation asks each component for a fresh [`Behavior`],
//! which then takes part in the analyses it supports:
//!
//! - [`BiasingBehavior`]: operating point, DC sweep and every Newton iteration
//! - [`TransientBehavior`]: charges and fluxes integrated over time
//! - [`FrequencyBehavior`]: complex admittances around the operating point
//! - [`SourceBehavior`]: independent sources that a DC sweep can drive
//! - [`AcceptBehavior`]: state committed once a point has been accepted
//!
//! Setup runs in two passes: every behavior creates its variables first,
//! then every behavior reserves its equation slots. A behavior only ever
//! writes to slots it reserved itself.

mod bjt;
mod controlled;
mod diode;
mod junction;
mod linear;
mod sources;
mod switch;
mod waveform;

pub use bjt::{Bjt, BjtModel, BjtPolarity};
pub use controlled::{Cccs, Ccvs, Vccs, Vcvs};
pub use diode::{Diode, DiodeModel};
pub use junction::{pnjlim, vcrit};
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{AcPhasor, CurrentSource, VoltageSource};
pub use switch::{CurrentSwitch, SwitchModel};
pub use waveform::Waveform;

use std::fmt::Debug;

use num_complex::Complex64;

use crate::algebra::{Element, EquationStore};
use crate::circuit::VariableSet;
use crate::error::{NodalError, Result};
use crate::integration::IntegrationMethod;
use crate::simulation::{BiasingConfig, SimulationState};

/// Immutable description of a device.
pub trait Component: Debug + Send + Sync {
    /// Unique name within the circuit.
    fn name(&self) -> &str;

    /// Node names in pin order.
    fn nodes(&self) -> &[String];

    /// Create the per-simulation behavior of this device.
    fn create_behavior(&self) -> Result<Box<dyn Behavior>>;
}

/// Per-simulation instance of a device.
pub trait Behavior: Send {
    /// Name of the device this behavior belongs to.
    fn name(&self) -> &str;

    /// Bind pin variable indices, in pin order.
    fn connect(&mut self, pins: &[usize]) -> Result<()>;

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        None
    }

    fn transient(&mut self) -> Option<&mut dyn TransientBehavior> {
        None
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        None
    }

    fn source(&mut self) -> Option<&mut dyn SourceBehavior> {
        None
    }

    fn accept(&mut self) -> Option<&mut dyn AcceptBehavior> {
        None
    }
}

/// Slot reservation for one equation store.
pub struct AllocationContext<'a, T: Element> {
    pub variables: &'a VariableSet,
    pub store: &'a mut EquationStore<T>,
}

/// Slot reservation for the small-signal store.
pub type ComplexAllocation<'a> = AllocationContext<'a, Complex64>;

/// Everything a biasing load may read or write.
pub struct LoadContext<'a> {
    pub state: &'a mut SimulationState,
    pub store: &'a mut EquationStore<f64>,
    /// Present time during a transient analysis, `None` for DC
    pub time: Option<f64>,
}

/// Everything a convergence check may read or write.
pub struct ConvergenceContext<'a> {
    pub state: &'a mut SimulationState,
    pub config: &'a BiasingConfig,
}

/// Everything a transient load may read or write.
pub struct TransientContext<'a> {
    pub state: &'a mut SimulationState,
    pub store: &'a mut EquationStore<f64>,
    pub method: &'a mut IntegrationMethod,
}

/// Everything a small-signal load may read or write.
pub struct FrequencyContext<'a> {
    /// Laplace variable `s = j * 2 * pi * f`
    pub laplace: Complex64,
    pub store: &'a mut EquationStore<Complex64>,
}

/// Participation in every Newton iteration.
pub trait BiasingBehavior {
    /// Create branch currents and internal nodes.
    fn create_variables(&mut self, _variables: &mut VariableSet) -> Result<()> {
        Ok(())
    }

    /// Reserve matrix and RHS slots; resolve named dependencies.
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()>;

    /// Compute temperature-dependent parameters.
    fn temperature(&mut self, _state: &SimulationState) {}

    /// Stamp the linearized model at the present solution estimate.
    fn load(&mut self, context: &mut LoadContext<'_>);

    /// Check the device currents against their predicted values.
    ///
    /// Implementations that return false must also clear
    /// `state.is_convergent`.
    fn is_convergent(&mut self, _context: &mut ConvergenceContext<'_>) -> bool {
        true
    }
}

/// Participation in time-domain analysis.
pub trait TransientBehavior {
    /// Register state derivatives with the integration method.
    fn create_states(&mut self, method: &mut IntegrationMethod) -> Result<()>;

    /// Seed state derivatives from the converged operating point.
    fn initialize_states(&mut self, state: &SimulationState, method: &mut IntegrationMethod);

    /// Integrate and stamp the companion models at the probed time point.
    fn load(&mut self, context: &mut TransientContext<'_>);
}

/// Participation in small-signal analysis.
pub trait FrequencyBehavior {
    /// Reserve complex matrix and RHS slots.
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()>;

    /// Compute small-signal parameters at the operating point.
    fn initialize(&mut self, _state: &SimulationState) {}

    /// Stamp the admittances at one frequency.
    fn load(&mut self, context: &mut FrequencyContext<'_>);
}

/// An independent source whose DC value can be swept.
pub trait SourceBehavior {
    fn dc_value(&self) -> f64;

    fn set_dc_value(&mut self, value: f64);
}

/// State committed after a point has been accepted.
pub trait AcceptBehavior {
    fn accept(&mut self, state: &SimulationState);
}

/// Fail unless exactly `expected` pins were given.
pub fn check_pins(name: &str, expected: usize, pins: &[usize]) -> Result<()> {
    if pins.len() != expected {
        return Err(NodalError::pin_count(name, expected, pins.len()));
    }
    Ok(())
}

pub(crate) fn node_names<S: AsRef<str>>(nodes: &[S]) -> Vec<String> {
    nodes.iter().map(|n| n.as_ref().to_string()).collect()
}

/// Index of the branch current of a controlling source.
pub(crate) fn controlling_branch(
    name: &str,
    control: &str,
    variables: &VariableSet,
) -> Result<usize> {
    variables
        .find_branch(control)
        .map(|v| v.index)
        .ok_or_else(|| NodalError::missing_dependency(name, control))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_pins() {
        assert!(check_pins("R1", 2, &[1, 2]).is_ok());
        assert!(matches!(
            check_pins("R1", 2, &[1]),
            Err(NodalError::PinCountMismatch {
                expected: 2,
                given: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_controlling_source() {
        let variables = VariableSet::new();
        assert!(matches!(
            controlling_branch("H1", "V9", &variables),
            Err(NodalError::MissingDependency { .. })
        ));
    }
}
