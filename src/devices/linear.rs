//! Linear passive devices: Resistor, Capacitor, Inductor.

use num_complex::Complex64;

use super::{
    check_pins, node_names, AllocationContext, Behavior, BiasingBehavior, Component,
    ComplexAllocation, FrequencyBehavior, FrequencyContext, LoadContext, TransientBehavior,
    TransientContext,
};
use crate::algebra::{BranchSlots, ConductanceSlots, MatrixSlot, RhsSlot};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::integration::{IntegrationMethod, StateDerivative};
use crate::simulation::SimulationState;

/// A resistor between two nodes.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub nodes: Vec<String>, // [positive, negative]
    pub resistance: f64,
}

impl Resistor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], resistance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            resistance,
        }
    }
}

impl Component for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        if !self.resistance.is_finite() || self.resistance == 0.0 {
            return Err(NodalError::invalid_parameter(
                &self.name,
                "resistance",
                format!("must be finite and non-zero, got {}", self.resistance),
            ));
        }
        Ok(Box::new(ResistorBehavior {
            name: self.name.clone(),
            conductance: 1.0 / self.resistance,
            pos: 0,
            neg: 0,
            slots: ConductanceSlots::default(),
            ac_slots: ConductanceSlots::default(),
        }))
    }
}

#[derive(Debug)]
struct ResistorBehavior {
    name: String,
    conductance: f64,
    pos: usize,
    neg: usize,
    slots: ConductanceSlots,
    ac_slots: ConductanceSlots,
}

impl Behavior for ResistorBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.pos = pins[0];
        self.neg = pins[1];
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for ResistorBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        self.slots.stamp(context.store, self.conductance);
    }
}

impl FrequencyBehavior for ResistorBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots
            .stamp(context.store, Complex64::new(self.conductance, 0.0));
    }
}

/// A capacitor between two nodes.
///
/// Open in DC. In the time domain its charge `q = C v` is integrated into
/// the companion model `i = geq v - ieq`.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub nodes: Vec<String>,
    pub capacitance: f64,
    /// Voltage used instead of the operating point when initial conditions are requested
    pub initial_condition: Option<f64>,
}

impl Capacitor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], capacitance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            capacitance,
            initial_condition: None,
        }
    }

    pub fn with_initial_condition(mut self, voltage: f64) -> Self {
        self.initial_condition = Some(voltage);
        self
    }
}

impl Component for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        if !self.capacitance.is_finite() || self.capacitance < 0.0 {
            return Err(NodalError::invalid_parameter(
                &self.name,
                "capacitance",
                format!("must be finite and non-negative, got {}", self.capacitance),
            ));
        }
        Ok(Box::new(CapacitorBehavior {
            name: self.name.clone(),
            capacitance: self.capacitance,
            initial_condition: self.initial_condition,
            pos: 0,
            neg: 0,
            slots: ConductanceSlots::default(),
            rhs_pos: RhsSlot::default(),
            rhs_neg: RhsSlot::default(),
            charge: None,
            ac_slots: ConductanceSlots::default(),
        }))
    }
}

#[derive(Debug)]
struct CapacitorBehavior {
    name: String,
    capacitance: f64,
    initial_condition: Option<f64>,
    pos: usize,
    neg: usize,
    slots: ConductanceSlots,
    rhs_pos: RhsSlot,
    rhs_neg: RhsSlot,
    charge: Option<StateDerivative>,
    ac_slots: ConductanceSlots,
}

impl Behavior for CapacitorBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.pos = pins[0];
        self.neg = pins[1];
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn transient(&mut self) -> Option<&mut dyn TransientBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for CapacitorBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        self.rhs_pos = context.store.reserve_rhs(self.pos)?;
        self.rhs_neg = context.store.reserve_rhs(self.neg)?;
        Ok(())
    }

    // Open circuit
    fn load(&mut self, _context: &mut LoadContext<'_>) {}
}

impl TransientBehavior for CapacitorBehavior {
    fn create_states(&mut self, method: &mut IntegrationMethod) -> Result<()> {
        self.charge = Some(method.create_derivative());
        Ok(())
    }

    fn initialize_states(&mut self, state: &SimulationState, method: &mut IntegrationMethod) {
        let Some(charge) = self.charge else {
            return;
        };
        let voltage = match self.initial_condition {
            Some(ic) if state.use_ic => ic,
            _ => state.voltage(self.pos, self.neg),
        };
        method.set_value(charge, self.capacitance * voltage);
    }

    fn load(&mut self, context: &mut TransientContext<'_>) {
        let Some(charge) = self.charge else {
            return;
        };
        let voltage = context.state.voltage(self.pos, self.neg);
        let method = &mut *context.method;
        method.set_value(charge, self.capacitance * voltage);
        method.integrate(charge);
        let geq = method.jacobian(self.capacitance);
        let ceq = method.rhs_current(charge, geq, voltage);

        self.slots.stamp(context.store, geq);
        context.store.add_rhs(self.rhs_pos, ceq);
        context.store.add_rhs(self.rhs_neg, -ceq);
    }
}

impl FrequencyBehavior for CapacitorBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots
            .stamp(context.store, context.laplace * self.capacitance);
    }
}

/// An inductor between two nodes.
///
/// Adds a branch current `I(name#branch)` flowing from the positive to the
/// negative node. Short in DC.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub nodes: Vec<String>,
    pub inductance: f64,
    /// Branch current used instead of the operating point when initial conditions are requested
    pub initial_condition: Option<f64>,
}

impl Inductor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], inductance: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            inductance,
            initial_condition: None,
        }
    }

    pub fn with_initial_condition(mut self, current: f64) -> Self {
        self.initial_condition = Some(current);
        self
    }
}

impl Component for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        if !self.inductance.is_finite() || self.inductance < 0.0 {
            return Err(NodalError::invalid_parameter(
                &self.name,
                "inductance",
                format!("must be finite and non-negative, got {}", self.inductance),
            ));
        }
        Ok(Box::new(InductorBehavior {
            name: self.name.clone(),
            inductance: self.inductance,
            initial_condition: self.initial_condition,
            pos: 0,
            neg: 0,
            branch: 0,
            slots: BranchSlots::default(),
            branch_branch: MatrixSlot::default(),
            rhs_branch: RhsSlot::default(),
            flux: None,
            ac_slots: BranchSlots::default(),
            ac_branch_branch: MatrixSlot::default(),
        }))
    }
}

#[derive(Debug)]
struct InductorBehavior {
    name: String,
    inductance: f64,
    initial_condition: Option<f64>,
    pos: usize,
    neg: usize,
    branch: usize,
    slots: BranchSlots,
    branch_branch: MatrixSlot,
    rhs_branch: RhsSlot,
    flux: Option<StateDerivative>,
    ac_slots: BranchSlots,
    ac_branch_branch: MatrixSlot,
}

impl Behavior for InductorBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.pos = pins[0];
        self.neg = pins[1];
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn transient(&mut self) -> Option<&mut dyn TransientBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for InductorBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        self.branch = variables.create(VariableSet::branch_name(&self.name), VariableKind::Current)?;
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        let store = &mut *context.store;
        self.slots = BranchSlots::reserve(store, self.pos, self.neg, self.branch)?;
        self.branch_branch = store.reserve_matrix(self.branch, self.branch)?;
        self.rhs_branch = store.reserve_rhs(self.branch)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        self.slots.stamp(context.store);
    }
}

impl TransientBehavior for InductorBehavior {
    fn create_states(&mut self, method: &mut IntegrationMethod) -> Result<()> {
        self.flux = Some(method.create_derivative());
        Ok(())
    }

    fn initialize_states(&mut self, state: &SimulationState, method: &mut IntegrationMethod) {
        let Some(flux) = self.flux else {
            return;
        };
        let current = match self.initial_condition {
            Some(ic) if state.use_ic => ic,
            _ => state.solution[self.branch],
        };
        method.set_value(flux, self.inductance * current);
    }

    fn load(&mut self, context: &mut TransientContext<'_>) {
        let Some(flux) = self.flux else {
            return;
        };
        let current = context.state.solution[self.branch];
        let method = &mut *context.method;
        method.set_value(flux, self.inductance * current);
        method.integrate(flux);
        let geq = method.jacobian(self.inductance);
        let ceq = method.rhs_current(flux, geq, current);

        // V(pos) - V(neg) - L di/dt = 0
        context.store.add(self.branch_branch, -geq);
        context.store.add_rhs(self.rhs_branch, -ceq);
    }
}

impl FrequencyBehavior for InductorBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        let store = &mut *context.store;
        self.ac_slots = BranchSlots::reserve(store, self.pos, self.neg, self.branch)?;
        self.ac_branch_branch = store.reserve_matrix(self.branch, self.branch)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots.stamp(context.store);
        context
            .store
            .add(self.ac_branch_branch, -(context.laplace * self.inductance));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::EquationStore;
    use crate::simulation::BiasingConfig;

    fn setup(component: &dyn Component, nodes: usize) -> (Box<dyn Behavior>, VariableSet, EquationStore<f64>) {
        let mut variables = VariableSet::new();
        let pins: Vec<usize> = component
            .nodes()
            .iter()
            .map(|n| variables.map_node(n))
            .collect();
        let mut behavior = component.create_behavior().unwrap();
        behavior.connect(&pins).unwrap();
        if let Some(b) = behavior.biasing() {
            b.create_variables(&mut variables).unwrap();
        }
        assert_eq!(variables.len(), nodes);
        let mut store = EquationStore::new(variables.len());
        if let Some(b) = behavior.biasing() {
            let mut context = AllocationContext {
                variables: &variables,
                store: &mut store,
            };
            b.allocate(&mut context).unwrap();
        }
        (behavior, variables, store)
    }

    #[test]
    fn test_resistor_stamp() {
        let r = Resistor::new("R1", &["a", "b"], 100.0);
        let (mut behavior, _, mut store) = setup(&r, 3);
        let mut state = SimulationState::new(&BiasingConfig::default());
        state.setup(3);
        let mut context = LoadContext {
            state: &mut state,
            store: &mut store,
            time: None,
        };
        behavior.biasing().unwrap().load(&mut context);

        assert_eq!(store.matrix_value(1, 1), 0.01);
        assert_eq!(store.matrix_value(2, 2), 0.01);
        assert_eq!(store.matrix_value(1, 2), -0.01);
        assert_eq!(store.matrix_value(2, 1), -0.01);
    }

    #[test]
    fn test_zero_resistance_rejected() {
        let r = Resistor::new("R1", &["a", "0"], 0.0);
        assert!(matches!(
            r.create_behavior(),
            Err(NodalError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_wrong_pin_count() {
        let c = Capacitor::new("C1", &["a", "b", "c"], 1e-6);
        let mut behavior = c.create_behavior().unwrap();
        assert!(matches!(
            behavior.connect(&[1, 2, 3]),
            Err(NodalError::PinCountMismatch {
                expected: 2,
                given: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_inductor_creates_branch() {
        let l = Inductor::new("L1", &["a", "0"], 1e-3);
        let (mut behavior, variables, mut store) = setup(&l, 3);
        assert_eq!(variables.find_branch("L1").map(|v| v.index), Some(2));

        let mut state = SimulationState::new(&BiasingConfig::default());
        state.setup(3);
        let mut context = LoadContext {
            state: &mut state,
            store: &mut store,
            time: None,
        };
        behavior.biasing().unwrap().load(&mut context);
        assert_eq!(store.matrix_value(1, 2), 1.0);
        assert_eq!(store.matrix_value(2, 1), 1.0);
        assert_eq!(store.matrix_value(2, 2), 0.0);
    }
}
