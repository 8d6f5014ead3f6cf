//! Linear controlled sources.
//!
//! | Kind | Letter | Controlled by    | Output  |
//! |------|--------|------------------|---------|
//! | VCVS | E      | node voltage     | voltage |
//! | VCCS | G      | node voltage     | current |
//! | CCCS | F      | source current   | current |
//! | CCVS | H      | source current   | voltage |
//!
//! Current-controlled sources name a voltage source (or inductor) whose
//! branch current they sense. The name is resolved when equation slots are
//! allocated; an unknown name is a configuration error.

use num_complex::Complex64;

use super::{
    check_pins, controlling_branch, node_names, AllocationContext, Behavior, BiasingBehavior,
    Component, ComplexAllocation, FrequencyBehavior, FrequencyContext, LoadContext,
};
use crate::algebra::{BranchSlots, Element, EquationStore, MatrixSlot};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::Result;

/// Slots of a transconductance from the control pair to the output pair.
#[derive(Debug, Clone, Copy, Default)]
struct ControlSlots {
    pos_cpos: MatrixSlot,
    pos_cneg: MatrixSlot,
    neg_cpos: MatrixSlot,
    neg_cneg: MatrixSlot,
}

impl ControlSlots {
    fn reserve<T: Element>(
        store: &mut EquationStore<T>,
        pos: usize,
        neg: usize,
        cpos: usize,
        cneg: usize,
    ) -> Result<Self> {
        Ok(Self {
            pos_cpos: store.reserve_matrix(pos, cpos)?,
            pos_cneg: store.reserve_matrix(pos, cneg)?,
            neg_cpos: store.reserve_matrix(neg, cpos)?,
            neg_cneg: store.reserve_matrix(neg, cneg)?,
        })
    }

    fn stamp<T: Element>(&self, store: &mut EquationStore<T>, gain: T) {
        store.add(self.pos_cpos, gain);
        store.add(self.pos_cneg, -gain);
        store.add(self.neg_cpos, -gain);
        store.add(self.neg_cneg, gain);
    }
}

macro_rules! component_impl {
    ($component:ident, $behavior:ident) => {
        impl Component for $component {
            fn name(&self) -> &str {
                &self.name
            }

            fn nodes(&self) -> &[String] {
                &self.nodes
            }

            fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
                Ok(Box::new($behavior::new(self)))
            }
        }
    };
}

/// Voltage-controlled voltage source:
/// `V(pos) - V(neg) = gain * (V(cpos) - V(cneg))`.
#[derive(Debug, Clone)]
pub struct Vcvs {
    pub name: String,
    pub nodes: Vec<String>, // [pos, neg, cpos, cneg]
    pub gain: f64,
}

impl Vcvs {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], gain: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            gain,
        }
    }
}

component_impl!(Vcvs, VcvsBehavior);

#[derive(Debug)]
struct VcvsBehavior {
    name: String,
    gain: f64,
    pins: [usize; 4],
    branch: usize,
    branch_slots: BranchSlots,
    branch_cpos: MatrixSlot,
    branch_cneg: MatrixSlot,
    ac_branch_slots: BranchSlots,
    ac_branch_cpos: MatrixSlot,
    ac_branch_cneg: MatrixSlot,
}

impl VcvsBehavior {
    fn new(component: &Vcvs) -> Self {
        Self {
            name: component.name.clone(),
            gain: component.gain,
            pins: [0; 4],
            branch: 0,
            branch_slots: BranchSlots::default(),
            branch_cpos: MatrixSlot::default(),
            branch_cneg: MatrixSlot::default(),
            ac_branch_slots: BranchSlots::default(),
            ac_branch_cpos: MatrixSlot::default(),
            ac_branch_cneg: MatrixSlot::default(),
        }
    }
}

impl Behavior for VcvsBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 4, pins)?;
        self.pins.copy_from_slice(pins);
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for VcvsBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        self.branch = variables.create(VariableSet::branch_name(&self.name), VariableKind::Current)?;
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins;
        let store = &mut *context.store;
        self.branch_slots = BranchSlots::reserve(store, pos, neg, self.branch)?;
        self.branch_cpos = store.reserve_matrix(self.branch, cpos)?;
        self.branch_cneg = store.reserve_matrix(self.branch, cneg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        self.branch_slots.stamp(context.store);
        context.store.add(self.branch_cpos, -self.gain);
        context.store.add(self.branch_cneg, self.gain);
    }
}

impl FrequencyBehavior for VcvsBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins;
        let store = &mut *context.store;
        self.ac_branch_slots = BranchSlots::reserve(store, pos, neg, self.branch)?;
        self.ac_branch_cpos = store.reserve_matrix(self.branch, cpos)?;
        self.ac_branch_cneg = store.reserve_matrix(self.branch, cneg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        let gain = Complex64::new(self.gain, 0.0);
        self.ac_branch_slots.stamp(context.store);
        context.store.add(self.ac_branch_cpos, -gain);
        context.store.add(self.ac_branch_cneg, gain);
    }
}

/// Voltage-controlled current source: `gain * (V(cpos) - V(cneg))` flows
/// from `pos` through the source to `neg`.
#[derive(Debug, Clone)]
pub struct Vccs {
    pub name: String,
    pub nodes: Vec<String>, // [pos, neg, cpos, cneg]
    pub gain: f64,
}

impl Vccs {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], gain: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            gain,
        }
    }
}

component_impl!(Vccs, VccsBehavior);

#[derive(Debug)]
struct VccsBehavior {
    name: String,
    gain: f64,
    pins: [usize; 4],
    slots: ControlSlots,
    ac_slots: ControlSlots,
}

impl VccsBehavior {
    fn new(component: &Vccs) -> Self {
        Self {
            name: component.name.clone(),
            gain: component.gain,
            pins: [0; 4],
            slots: ControlSlots::default(),
            ac_slots: ControlSlots::default(),
        }
    }
}

impl Behavior for VccsBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 4, pins)?;
        self.pins.copy_from_slice(pins);
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for VccsBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins;
        self.slots = ControlSlots::reserve(context.store, pos, neg, cpos, cneg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        self.slots.stamp(context.store, self.gain);
    }
}

impl FrequencyBehavior for VccsBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        let [pos, neg, cpos, cneg] = self.pins;
        self.ac_slots = ControlSlots::reserve(context.store, pos, neg, cpos, cneg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots
            .stamp(context.store, Complex64::new(self.gain, 0.0));
    }
}

/// Current-controlled current source: `gain * I(control)` flows from `pos`
/// through the source to `neg`.
#[derive(Debug, Clone)]
pub struct Cccs {
    pub name: String,
    pub nodes: Vec<String>, // [pos, neg]
    /// Voltage source whose branch current is sensed
    pub control: String,
    pub gain: f64,
}

impl Cccs {
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        nodes: &[S],
        control: impl Into<String>,
        gain: f64,
    ) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            control: control.into(),
            gain,
        }
    }
}

component_impl!(Cccs, CccsBehavior);

#[derive(Debug)]
struct CccsBehavior {
    name: String,
    control: String,
    gain: f64,
    pos: usize,
    neg: usize,
    ctrl: usize,
    pos_ctrl: MatrixSlot,
    neg_ctrl: MatrixSlot,
    ac_pos_ctrl: MatrixSlot,
    ac_neg_ctrl: MatrixSlot,
}

impl CccsBehavior {
    fn new(component: &Cccs) -> Self {
        Self {
            name: component.name.clone(),
            control: component.control.clone(),
            gain: component.gain,
            pos: 0,
            neg: 0,
            ctrl: 0,
            pos_ctrl: MatrixSlot::default(),
            neg_ctrl: MatrixSlot::default(),
            ac_pos_ctrl: MatrixSlot::default(),
            ac_neg_ctrl: MatrixSlot::default(),
        }
    }
}

impl Behavior for CccsBehavior {
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

impl BiasingBehavior for CccsBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.ctrl = controlling_branch(&self.name, &self.control, context.variables)?;
        self.pos_ctrl = context.store.reserve_matrix(self.pos, self.ctrl)?;
        self.neg_ctrl = context.store.reserve_matrix(self.neg, self.ctrl)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        context.store.add(self.pos_ctrl, self.gain);
        context.store.add(self.neg_ctrl, -self.gain);
    }
}

impl FrequencyBehavior for CccsBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_pos_ctrl = context.store.reserve_matrix(self.pos, self.ctrl)?;
        self.ac_neg_ctrl = context.store.reserve_matrix(self.neg, self.ctrl)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        let gain = Complex64::new(self.gain, 0.0);
        context.store.add(self.ac_pos_ctrl, gain);
        context.store.add(self.ac_neg_ctrl, -gain);
    }
}

/// Current-controlled voltage source:
/// `V(pos) - V(neg) = gain * I(control)`.
#[derive(Debug, Clone)]
pub struct Ccvs {
    pub name: String,
    pub nodes: Vec<String>, // [pos, neg]
    /// Voltage source whose branch current is sensed
    pub control: String,
    /// Transresistance in ohms
    pub gain: f64,
}

impl Ccvs {
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        nodes: &[S],
        control: impl Into<String>,
        gain: f64,
    ) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            control: control.into(),
            gain,
        }
    }
}

component_impl!(Ccvs, CcvsBehavior);

#[derive(Debug)]
struct CcvsBehavior {
    name: String,
    control: String,
    gain: f64,
    pos: usize,
    neg: usize,
    branch: usize,
    ctrl: usize,
    branch_slots: BranchSlots,
    branch_ctrl: MatrixSlot,
    ac_branch_slots: BranchSlots,
    ac_branch_ctrl: MatrixSlot,
}

impl CcvsBehavior {
    fn new(component: &Ccvs) -> Self {
        Self {
            name: component.name.clone(),
            control: component.control.clone(),
            gain: component.gain,
            pos: 0,
            neg: 0,
            branch: 0,
            ctrl: 0,
            branch_slots: BranchSlots::default(),
            branch_ctrl: MatrixSlot::default(),
            ac_branch_slots: BranchSlots::default(),
            ac_branch_ctrl: MatrixSlot::default(),
        }
    }
}

impl Behavior for CcvsBehavior {
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

impl BiasingBehavior for CcvsBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        self.branch = variables.create(VariableSet::branch_name(&self.name), VariableKind::Current)?;
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.ctrl = controlling_branch(&self.name, &self.control, context.variables)?;
        let store = &mut *context.store;
        self.branch_slots = BranchSlots::reserve(store, self.pos, self.neg, self.branch)?;
        self.branch_ctrl = store.reserve_matrix(self.branch, self.ctrl)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        self.branch_slots.stamp(context.store);
        context.store.add(self.branch_ctrl, -self.gain);
    }
}

impl FrequencyBehavior for CcvsBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        let store = &mut *context.store;
        self.ac_branch_slots = BranchSlots::reserve(store, self.pos, self.neg, self.branch)?;
        self.ac_branch_ctrl = store.reserve_matrix(self.branch, self.ctrl)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_branch_slots.stamp(context.store);
        context
            .store
            .add(self.ac_branch_ctrl, Complex64::new(-self.gain, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodalError;
    use crate::simulation::{BiasingConfig, SimulationState};

    #[test]
    fn test_ccvs_without_control_fails_at_allocation() {
        let h = Ccvs::new("H1", &["out", "0"], "Vsense", 10.0);
        let mut variables = VariableSet::new();
        let pins = [variables.map_node("out"), 0];
        let mut behavior = h.create_behavior().unwrap();
        behavior.connect(&pins).unwrap();
        let biasing = behavior.biasing().unwrap();
        biasing.create_variables(&mut variables).unwrap();

        let mut store = EquationStore::new(variables.len());
        let mut context = AllocationContext {
            variables: &variables,
            store: &mut store,
        };
        assert!(matches!(
            biasing.allocate(&mut context),
            Err(NodalError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_vccs_stamp() {
        let g = Vccs::new("G1", &["a", "0", "c", "0"], 2e-3);
        let mut variables = VariableSet::new();
        let pins: Vec<usize> = g.nodes.iter().map(|n| variables.map_node(n)).collect();
        let mut behavior = g.create_behavior().unwrap();
        behavior.connect(&pins).unwrap();

        let mut store = EquationStore::new(variables.len());
        let biasing = behavior.biasing().unwrap();
        biasing
            .allocate(&mut AllocationContext {
                variables: &variables,
                store: &mut store,
            })
            .unwrap();

        let mut state = SimulationState::new(&BiasingConfig::default());
        state.setup(variables.len());
        biasing.load(&mut LoadContext {
            state: &mut state,
            store: &mut store,
            time: None,
        });
        assert_eq!(store.matrix_value(1, 2), 2e-3);
        assert_eq!(store.matrix_value(2, 2), 0.0);
    }
}
