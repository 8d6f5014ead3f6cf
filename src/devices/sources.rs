//! Independent voltage and current sources.

use num_complex::Complex64;

use super::{
    check_pins, node_names, AllocationContext, Behavior, BiasingBehavior, Component,
    ComplexAllocation, FrequencyBehavior, FrequencyContext, LoadContext, SourceBehavior, Waveform,
};
use crate::algebra::{BranchSlots, RhsSlot};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::Result;

/// Small-signal excitation of a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcPhasor {
    pub magnitude: f64,
    /// Phase in degrees
    pub phase: f64,
}

impl AcPhasor {
    pub fn new(magnitude: f64, phase: f64) -> Self {
        Self { magnitude, phase }
    }

    /// Complex value of the phasor.
    pub fn value(&self) -> Complex64 {
        Complex64::from_polar(self.magnitude, self.phase.to_radians())
    }
}

/// Value a source drives at the present point.
///
/// DC analyses use the DC value when one is given and the waveform at
/// t = 0 otherwise; transient points use the waveform when one is given.
/// Either way the result is scaled by the source stepping factor.
fn source_value(dc: Option<f64>, waveform: Option<&Waveform>, time: Option<f64>, factor: f64) -> f64 {
    let value = match (time, waveform) {
        (Some(t), Some(w)) => w.value(t),
        (None, Some(w)) => dc.unwrap_or_else(|| w.value(0.0)),
        (_, None) => dc.unwrap_or(0.0),
    };
    value * factor
}

/// An independent voltage source.
///
/// Adds a branch current `I(name#branch)` entering the positive terminal.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub nodes: Vec<String>, // [positive, negative]
    pub dc: Option<f64>,
    pub waveform: Option<Waveform>,
    pub ac: Option<AcPhasor>,
}

impl VoltageSource {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], dc: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            dc: Some(dc),
            waveform: None,
            ac: None,
        }
    }

    /// A source whose DC value follows the waveform at t = 0.
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.dc = None;
        self.waveform = Some(waveform);
        self
    }

    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.ac = Some(AcPhasor::new(magnitude, phase));
        self
    }
}

impl Component for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(VoltageSourceBehavior {
            name: self.name.clone(),
            dc: self.dc,
            waveform: self.waveform.clone(),
            ac: self.ac,
            pos: 0,
            neg: 0,
            branch: 0,
            slots: BranchSlots::default(),
            rhs: RhsSlot::default(),
            ac_slots: BranchSlots::default(),
            ac_rhs: RhsSlot::default(),
        }))
    }
}

#[derive(Debug)]
struct VoltageSourceBehavior {
    name: String,
    dc: Option<f64>,
    waveform: Option<Waveform>,
    ac: Option<AcPhasor>,
    pos: usize,
    neg: usize,
    branch: usize,
    slots: BranchSlots,
    rhs: RhsSlot,
    ac_slots: BranchSlots,
    ac_rhs: RhsSlot,
}

impl Behavior for VoltageSourceBehavior {
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

    fn source(&mut self) -> Option<&mut dyn SourceBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for VoltageSourceBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        self.branch = variables.create(VariableSet::branch_name(&self.name), VariableKind::Current)?;
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = BranchSlots::reserve(context.store, self.pos, self.neg, self.branch)?;
        self.rhs = context.store.reserve_rhs(self.branch)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let value = source_value(
            self.dc,
            self.waveform.as_ref(),
            context.time,
            context.state.source_factor,
        );
        self.slots.stamp(context.store);
        context.store.add_rhs(self.rhs, value);
    }
}

impl FrequencyBehavior for VoltageSourceBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = BranchSlots::reserve(context.store, self.pos, self.neg, self.branch)?;
        self.ac_rhs = context.store.reserve_rhs(self.branch)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots.stamp(context.store);
        if let Some(ac) = self.ac {
            context.store.add_rhs(self.ac_rhs, ac.value());
        }
    }
}

impl SourceBehavior for VoltageSourceBehavior {
    fn dc_value(&self) -> f64 {
        self.dc.unwrap_or(0.0)
    }

    fn set_dc_value(&mut self, value: f64) {
        self.dc = Some(value);
    }
}

/// An independent current source driving current from the positive node,
/// through the external circuit, into the negative node.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub nodes: Vec<String>, // [positive, negative]
    pub dc: Option<f64>,
    pub waveform: Option<Waveform>,
    pub ac: Option<AcPhasor>,
}

impl CurrentSource {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], dc: f64) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            dc: Some(dc),
            waveform: None,
            ac: None,
        }
    }

    /// A source whose DC value follows the waveform at t = 0.
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.dc = None;
        self.waveform = Some(waveform);
        self
    }

    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.ac = Some(AcPhasor::new(magnitude, phase));
        self
    }
}

impl Component for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(CurrentSourceBehavior {
            name: self.name.clone(),
            dc: self.dc,
            waveform: self.waveform.clone(),
            ac: self.ac,
            pos: 0,
            neg: 0,
            rhs_pos: RhsSlot::default(),
            rhs_neg: RhsSlot::default(),
            ac_rhs_pos: RhsSlot::default(),
            ac_rhs_neg: RhsSlot::default(),
        }))
    }
}

#[derive(Debug)]
struct CurrentSourceBehavior {
    name: String,
    dc: Option<f64>,
    waveform: Option<Waveform>,
    ac: Option<AcPhasor>,
    pos: usize,
    neg: usize,
    rhs_pos: RhsSlot,
    rhs_neg: RhsSlot,
    ac_rhs_pos: RhsSlot,
    ac_rhs_neg: RhsSlot,
}

impl Behavior for CurrentSourceBehavior {
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

    fn source(&mut self) -> Option<&mut dyn SourceBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for CurrentSourceBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.rhs_pos = context.store.reserve_rhs(self.pos)?;
        self.rhs_neg = context.store.reserve_rhs(self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let value = source_value(
            self.dc,
            self.waveform.as_ref(),
            context.time,
            context.state.source_factor,
        );
        context.store.add_rhs(self.rhs_pos, value);
        context.store.add_rhs(self.rhs_neg, -value);
    }
}

impl FrequencyBehavior for CurrentSourceBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_rhs_pos = context.store.reserve_rhs(self.pos)?;
        self.ac_rhs_neg = context.store.reserve_rhs(self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        if let Some(ac) = self.ac {
            let value = ac.value();
            context.store.add_rhs(self.ac_rhs_pos, value);
            context.store.add_rhs(self.ac_rhs_neg, -value);
        }
    }
}

impl SourceBehavior for CurrentSourceBehavior {
    fn dc_value(&self) -> f64 {
        self.dc.unwrap_or(0.0)
    }

    fn set_dc_value(&mut self, value: f64) {
        self.dc = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_phasor() {
        let v = AcPhasor::new(2.0, 90.0).value();
        assert_relative_eq!(v.re, 0.0, epsilon = 1e-15);
        assert_relative_eq!(v.im, 2.0);
    }

    #[test]
    fn test_source_value_rules() {
        let pulse = Waveform::pulse(1.0, 5.0, 1e-3, 1e-6, 1e-6, 1e-3);
        // DC: explicit value wins, otherwise the waveform at t = 0
        assert_eq!(source_value(Some(2.0), Some(&pulse), None, 1.0), 2.0);
        assert_eq!(source_value(None, Some(&pulse), None, 1.0), 1.0);
        // Transient: waveform wins
        assert_eq!(source_value(Some(2.0), Some(&pulse), Some(1.5e-3), 1.0), 5.0);
        assert_eq!(source_value(Some(2.0), None, Some(1.5e-3), 1.0), 2.0);
        // Source stepping scales everything
        assert_eq!(source_value(Some(2.0), None, None, 0.5), 1.0);
        assert_eq!(source_value(None, Some(&pulse), Some(1.5e-3), 0.5), 2.5);
    }

    #[test]
    fn test_sweepable_dc_value() {
        let source = CurrentSource::new("I1", &["0", "in"], 0.0);
        let mut behavior = source.create_behavior().unwrap();
        let sweep = behavior.source().unwrap();
        sweep.set_dc_value(-3.0);
        assert_eq!(sweep.dc_value(), -3.0);
    }
}
