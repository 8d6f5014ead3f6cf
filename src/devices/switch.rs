//! Current-controlled switch with hysteresis.

use std::sync::Arc;

use super::{
    check_pins, controlling_branch, node_names, AcceptBehavior, AllocationContext, Behavior,
    BiasingBehavior, Component, ComplexAllocation, FrequencyBehavior, FrequencyContext,
    LoadContext,
};
use crate::algebra::{ConductanceSlots, Element};
use crate::error::{NodalError, Result};
use crate::simulation::{InitializationMode, SimulationState};

/// Parameters of a current-controlled switch model.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchModel {
    pub name: String,
    /// On resistance (RON)
    pub ron: f64,
    /// Off resistance (ROFF)
    pub roff: f64,
    /// Threshold current (IT)
    pub it: f64,
    /// Hysteresis current (IH)
    pub ih: f64,
}

impl Default for SwitchModel {
    fn default() -> Self {
        Self {
            name: String::new(),
            ron: 1.0,
            roff: 1e12,
            it: 0.0,
            ih: 0.0,
        }
    }
}

impl SwitchModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a parameter by name (case-insensitive).
    pub fn set(&mut self, param: &str, value: f64) -> Result<()> {
        match param.to_ascii_lowercase().as_str() {
            "ron" => self.ron = value,
            "roff" => self.roff = value,
            "it" => self.it = value,
            "ih" => self.ih = value,
            other => {
                return Err(NodalError::invalid_parameter(
                    &self.name,
                    other,
                    "unknown switch model parameter",
                ))
            }
        }
        Ok(())
    }

    pub fn with(mut self, param: &str, value: f64) -> Result<Self> {
        self.set(param, value)?;
        Ok(self)
    }
}

/// A switch between two nodes, closed while the current through a
/// controlling voltage source is above the threshold.
#[derive(Debug, Clone)]
pub struct CurrentSwitch {
    pub name: String,
    pub nodes: Vec<String>, // [pos, neg]
    /// Voltage source whose branch current controls the switch
    pub control: String,
    pub model: Arc<SwitchModel>,
    /// State used before the first accepted point
    pub initially_on: bool,
}

impl CurrentSwitch {
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        nodes: &[S],
        control: impl Into<String>,
        model: Arc<SwitchModel>,
    ) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            control: control.into(),
            model,
            initially_on: false,
        }
    }

    pub fn with_initially_on(mut self, on: bool) -> Self {
        self.initially_on = on;
        self
    }
}

impl Component for CurrentSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        let model = &*self.model;
        if !(model.ron > 0.0 && model.roff > 0.0) {
            return Err(NodalError::invalid_parameter(
                &self.name,
                "ron/roff",
                "switch resistances must be positive",
            ));
        }
        Ok(Box::new(SwitchBehavior {
            name: self.name.clone(),
            control: self.control.clone(),
            model: Arc::clone(&self.model),
            pos: 0,
            neg: 0,
            branch: 0,
            committed: self.initially_on,
            current: self.initially_on,
            slots: ConductanceSlots::default(),
            ac_slots: ConductanceSlots::default(),
        }))
    }
}

#[derive(Debug)]
struct SwitchBehavior {
    name: String,
    control: String,
    model: Arc<SwitchModel>,
    pos: usize,
    neg: usize,
    branch: usize,
    /// State of the last accepted point
    committed: bool,
    /// State of the last load
    current: bool,
    slots: ConductanceSlots,
    ac_slots: ConductanceSlots,
}

impl SwitchBehavior {
    fn conductance<T: Element>(&self) -> T {
        let resistance = if self.current {
            self.model.ron
        } else {
            self.model.roff
        };
        T::from_real(1.0 / resistance)
    }
}

impl Behavior for SwitchBehavior {
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

    fn accept(&mut self) -> Option<&mut dyn AcceptBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for SwitchBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.branch = controlling_branch(&self.name, &self.control, context.variables)?;
        self.slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let state = &mut *context.state;
        let next = match state.init {
            InitializationMode::Fix | InitializationMode::Junction => self.committed,
            InitializationMode::None => {
                let ctrl = state.solution[self.branch];
                let model = &*self.model;
                if ctrl > model.it + model.ih {
                    true
                } else if ctrl < model.it - model.ih {
                    false
                } else {
                    self.committed
                }
            }
        };
        if next != self.current {
            log::trace!("{}: switched {}", self.name, if next { "on" } else { "off" });
            state.is_convergent = false;
        }
        self.current = next;
        let g = self.conductance::<f64>();
        self.slots.stamp(context.store, g);
    }
}

impl FrequencyBehavior for SwitchBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = ConductanceSlots::reserve(context.store, self.pos, self.neg)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        let g = self.conductance();
        self.ac_slots.stamp(context.store, g);
    }
}

impl AcceptBehavior for SwitchBehavior {
    fn accept(&mut self, _state: &SimulationState) {
        self.committed = self.current;
    }
}
