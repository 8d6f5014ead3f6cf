//! Parser-independent description of a circuit.
//!
//! A front end (or a test) fills a [`Netlist`] with device instances and
//! model definitions; a [`DeviceRegistry`](super::DeviceRegistry) turns
//! each instance into a component.

use std::collections::HashMap;

use crate::devices::{AcPhasor, Waveform};

/// One device line of a netlist.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInstance {
    /// Kind letter (`R`, `C`, `Q`, ...)
    pub kind: char,
    pub name: String,
    /// Node names in pin order
    pub nodes: Vec<String>,
    /// Primary value: resistance, capacitance, DC value or gain
    pub value: Option<f64>,
    /// Controlling voltage source of current-controlled devices
    pub control: Option<String>,
    /// Model name of semiconductor devices and switches
    pub model: Option<String>,
    /// Instance parameters (`ic`, `area`, `off`, ...)
    pub params: HashMap<String, f64>,
    pub waveform: Option<Waveform>,
    pub ac: Option<AcPhasor>,
}

impl DeviceInstance {
    pub fn new<S: AsRef<str>>(kind: char, name: impl Into<String>, nodes: &[S]) -> Self {
        Self {
            kind: kind.to_ascii_uppercase(),
            name: name.into(),
            nodes: nodes.iter().map(|n| n.as_ref().to_string()).collect(),
            value: None,
            control: None,
            model: None,
            params: HashMap::new(),
            waveform: None,
            ac: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_control(mut self, control: impl Into<String>) -> Self {
        self.control = Some(control.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into().to_ascii_lowercase(), value);
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = Some(waveform);
        self
    }

    pub fn with_ac(mut self, magnitude: f64, phase: f64) -> Self {
        self.ac = Some(AcPhasor::new(magnitude, phase));
        self
    }

    /// Instance parameter by (lowercase) name.
    pub fn param(&self, name: &str) -> Option<f64> {
        self.params.get(name).copied()
    }
}

/// Kind of a model definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Diode,
    Npn,
    Pnp,
    CurrentSwitch,
}

/// A named parameter set shared by device instances.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub kind: ModelKind,
    pub params: HashMap<String, f64>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// Devices and models of one circuit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Netlist {
    pub devices: Vec<DeviceInstance>,
    pub models: Vec<ModelDef>,
}

impl Netlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, device: DeviceInstance) -> &mut Self {
        self.devices.push(device);
        self
    }

    pub fn add_model(&mut self, model: ModelDef) -> &mut Self {
        self.models.push(model);
        self
    }

    /// Model by name (case-insensitive).
    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models
            .iter()
            .find(|model| model.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let device = DeviceInstance::new('q', "Q1", &["c", "b", "e", "0"])
            .with_model("BC547")
            .with_param("AREA", 2.0);
        assert_eq!(device.kind, 'Q');
        assert_eq!(device.param("area"), Some(2.0));

        let mut netlist = Netlist::new();
        netlist
            .add_device(device)
            .add_model(ModelDef::new("BC547", ModelKind::Npn).with_param("bf", 300.0));
        assert!(netlist.model("bc547").is_some());
        assert!(netlist.model("2N3904").is_none());
    }
}
