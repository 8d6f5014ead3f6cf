//! Circuit container.

use std::collections::HashMap;

use super::{validate_circuit, DeviceRegistry, Netlist, VariableSet};
use crate::devices::Component;
use crate::error::{NodalError, Result};

/// An ordered set of uniquely named components.
///
/// The circuit is never mutated by an analysis. Every simulation creates
/// its own behaviors from it, so one circuit can be shared between threads.
#[derive(Debug, Default)]
pub struct Circuit {
    components: Vec<Box<dyn Component>>,
    index: HashMap<String, usize>,
}

impl Circuit {
    /// Create an empty circuit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a circuit from a netlist.
    pub fn from_netlist(netlist: &Netlist, registry: &DeviceRegistry) -> Result<Self> {
        let mut circuit = Self::new();
        for device in &netlist.devices {
            circuit.add_boxed(registry.build(device, netlist)?)?;
        }
        validate_circuit(&circuit)?;
        Ok(circuit)
    }

    /// Add a component. Names must be unique.
    pub fn add<C: Component + 'static>(&mut self, component: C) -> Result<()> {
        self.add_boxed(Box::new(component))
    }

    pub fn add_boxed(&mut self, component: Box<dyn Component>) -> Result<()> {
        let name = component.name().to_string();
        if self.index.contains_key(&name) {
            return Err(NodalError::DuplicateComponent { name });
        }
        self.index.insert(name, self.components.len());
        self.components.push(component);
        Ok(())
    }

    /// Components in insertion order.
    pub fn components(&self) -> &[Box<dyn Component>] {
        &self.components
    }

    pub fn find(&self, name: &str) -> Option<&dyn Component> {
        self.index.get(name).map(|&i| self.components[i].as_ref())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Non-ground node names in order of first appearance.
    pub fn node_names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for node in self.components.iter().flat_map(|c| c.nodes()) {
            if !VariableSet::is_ground(node) && !seen.contains(&node.as_str()) {
                seen.push(node.as_str());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::DeviceInstance;
    use crate::devices::Resistor;

    #[test]
    fn test_duplicate_name() {
        let mut circuit = Circuit::new();
        circuit.add(Resistor::new("R1", &["a", "0"], 1.0)).unwrap();
        assert!(matches!(
            circuit.add(Resistor::new("R1", &["b", "0"], 1.0)),
            Err(NodalError::DuplicateComponent { .. })
        ));
        assert_eq!(circuit.len(), 1);
    }

    #[test]
    fn test_from_netlist() {
        let mut netlist = Netlist::new();
        netlist
            .add_device(DeviceInstance::new('V', "V1", &["in", "0"]).with_value(1.0))
            .add_device(DeviceInstance::new('R', "R1", &["in", "out"]).with_value(1e3))
            .add_device(DeviceInstance::new('R', "R2", &["out", "gnd"]).with_value(1e3));
        let circuit = Circuit::from_netlist(&netlist, &DeviceRegistry::standard()).unwrap();
        assert_eq!(circuit.len(), 3);
        assert_eq!(circuit.node_names(), vec!["in", "out"]);
        assert_eq!(circuit.find("R2").unwrap().nodes()[1], "gnd");
    }
}
