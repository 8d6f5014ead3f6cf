//! Circuit validation.

use std::collections::HashMap;

use super::{Circuit, VariableSet};
use crate::error::{NodalError, Result};

/// Validate a circuit for simulation.
///
/// Checks:
/// - The circuit has at least one component
/// - Some component connects to ground
///
/// Nodes with a single connection are reported with a warning. Floating
/// subcircuits are left to the factorization, which reports them as a
/// singular matrix.
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.is_empty() {
        return Err(NodalError::InvalidTopology {
            message: "Circuit has no components".to_string(),
        });
    }

    let mut connections: HashMap<&str, usize> = HashMap::new();
    let mut grounded = false;
    for component in circuit.components() {
        for node in component.nodes() {
            if VariableSet::is_ground(node) {
                grounded = true;
            } else {
                *connections.entry(node.as_str()).or_default() += 1;
            }
        }
    }

    if !grounded {
        return Err(NodalError::InvalidTopology {
            message: "No component is connected to ground".to_string(),
        });
    }

    for node in circuit.node_names() {
        if connections.get(node) == Some(&1) {
            log::warn!("node '{node}' has only one connection");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{Resistor, VoltageSource};

    #[test]
    fn test_empty_circuit() {
        assert!(matches!(
            validate_circuit(&Circuit::new()),
            Err(NodalError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_no_ground() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "b"], 1.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "b"], 1.0)).unwrap();
        assert!(matches!(
            validate_circuit(&circuit),
            Err(NodalError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_dangling_node_is_accepted() {
        let mut circuit = Circuit::new();
        circuit.add(VoltageSource::new("V1", &["a", "0"], 1.0)).unwrap();
        circuit.add(Resistor::new("R1", &["a", "open"], 1.0)).unwrap();
        assert!(validate_circuit(&circuit).is_ok());
    }
}
