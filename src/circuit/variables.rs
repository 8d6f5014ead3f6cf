//! Unknowns of the circuit equations.

use std::collections::HashMap;
use std::fmt;

use crate::error::{NodalError, Result};

/// Names that resolve to the ground node.
pub const GROUND_ALIASES: [&str; 3] = ["0", "gnd", "GND"];

/// What a variable measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Node voltage
    Voltage,
    /// Branch current (voltage sources, inductors, controlled voltage sources)
    Current,
}

/// A named unknown and its index in the solution vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub index: usize,
    pub kind: VariableKind,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            VariableKind::Voltage => write!(f, "V({})", self.name),
            VariableKind::Current => write!(f, "I({})", self.name),
        }
    }
}

/// Registry of all unknowns of one simulation setup.
///
/// Ground is always index 0 and is not part of the solved system.
#[derive(Debug, Clone)]
pub struct VariableSet {
    variables: Vec<Variable>,
    map: HashMap<String, usize>,
}

impl Default for VariableSet {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableSet {
    /// Create a registry holding only the ground node.
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for alias in GROUND_ALIASES {
            map.insert(alias.to_string(), 0);
        }
        Self {
            variables: vec![Variable {
                name: "0".to_string(),
                index: 0,
                kind: VariableKind::Voltage,
            }],
            map,
        }
    }

    /// Check if a node name refers to ground.
    pub fn is_ground(name: &str) -> bool {
        GROUND_ALIASES.contains(&name)
    }

    /// Name of the branch current variable owned by a device.
    pub fn branch_name(device: &str) -> String {
        format!("{device}#branch")
    }

    /// Name of an internal node owned by a device.
    pub fn internal_name(device: &str, suffix: &str) -> String {
        format!("{device}#{suffix}")
    }

    /// Index of a circuit node, creating a voltage variable on first use.
    pub fn map_node(&mut self, name: &str) -> usize {
        if let Some(&index) = self.map.get(name) {
            return index;
        }
        self.push(name, VariableKind::Voltage)
    }

    /// Create a new variable. Fails if the name is already taken.
    pub fn create(&mut self, name: impl Into<String>, kind: VariableKind) -> Result<usize> {
        let name = name.into();
        if self.map.contains_key(&name) {
            return Err(NodalError::DuplicateVariable { name });
        }
        Ok(self.push(&name, kind))
    }

    fn push(&mut self, name: &str, kind: VariableKind) -> usize {
        let index = self.variables.len();
        self.variables.push(Variable {
            name: name.to_string(),
            index,
            kind,
        });
        self.map.insert(name.to_string(), index);
        index
    }

    /// Find a variable by name.
    pub fn find(&self, name: &str) -> Option<&Variable> {
        self.map.get(name).map(|&index| &self.variables[index])
    }

    /// Find the branch current of a device.
    pub fn find_branch(&self, device: &str) -> Option<&Variable> {
        self.find(&Self::branch_name(device))
    }

    /// Get a variable by index.
    pub fn get(&self, index: usize) -> Option<&Variable> {
        self.variables.get(index)
    }

    /// Kind of the variable at `index`.
    pub fn kind(&self, index: usize) -> VariableKind {
        self.variables
            .get(index)
            .map(|v| v.kind)
            .unwrap_or(VariableKind::Voltage)
    }

    /// Number of variables, ground included.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Check if only ground is registered.
    pub fn is_empty(&self) -> bool {
        self.variables.len() <= 1
    }

    /// Iterate over all variables, ground first.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ground_aliases() {
        let mut vars = VariableSet::new();
        assert_eq!(vars.map_node("0"), 0);
        assert_eq!(vars.map_node("gnd"), 0);
        assert_eq!(vars.map_node("GND"), 0);
        assert!(vars.is_empty());
    }

    #[test]
    fn test_nodes_are_numbered_in_order() {
        let mut vars = VariableSet::new();
        assert_eq!(vars.map_node("in"), 1);
        assert_eq!(vars.map_node("out"), 2);
        assert_eq!(vars.map_node("in"), 1);
        assert_eq!(vars.len(), 3);
        assert_eq!(vars.kind(2), VariableKind::Voltage);
    }

    #[test]
    fn test_branch_variables() {
        let mut vars = VariableSet::new();
        vars.map_node("in");
        let br = vars
            .create(VariableSet::branch_name("V1"), VariableKind::Current)
            .unwrap();
        assert_eq!(br, 2);
        assert_eq!(vars.find_branch("V1").map(|v| v.index), Some(2));
        assert_eq!(vars.kind(br), VariableKind::Current);
        assert_eq!(vars.get(br).unwrap().to_string(), "I(V1#branch)");
    }

    #[test]
    fn test_duplicate_variable_fails() {
        let mut vars = VariableSet::new();
        vars.map_node("a");
        assert!(matches!(
            vars.create("a", VariableKind::Voltage),
            Err(NodalError::DuplicateVariable { .. })
        ));
    }
}
