//! Named access to solved unknowns.

use std::sync::Arc;

use num_complex::Complex64;

use crate::algebra::Element;
use crate::circuit::{Variable, VariableSet};
use crate::error::{NodalError, Result};

/// A solution vector together with the variables it was solved for.
#[derive(Debug, Clone)]
pub struct Solution<T: Element> {
    variables: Arc<VariableSet>,
    values: Vec<T>,
}

/// Operating point, sweep point or time point.
pub type RealSolution = Solution<f64>;

/// Small-signal solution at one frequency.
pub type ComplexSolution = Solution<Complex64>;

impl<T: Element> Solution<T> {
    pub fn new(variables: Arc<VariableSet>, values: Vec<T>) -> Self {
        Self { variables, values }
    }

    /// Voltage of a node with respect to ground.
    pub fn voltage(&self, node: &str) -> Result<T> {
        if VariableSet::is_ground(node) {
            return Ok(T::zero());
        }
        self.value(node)
    }

    /// Voltage between two nodes.
    pub fn voltage_between(&self, pos: &str, neg: &str) -> Result<T> {
        Ok(self.voltage(pos)? - self.voltage(neg)?)
    }

    /// Branch current of a voltage source, inductor or controlled voltage
    /// source, entering its positive terminal.
    pub fn current(&self, device: &str) -> Result<T> {
        let variable = self
            .variables
            .find_branch(device)
            .ok_or_else(|| NodalError::NodeNotFound {
                node: VariableSet::branch_name(device),
            })?;
        Ok(self.values[variable.index])
    }

    /// Value of any variable by its registered name.
    pub fn value(&self, name: &str) -> Result<T> {
        self.variables
            .find(name)
            .map(|variable| self.values[variable.index])
            .ok_or_else(|| NodalError::NodeNotFound {
                node: name.to_string(),
            })
    }

    /// Raw solution vector indexed by variable (index 0 is ground).
    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn variables(&self) -> &Arc<VariableSet> {
        &self.variables
    }

    /// Every non-ground variable with its value.
    pub fn iter(&self) -> impl Iterator<Item = (&Variable, T)> + '_ {
        self.variables
            .iter()
            .skip(1)
            .map(move |variable| (variable, self.values[variable.index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::VariableKind;

    fn solution() -> RealSolution {
        let mut variables = VariableSet::new();
        variables.map_node("a");
        variables.map_node("b");
        variables
            .create(VariableSet::branch_name("V1"), VariableKind::Current)
            .unwrap();
        Solution::new(Arc::new(variables), vec![0.0, 3.0, 1.0, -2e-3])
    }

    #[test]
    fn test_named_access() {
        let solution = solution();
        assert_eq!(solution.voltage("a").unwrap(), 3.0);
        assert_eq!(solution.voltage("gnd").unwrap(), 0.0);
        assert_eq!(solution.voltage_between("a", "b").unwrap(), 2.0);
        assert_eq!(solution.current("V1").unwrap(), -2e-3);
        assert_eq!(solution.value("V1#branch").unwrap(), -2e-3);
        assert_eq!(solution.iter().count(), 3);
    }

    #[test]
    fn test_unknown_names() {
        let solution = solution();
        assert!(matches!(
            solution.voltage("c"),
            Err(NodalError::NodeNotFound { .. })
        ));
        assert!(matches!(
            solution.current("V2"),
            Err(NodalError::NodeNotFound { node }) if node == "V2#branch"
        ));
    }
}
