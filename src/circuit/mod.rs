//! Circuit representation and validation.
//!
//! A [`Circuit`] holds immutable components. It is built either directly
//! with [`Circuit::add`] or from a parser-independent [`Netlist`] through a
//! [`DeviceRegistry`]. The [`VariableSet`] numbering the unknowns is created
//! per simulation.

mod graph;
mod netlist;
mod registry;
mod validate;
mod variables;

pub use graph::Circuit;
pub use netlist::{DeviceInstance, ModelDef, ModelKind, Netlist};
pub use registry::{DeviceFactory, DeviceRegistry};
pub use validate::validate_circuit;
pub use variables::{Variable, VariableKind, VariableSet, GROUND_ALIASES};
