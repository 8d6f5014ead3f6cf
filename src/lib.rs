//! # Nodal Core
//!
//! A general-purpose circuit simulator.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) equations assembled through reserved slots
//! - Newton-Raphson iteration with junction limiting, gmin stepping and
//!   source stepping
//! - Adaptive trapezoidal integration with local truncation error control
//! - Operating point, DC sweep, small-signal AC and transient analyses
//! - Linear elements, controlled and independent sources, diodes, bipolar
//!   transistors and current-controlled switches
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`algebra`] - Equation store, LU factorization and solve
//! - [`circuit`] - Variables, netlists, device registry and validation
//! - [`devices`] - The behavior contract and the device library
//! - [`integration`] - Integration history, method and step control
//! - [`simulation`] - Newton engine and the analyses built on it
//!
//! ## Usage
//!
//! ```no_run
//! use nodal_core::circuit::Circuit;
//! use nodal_core::devices::{Resistor, VoltageSource};
//! use nodal_core::simulation::OperatingPoint;
//!
//! # fn main() -> nodal_core::Result<()> {
//! let mut circuit = Circuit::new();
//! circuit.add(VoltageSource::new("V1", &["in", "0"], 10.0))?;
//! circuit.add(Resistor::new("R1", &["in", "out"], 1e3))?;
//! circuit.add(Resistor::new("R2", &["out", "0"], 1e3))?;
//!
//! let solution = OperatingPoint::default().run(&circuit)?;
//! println!("V(out) = {}", solution.voltage("out")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! A [`Circuit`] is only read by the analyses. Each analysis run creates its
//! own behaviors, state and equation store, so independent runs on the same
//! circuit may proceed on separate threads.
//!
//! ## Logging
//!
//! Progress and convergence problems are reported through the [`log`]
//! facade. The library never installs a logger.

pub mod algebra;
pub mod circuit;
pub mod devices;
pub mod error;
pub mod integration;
pub mod simulation;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{NodalError, Result};
pub use simulation::{Ac, DcSweep, OperatingPoint, Transient};

/// Elementary charge in coulombs
pub const CHARGE: f64 = 1.6021918e-19;

/// Boltzmann constant in joules per kelvin
pub const BOLTZMANN: f64 = 1.3806226e-23;

/// Offset between degrees Celsius and kelvin
pub const CELSIUS_KELVIN: f64 = 273.15;

/// Default circuit and nominal temperature (27 degrees Celsius) in kelvin
pub const REFERENCE_TEMPERATURE: f64 = 300.15;

/// Boltzmann constant over the elementary charge
pub const K_OVER_Q: f64 = BOLTZMANN / CHARGE;

/// Square root of two, used by the critical junction voltage
pub(crate) const ROOT_2: f64 = std::f64::consts::SQRT_2;
