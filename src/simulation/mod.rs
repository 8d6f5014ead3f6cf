//! Analyses and the Newton engine they share.
//!
//! Every analysis owns a [`BiasingSimulation`]: a fresh set of behaviors
//! bound to a variable registry and an equation store. A [`Circuit`] is
//! only read, so several analyses may run against it concurrently.
//!
//! ## Operating point
//!
//! The Newton loop is attempted directly first. If it fails, gmin stepping
//! and then source stepping are tried:
//!
//! ```text
//! direct ──fail──> gmin stepping ──fail──> source stepping ──fail──> error
//!    │                  │                        │
//!    └──────────────────┴─────────── ok ─────────┘
//! ```
//!
//! [`Circuit`]: crate::circuit::Circuit

mod ac;
mod biasing;
mod config;
mod dc;
mod export;
mod op;
mod state;
mod transient;

pub use ac::{Ac, AcPoint, AcResult, FrequencySweep};
pub use biasing::{BiasingSimulation, Statistics};
pub use config::{
    BiasingConfig, TimeConfig, DEFAULT_ABS_TOL, DEFAULT_GMIN, DEFAULT_REL_TOL, DEFAULT_VOLT_TOL,
};
pub use dc::{DcSweep, SweepPoint, SweepSpec, MAX_SWEEP_POINTS};
pub use export::{ComplexSolution, RealSolution, Solution};
pub use op::OperatingPoint;
pub use state::{ComplexState, InitializationMode, SimulationState};
pub use transient::{TimePoint, Transient, TransientResult, TransientRun};
