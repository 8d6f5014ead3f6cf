//! Error types for the nodal circuit simulator.
//!
//! This module provides a unified error type [`NodalError`] that covers
//! configuration problems detected while a simulation is being set up and
//! numerical failures that terminate an analysis point.

use thiserror::Error;

/// Result type alias using [`NodalError`].
pub type Result<T> = std::result::Result<T, NodalError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug)]
pub enum NodalError {
    // ============ Configuration Errors ============
    /// A device was connected with the wrong number of pins
    #[error("Pin count mismatch for '{name}': {expected} pins expected, {given} given")]
    PinCountMismatch {
        name: String,
        expected: usize,
        given: usize,
    },

    /// A device refers to another device or variable that does not exist
    #[error("Device '{name}' depends on '{dependency}', which could not be found")]
    MissingDependency { name: String, dependency: String },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for '{name}': {message}")]
    InvalidParameter {
        name: String,
        param: String,
        message: String,
    },

    /// No factory registered for a device kind
    #[error("Unknown device kind '{kind}' for '{name}'")]
    UnknownDeviceKind { kind: char, name: String },

    /// Undefined model reference
    #[error("Undefined model '{model}' referenced by '{name}'")]
    UndefinedModel { model: String, name: String },

    /// Duplicate component name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// Duplicate variable name
    #[error("Duplicate variable '{name}'")]
    DuplicateVariable { name: String },

    /// Node or variable not found
    #[error("Node '{node}' not found in circuit")]
    NodeNotFound { node: String },

    /// A sweep refers to something that is not an independent source
    #[error("'{name}' is not an independent source of this circuit")]
    SourceNotFound { name: String },

    /// An equation slot was requested outside the allocated system
    #[error("Equation slot ({row}, {col}) is outside a system of size {size}")]
    SlotOutOfRange { row: usize, col: usize, size: usize },

    /// Invalid circuit topology
    #[error("Invalid circuit topology: {message}")]
    InvalidTopology { message: String },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    // ============ Numerical Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix at row {row} - circuit may have a floating node or a voltage loop")]
    SingularMatrix { row: usize },

    /// All convergence strategies were exhausted
    #[error("No operating point found after {iterations} iterations (gmin and source stepping exhausted)")]
    NoOperatingPoint { iterations: usize },

    /// The integration method could not find an acceptable time step
    #[error("Timestep too small at t = {time:.6e}: {delta:.3e}")]
    TimestepTooSmall { time: f64, delta: f64 },

    /// A transient analysis stopped because of an unrecoverable error
    #[error("Transient terminated at t = {time:.6e}")]
    TransientTerminated {
        time: f64,
        #[source]
        source: Box<NodalError>,
    },
}

impl NodalError {
    /// Create a pin count mismatch error
    pub fn pin_count(name: impl Into<String>, expected: usize, given: usize) -> Self {
        Self::PinCountMismatch {
            name: name.into(),
            expected,
            given,
        }
    }

    /// Create a missing dependency error
    pub fn missing_dependency(name: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::MissingDependency {
            name: name.into(),
            dependency: dependency.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(
        name: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an invalid simulation parameter error
    pub fn invalid_simulation(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Wrap an error that ended a transient analysis
    pub fn transient_terminated(time: f64, source: NodalError) -> Self {
        Self::TransientTerminated {
            time,
            source: Box::new(source),
        }
    }

    /// True for errors raised while building or setting up a simulation.
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            Self::SingularMatrix { .. }
                | Self::NoOperatingPoint { .. }
                | Self::TimestepTooSmall { .. }
                | Self::TransientTerminated { .. }
        )
    }
}
