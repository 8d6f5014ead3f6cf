//! Time integration of state derivatives.
//!
//! Reactive devices register the charges and fluxes they store as
//! [`StateDerivative`]s. For every probed time point the
//! [`IntegrationMethod`] turns each of them into a companion model:
//!
//! ```text
//!   dq/dt  ~  geq * v - ieq
//!
//!   geq = jacobian(dq/dv)
//!   ieq = rhs_current(derivative, geq, v)
//! ```
//!
//! Step acceptance is delegated to a [`Truncation`] strategy.

mod history;
mod method;
mod truncation;

pub use history::History;
pub use method::{IntegrationMethod, IntegrationState, StateDerivative, MAX_ORDER};
pub use truncation::{Evaluation, FixedStep, LocalTruncationError, Truncation, TruncationContext};
