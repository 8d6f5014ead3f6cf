//! Equation assembly and linear solving.
//!
//! Every analysis assembles a system `A x = b` where `x` holds node voltages
//! and branch currents. Devices never touch the dense matrix directly: during
//! setup they reserve slots for the coordinates they will write, and on every
//! load pass they accumulate into those slots by handle.
//!
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! Index 0 is ground. It is part of the numbering but not of the solved
//! system, so any slot touching row 0 or column 0 is a discard slot.

mod element;
mod store;

pub use element::Element;
pub use store::{BranchSlots, ConductanceSlots, EquationStore, MatrixSlot, RhsSlot};

/// Pivots smaller than this are treated as zero during factorization.
pub const PIVOT_THRESHOLD: f64 = 1e-15;
