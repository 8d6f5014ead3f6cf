//! Scalar types the equation store can hold.

use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_complex::Complex64;

/// A field element the equation store can factor and solve over.
///
/// Implemented for `f64` (biasing and transient) and `Complex64`
/// (small-signal analysis).
pub trait Element:
    Copy
    + Debug
    + Default
    + PartialEq
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + 'static
{
    /// The additive identity.
    fn zero() -> Self {
        Self::default()
    }

    /// Lift a real number into this field.
    fn from_real(value: f64) -> Self;

    /// Magnitude used for pivot selection.
    fn magnitude(self) -> f64;
}

impl Element for f64 {
    fn from_real(value: f64) -> Self {
        value
    }

    fn magnitude(self) -> f64 {
        self.abs()
    }
}

impl Element for Complex64 {
    fn from_real(value: f64) -> Self {
        Complex64::new(value, 0.0)
    }

    fn magnitude(self) -> f64 {
        self.norm()
    }
}
