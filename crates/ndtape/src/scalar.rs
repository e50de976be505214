//! Scalar trait for tensor element types.

use faer_traits::ComplexField;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

/// Trait for real scalar types supported by ndtape.
///
/// This wraps faer's `ComplexField` (so matrix products can go through
/// faer's matmul) and adds the elementwise math the primitive operators
/// need for their forward and backward formulas.
pub trait Scalar:
    ComplexField
    + Copy
    + Debug
    + Default
    + PartialOrd
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + 'static
{
    /// Returns the additive identity (zero).
    fn zero() -> Self {
        Self::default()
    }

    /// Returns the multiplicative identity (one).
    fn one() -> Self;

    /// Lossy conversion from an `f64` literal or hyperparameter.
    fn from_f64(value: f64) -> Self;

    /// Widening conversion used by diagnostics and tests.
    fn to_f64(self) -> f64;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
    fn powf(self, exponent: Self) -> Self;
    fn abs(self) -> Self;

    /// Larger of two values (NaN-propagation follows the std float `max`).
    fn max(self, other: Self) -> Self;
}

macro_rules! impl_scalar_float {
    ($t:ty) => {
        impl Scalar for $t {
            fn one() -> Self {
                1.0
            }

            fn from_f64(value: f64) -> Self {
                value as $t
            }

            fn to_f64(self) -> f64 {
                self as f64
            }

            fn exp(self) -> Self {
                <$t>::exp(self)
            }

            fn ln(self) -> Self {
                <$t>::ln(self)
            }

            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            fn sin(self) -> Self {
                <$t>::sin(self)
            }

            fn cos(self) -> Self {
                <$t>::cos(self)
            }

            fn tanh(self) -> Self {
                <$t>::tanh(self)
            }

            fn powf(self, exponent: Self) -> Self {
                <$t>::powf(self, exponent)
            }

            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            fn max(self, other: Self) -> Self {
                <$t>::max(self, other)
            }
        }
    };
}

impl_scalar_float!(f32);
impl_scalar_float!(f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f64_is_real() {
        assert!(<f64 as ComplexField>::IS_REAL);
    }

    #[test]
    fn test_zero_one() {
        assert_eq!(<f64 as Scalar>::zero(), 0.0);
        assert_eq!(<f64 as Scalar>::one(), 1.0);
        assert_eq!(<f32 as Scalar>::zero(), 0.0);
        assert_eq!(<f32 as Scalar>::one(), 1.0);
    }

    #[test]
    fn test_ln_is_natural_log() {
        let e = std::f64::consts::E;
        assert!((Scalar::ln(e) - 1.0).abs() < 1e-12);
        assert!((Scalar::ln(1.0f64)).abs() < 1e-12);
    }

    #[test]
    fn test_from_to_f64() {
        assert_eq!(<f32 as Scalar>::from_f64(0.5), 0.5f32);
        assert_eq!(Scalar::to_f64(0.25f32), 0.25);
    }
}
