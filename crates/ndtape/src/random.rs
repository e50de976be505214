//! Random tensor construction.
//!
//! Used for parameter initialisation and for the seeded fixtures in the
//! gradient tests.

use rand::Rng;
use rand::distr::StandardUniform;
use rand_distr::StandardNormal;

use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// Scalars that can be drawn from the standard uniform and normal distributions.
pub trait RandomScalar: Scalar {
    /// Sample from the uniform distribution on [0, 1).
    fn sample_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self;

    /// Sample from the standard normal distribution.
    fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

macro_rules! impl_random_scalar {
    ($t:ty) => {
        impl RandomScalar for $t {
            fn sample_uniform<R: Rng + ?Sized>(rng: &mut R) -> Self {
                rng.sample(StandardUniform)
            }

            fn sample_normal<R: Rng + ?Sized>(rng: &mut R) -> Self {
                rng.sample(StandardNormal)
            }
        }
    };
}

impl_random_scalar!(f32);
impl_random_scalar!(f64);

impl<T: RandomScalar> Tensor<T> {
    /// Create a tensor with uniform random values in [0, 1).
    ///
    /// # Example
    ///
    /// ```
    /// use ndtape::Tensor;
    ///
    /// let t: Tensor<f64> = Tensor::random(&[2, 3]);
    /// assert_eq!(t.shape(), &[2, 3]);
    /// assert!(t.data().iter().all(|&v| (0.0..1.0).contains(&v)));
    /// ```
    pub fn random(shape: &[usize]) -> Self {
        Self::random_with_rng(shape, &mut rand::rng())
    }

    /// Uniform random values from a caller-supplied RNG.
    ///
    /// ```
    /// use ndtape::Tensor;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    ///
    /// let a: Tensor<f64> = Tensor::random_with_rng(&[3], &mut StdRng::seed_from_u64(42));
    /// let b: Tensor<f64> = Tensor::random_with_rng(&[3], &mut StdRng::seed_from_u64(42));
    /// assert_eq!(a, b);
    /// ```
    pub fn random_with_rng<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        Self::from_fn(shape, |_| T::sample_uniform(rng))
    }

    /// Create a tensor with standard normal random values.
    pub fn randn(shape: &[usize]) -> Self {
        Self::randn_with_rng(shape, &mut rand::rng())
    }

    pub fn randn_with_rng<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        Self::from_fn(shape, |_| T::sample_normal(rng))
    }
}
