//! Element-wise tensor operations.
//!
//! The `_par` variants split the work across the current rayon pool once the
//! tensor has at least `min_elements` elements; below that they fall back to
//! the sequential loop.

use rayon::prelude::*;

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::check_same_shape;
use crate::tensor::Tensor;

/// Apply `f` to every element.
///
/// # Example
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::map;
///
/// let t = Tensor::from_vec(vec![1.0, 4.0, 9.0], &[3]).unwrap();
/// let r = map(&t, f64::sqrt);
/// assert_eq!(r.data(), &[1.0, 2.0, 3.0]);
/// ```
pub fn map<T: Scalar>(tensor: &Tensor<T>, f: impl Fn(T) -> T) -> Tensor<T> {
    let data: Vec<T> = tensor.data().iter().map(|&x| f(x)).collect();
    from_parts(data, tensor.shape())
}

/// Parallel [`map`] for large tensors.
pub fn map_par<T: Scalar>(
    tensor: &Tensor<T>,
    min_elements: usize,
    f: impl Fn(T) -> T + Sync + Send,
) -> Tensor<T> {
    if tensor.len() < min_elements {
        return map(tensor, f);
    }
    let data: Vec<T> = tensor.data().par_iter().map(|&x| f(x)).collect();
    from_parts(data, tensor.shape())
}

/// Combine two same-shaped tensors element by element.
///
/// # Errors
///
/// Returns `TensorError::ShapeMismatch` if the shapes differ.
pub fn zip_map<T: Scalar>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    f: impl Fn(T, T) -> T,
) -> Result<Tensor<T>, TensorError> {
    check_same_shape(a.shape(), b.shape())?;
    let data: Vec<T> = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Ok(from_parts(data, a.shape()))
}

/// Parallel [`zip_map`] for large tensors.
pub fn zip_map_par<T: Scalar>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    min_elements: usize,
    f: impl Fn(T, T) -> T + Sync + Send,
) -> Result<Tensor<T>, TensorError> {
    if a.len() < min_elements {
        return zip_map(a, b, f);
    }
    check_same_shape(a.shape(), b.shape())?;
    let data: Vec<T> = a
        .data()
        .par_iter()
        .zip(b.data().par_iter())
        .map(|(&x, &y)| f(x, y))
        .collect();
    Ok(from_parts(data, a.shape()))
}

/// Multiply every element by `alpha`.
pub fn scale<T: Scalar>(tensor: &Tensor<T>, alpha: T) -> Tensor<T> {
    map(tensor, |x| x * alpha)
}

// Length always matches the shape it came from.
fn from_parts<T: Scalar>(data: Vec<T>, shape: &[usize]) -> Tensor<T> {
    match Tensor::from_vec(data, shape) {
        Ok(t) => t,
        Err(_) => unreachable!("element-wise kernels preserve length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_map_and_scale() {
        let t = Tensor::from_vec(vec![1.0, -2.0, 3.0], &[3]).unwrap();
        assert_eq!(map(&t, |x: f64| x * x).data(), &[1.0, 4.0, 9.0]);
        assert_eq!(scale(&t, 2.0).data(), &[2.0, -4.0, 6.0]);
    }

    #[test]
    fn test_zip_map_shape_mismatch() {
        let a: Tensor<f64> = Tensor::ones(&[2, 3]);
        let b: Tensor<f64> = Tensor::ones(&[3, 2]);
        assert!(matches!(
            zip_map(&a, &b, |x, y| x + y),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_par_matches_sequential() {
        let a: Tensor<f64> = Tensor::from_fn(&[64, 32], |i| (i[0] as f64).sin() + i[1] as f64);
        let b: Tensor<f64> = Tensor::from_fn(&[64, 32], |i| (i[1] as f64).cos() * i[0] as f64);

        let seq = zip_map(&a, &b, |x, y| x * y + 1.0).unwrap();
        let par = zip_map_par(&a, &b, 1, |x, y| x * y + 1.0).unwrap();
        for (s, p) in seq.data().iter().zip(par.data()) {
            assert_relative_eq!(*s, *p);
        }

        let seq = map(&a, f64::tanh);
        let par = map_par(&a, 1, f64::tanh);
        assert_eq!(seq, par);
    }

    #[test]
    fn test_map_par_below_threshold() {
        let a: Tensor<f32> = Tensor::ones(&[4]);
        let r = map_par(&a, 1 << 20, |x| x + 1.0);
        assert_eq!(r.data(), &[2.0; 4]);
    }
}
