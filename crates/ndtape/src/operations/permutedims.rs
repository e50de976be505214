//! Permutation of tensor dimensions.
//!
//! ```text
//! permutedims(tensor, perm)
//!     → validate permutation
//!     → allocate output with permuted shape
//!     → permutedims_into(output, tensor, perm)
//! ```

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::{cartesian_to_linear, for_each_index};
use crate::tensor::Tensor;

/// Permute the dimensions of a tensor, returning a new tensor.
///
/// `perm[i]` gives the source dimension for the i-th dimension of the result.
///
/// # Errors
///
/// Returns error if `perm` is not a valid permutation of `0..ndim`.
///
/// # Examples
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::permutedims;
///
/// let t: Tensor<f64> = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
/// let t2 = permutedims(&t, &[1, 0]).unwrap();
/// assert_eq!(t2.shape(), &[3, 2]);
/// assert_eq!(t.get(&[1, 0]), t2.get(&[0, 1]));
/// ```
pub fn permutedims<T: Scalar>(tensor: &Tensor<T>, perm: &[usize]) -> Result<Tensor<T>, TensorError> {
    validate_permutation(perm, tensor.ndim())?;

    let new_shape: Vec<usize> = perm.iter().map(|&p| tensor.shape()[p]).collect();
    let mut result = Tensor::zeros(&new_shape);
    permutedims_into(&mut result, tensor, perm);
    Ok(result)
}

/// Permute `src` into an existing output tensor.
///
/// # Panics
///
/// Panics if `dest` does not have the permuted shape of `src`.
pub fn permutedims_into<T: Scalar>(dest: &mut Tensor<T>, src: &Tensor<T>, perm: &[usize]) {
    let expected: Vec<usize> = perm.iter().map(|&p| src.shape()[p]).collect();
    assert_eq!(
        dest.shape(),
        expected.as_slice(),
        "destination shape does not match permuted source shape"
    );

    let dest_strides = dest.strides().to_vec();
    let dest_data = dest.data_mut();
    let src_data = src.data();
    let mut dest_idx = vec![0usize; perm.len()];
    let mut linear = 0;
    for_each_index(src.shape(), |src_idx| {
        for (d, &p) in perm.iter().enumerate() {
            dest_idx[d] = src_idx[p];
        }
        dest_data[cartesian_to_linear(&dest_idx, &dest_strides)] = src_data[linear];
        linear += 1;
    });
}

/// Matrix transpose of a rank-2 tensor.
pub fn transpose<T: Scalar>(tensor: &Tensor<T>) -> Result<Tensor<T>, TensorError> {
    if tensor.ndim() != 2 {
        return Err(TensorError::RankMismatch {
            expected: 2,
            actual: tensor.ndim(),
        });
    }
    permutedims(tensor, &[1, 0])
}

/// Validate that perm is a valid permutation of 0..ndim.
fn validate_permutation(perm: &[usize], ndim: usize) -> Result<(), TensorError> {
    let invalid = || TensorError::InvalidPermutation {
        perm: perm.to_vec(),
        ndim,
    };
    if perm.len() != ndim {
        return Err(invalid());
    }
    let mut seen = vec![false; ndim];
    for &p in perm {
        if p >= ndim || seen[p] {
            return Err(invalid());
        }
        seen[p] = true;
    }
    Ok(())
}
