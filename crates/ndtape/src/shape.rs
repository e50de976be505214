//! Shape and stride helpers.
//!
//! Layout is column-major (Fortran order), which is what faer's matrix views
//! expect, so a rank-2 tensor can be handed to matmul without copying.

use crate::error::TensorError;

/// Number of elements implied by a shape. A rank-0 shape holds one element.
#[inline]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product::<usize>()
}

/// Compute column-major strides from shape.
///
/// For shape [d0, d1, d2, ...], returns strides [1, d0, d0*d1, ...].
///
/// # Examples
///
/// ```
/// use ndtape::shape::compute_strides;
///
/// assert_eq!(compute_strides(&[3, 4, 5]), vec![1, 3, 12]);
/// assert_eq!(compute_strides(&[]), Vec::<usize>::new());
/// ```
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut stride = 1;
    shape
        .iter()
        .map(|&dim| {
            let s = stride;
            stride *= dim;
            s
        })
        .collect()
}

/// Convert cartesian indices to a linear offset.
#[inline]
pub fn cartesian_to_linear(indices: &[usize], strides: &[usize]) -> usize {
    indices
        .iter()
        .zip(strides.iter())
        .map(|(&idx, &stride)| idx * stride)
        .sum()
}

/// Convert a linear offset to cartesian indices (column-major).
pub fn linear_to_cartesian(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = Vec::with_capacity(shape.len());
    for &dim in shape {
        indices.push(linear % dim);
        linear /= dim;
    }
    indices
}

/// Advance `indices` to the next position in column-major order.
///
/// Returns `false` once every position has been visited.
#[inline]
pub fn next_index(indices: &mut [usize], shape: &[usize]) -> bool {
    for (idx, &dim) in indices.iter_mut().zip(shape) {
        *idx += 1;
        if *idx < dim {
            return true;
        }
        *idx = 0;
    }
    false
}

/// Call `f` once for every cartesian index of `shape`, in storage order.
pub fn for_each_index(shape: &[usize], mut f: impl FnMut(&[usize])) {
    if numel(shape) == 0 {
        return;
    }
    let mut idx = vec![0usize; shape.len()];
    loop {
        f(&idx);
        if !next_index(&mut idx, shape) {
            break;
        }
    }
}

/// Validate that `axis` addresses a dimension of a rank-`ndim` tensor.
#[inline]
pub fn check_axis(axis: usize, ndim: usize) -> Result<(), TensorError> {
    if axis >= ndim {
        return Err(TensorError::InvalidAxis { axis, ndim });
    }
    Ok(())
}

/// Validate that two shapes are identical.
#[inline]
pub fn check_same_shape(expected: &[usize], actual: &[usize]) -> Result<(), TensorError> {
    if expected != actual {
        return Err(TensorError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}
