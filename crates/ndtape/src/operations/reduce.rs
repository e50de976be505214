//! Reductions and the broadcasts that undo them in the backward pass.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::{cartesian_to_linear, check_axis, compute_strides};
use crate::tensor::Tensor;

/// Sum of all elements as a shape-`[1]` tensor.
pub fn sum_all<T: Scalar>(tensor: &Tensor<T>) -> Tensor<T> {
    let total = tensor.data().iter().fold(T::zero(), |acc, &x| acc + x);
    Tensor::scalar(total)
}

/// Sum along `axis`.
///
/// With `keepdims` the reduced axis stays with length 1, otherwise it is
/// removed. Reducing the only axis of a vector without `keepdims` yields
/// shape `[1]`.
///
/// # Example
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::sum_axis;
///
/// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
/// let s = sum_axis(&t, 0, false).unwrap();
/// assert_eq!(s.data(), &[3.0, 7.0]);
/// ```
pub fn sum_axis<T: Scalar>(tensor: &Tensor<T>, axis: usize, keepdims: bool) -> Result<Tensor<T>, TensorError> {
    check_axis(axis, tensor.ndim())?;
    let mut kept_shape = tensor.shape().to_vec();
    kept_shape[axis] = 1;
    let kept_strides = compute_strides(&kept_shape);

    let mut out = Tensor::zeros(&kept_shape);
    {
        let dest = out.data_mut();
        let mut idx = vec![0usize; tensor.ndim()];
        for &x in tensor.data() {
            let mut reduced = idx.clone();
            reduced[axis] = 0;
            dest[cartesian_to_linear(&reduced, &kept_strides)] += x;
            crate::shape::next_index(&mut idx, tensor.shape());
        }
    }

    if keepdims {
        Ok(out)
    } else {
        out.reshape(&reduced_shape(tensor.shape(), axis))
    }
}

/// Repeat `tensor` `len` times along `axis`, the adjoint of [`sum_axis`].
///
/// `tensor` may either carry the axis with length 1 or lack it entirely; the
/// target shape `shape` decides which.
pub fn broadcast_axis<T: Scalar>(
    tensor: &Tensor<T>,
    shape: &[usize],
    axis: usize,
) -> Result<Tensor<T>, TensorError> {
    check_axis(axis, shape.len())?;
    let mut kept_shape = shape.to_vec();
    kept_shape[axis] = 1;
    let kept = tensor.reshape(&kept_shape)?;
    let kept_strides = kept.strides().to_vec();
    let src = kept.data();
    Ok(Tensor::from_fn(shape, |idx| {
        let mut reduced = idx.to_vec();
        reduced[axis] = 0;
        src[cartesian_to_linear(&reduced, &kept_strides)]
    }))
}

fn reduced_shape(shape: &[usize], axis: usize) -> Vec<usize> {
    let out: Vec<usize> = shape
        .iter()
        .enumerate()
        .filter(|&(d, _)| d != axis)
        .map(|(_, &len)| len)
        .collect();
    if out.is_empty() { vec![1] } else { out }
}
