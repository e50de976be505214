//! Tensor slicing and its adjoint.

use std::ops::Range;

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::{cartesian_to_linear, for_each_index};
use crate::tensor::Tensor;

/// Extract a block from a tensor along every dimension.
///
/// This creates a copy of the sliced data (not a view).
///
/// # Errors
///
/// Returns error if:
/// - Number of ranges doesn't match tensor dimensions
/// - Any range is out of bounds
///
/// # Example
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::slice;
///
/// let t = Tensor::<f64>::ones(&[4, 5, 6]);
/// let s = slice(&t, &[1..3, 0..5, 2..4]).unwrap();
/// assert_eq!(s.shape(), &[2, 5, 2]);
/// ```
pub fn slice<T: Scalar>(tensor: &Tensor<T>, ranges: &[Range<usize>]) -> Result<Tensor<T>, TensorError> {
    let new_shape = validate_ranges(tensor.shape(), ranges)?;
    let strides = tensor.strides().to_vec();
    let src = tensor.data();
    let mut src_idx = vec![0usize; ranges.len()];
    Ok(Tensor::from_fn(&new_shape, |idx| {
        for (d, range) in ranges.iter().enumerate() {
            src_idx[d] = range.start + idx[d];
        }
        src[cartesian_to_linear(&src_idx, &strides)]
    }))
}

/// Place `block` into a zero tensor of shape `shape` at the given offsets.
///
/// This is the adjoint of [`slice`]: `embed(slice(t, r), t.shape(), starts)`
/// keeps the sliced block and zeroes everything else.
///
/// # Errors
///
/// Returns error if the block does not fit inside `shape` at `offsets`.
pub fn embed<T: Scalar>(
    block: &Tensor<T>,
    shape: &[usize],
    offsets: &[usize],
) -> Result<Tensor<T>, TensorError> {
    let ranges: Vec<Range<usize>> = offsets
        .iter()
        .zip(block.shape())
        .map(|(&start, &len)| start..start + len)
        .collect();
    if offsets.len() != block.ndim() {
        return Err(TensorError::WrongNumberOfIndices {
            expected: block.ndim(),
            actual: offsets.len(),
        });
    }
    validate_ranges(shape, &ranges)?;

    let mut out = Tensor::zeros(shape);
    let strides = out.strides().to_vec();
    let dest = out.data_mut();
    let src = block.data();
    let mut dest_idx = vec![0usize; shape.len()];
    let mut linear = 0;
    for_each_index(block.shape(), |idx| {
        for (d, &start) in offsets.iter().enumerate() {
            dest_idx[d] = start + idx[d];
        }
        dest[cartesian_to_linear(&dest_idx, &strides)] = src[linear];
        linear += 1;
    });
    Ok(out)
}

fn validate_ranges(shape: &[usize], ranges: &[Range<usize>]) -> Result<Vec<usize>, TensorError> {
    if ranges.len() != shape.len() {
        return Err(TensorError::WrongNumberOfIndices {
            expected: shape.len(),
            actual: ranges.len(),
        });
    }
    ranges
        .iter()
        .enumerate()
        .map(|(dim, range)| {
            if range.start > range.end || range.end > shape[dim] {
                Err(TensorError::SliceOutOfBounds {
                    start: range.start,
                    end: range.end,
                    dim,
                    size: shape[dim],
                })
            } else {
                Ok(range.end - range.start)
            }
        })
        .collect()
}
