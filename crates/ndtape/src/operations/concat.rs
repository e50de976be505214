//! Concatenation along an axis and its inverse.

use std::ops::Range;

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::check_axis;
use crate::tensor::Tensor;

use super::slice::{embed, slice};

/// Join tensors end to end along `axis`.
///
/// All pieces must agree on every other dimension.
///
/// # Example
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::concat;
///
/// let a = Tensor::<f64>::ones(&[2, 3]);
/// let b = Tensor::<f64>::zeros(&[1, 3]);
/// let c = concat(&[&a, &b], 0).unwrap();
/// assert_eq!(c.shape(), &[3, 3]);
/// ```
pub fn concat<T: Scalar>(pieces: &[&Tensor<T>], axis: usize) -> Result<Tensor<T>, TensorError> {
    let first = pieces.first().ok_or_else(|| {
        TensorError::InvalidArgument("concat needs at least one tensor".to_string())
    })?;
    check_axis(axis, first.ndim())?;

    let mut shape = first.shape().to_vec();
    shape[axis] = 0;
    for piece in pieces {
        let compatible = piece.ndim() == first.ndim()
            && piece
                .shape()
                .iter()
                .zip(first.shape())
                .enumerate()
                .all(|(d, (a, b))| d == axis || a == b);
        if !compatible {
            return Err(TensorError::ShapeMismatch {
                expected: first.shape().to_vec(),
                actual: piece.shape().to_vec(),
            });
        }
        shape[axis] += piece.shape()[axis];
    }

    let mut out = Tensor::zeros(&shape);
    let mut offsets = vec![0usize; shape.len()];
    for piece in pieces {
        out.add_assign(&embed(piece, &shape, &offsets)?)?;
        offsets[axis] += piece.shape()[axis];
    }
    Ok(out)
}

/// Cut `tensor` into consecutive pieces of extent `group_size` along `axis`.
///
/// # Errors
///
/// Returns `TensorError::InvalidAxis` for a bad axis and
/// `TensorError::NotDivisible` when the axis length is not a multiple of
/// `group_size` (a zero group size is never a divisor).
pub fn split_axis<T: Scalar>(
    tensor: &Tensor<T>,
    axis: usize,
    group_size: usize,
) -> Result<Vec<Tensor<T>>, TensorError> {
    check_axis(axis, tensor.ndim())?;
    let len = tensor.shape()[axis];
    if group_size == 0 || len % group_size != 0 {
        return Err(TensorError::NotDivisible {
            axis,
            len,
            group_size,
        });
    }

    let mut ranges: Vec<Range<usize>> = tensor.shape().iter().map(|&d| 0..d).collect();
    (0..len / group_size)
        .map(|k| {
            ranges[axis] = k * group_size..(k + 1) * group_size;
            slice(tensor, &ranges)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_axis1() {
        let a = Tensor::from_vec(vec![1.0, 2.0], &[2, 1]).unwrap();
        let b = Tensor::from_vec(vec![3.0, 4.0, 5.0, 6.0], &[2, 2]).unwrap();
        let c = concat(&[&a, &b], 1).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_concat_rejects_mismatch() {
        let a = Tensor::<f64>::ones(&[2, 3]);
        let b = Tensor::<f64>::ones(&[3, 2]);
        assert!(matches!(
            concat(&[&a, &b], 0),
            Err(TensorError::ShapeMismatch { .. })
        ));
        assert!(concat::<f64>(&[], 0).is_err());
    }

    #[test]
    fn test_split_then_concat_restores() {
        let t: Tensor<f64> = Tensor::from_fn(&[4, 6], |i| (i[0] * 6 + i[1]) as f64);
        let pieces = split_axis(&t, 0, 2).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].shape(), &[2, 6]);
        assert_eq!(pieces[1].get(&[0, 0]), Some(&12.0));

        let refs: Vec<&Tensor<f64>> = pieces.iter().collect();
        assert_eq!(concat(&refs, 0).unwrap(), t);
    }

    #[test]
    fn test_split_not_divisible() {
        let t = Tensor::<f64>::ones(&[5, 2]);
        assert_eq!(
            split_axis(&t, 0, 2),
            Err(TensorError::NotDivisible {
                axis: 0,
                len: 5,
                group_size: 2
            })
        );
        assert!(split_axis(&t, 0, 0).is_err());
        assert_eq!(
            split_axis(&t, 2, 1),
            Err(TensorError::InvalidAxis { axis: 2, ndim: 2 })
        );
    }
}
