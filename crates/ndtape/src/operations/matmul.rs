//! Matrix product through faer.

use faer::linalg::matmul::matmul as faer_matmul;
use faer::{Accum, Par};

use crate::backend::AsFaerMat;
use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// `C = A * B` for rank-2 tensors.
///
/// # Errors
///
/// Returns `TensorError::RankMismatch` for non-matrices and
/// `TensorError::ShapeMismatch` when the inner dimensions disagree.
///
/// # Example
///
/// ```
/// use ndtape::Tensor;
/// use ndtape::operations::matmul;
///
/// let a = Tensor::from_vec(vec![1.0, 3.0, 2.0, 4.0], &[2, 2]).unwrap(); // [[1, 2], [3, 4]]
/// let c = matmul(&a, &Tensor::eye(2)).unwrap();
/// assert_eq!(c, a);
/// ```
pub fn matmul<T: Scalar>(a: &Tensor<T>, b: &Tensor<T>) -> Result<Tensor<T>, TensorError> {
    for t in [a, b] {
        if t.ndim() != 2 {
            return Err(TensorError::RankMismatch {
                expected: 2,
                actual: t.ndim(),
            });
        }
    }
    let (m, k) = (a.shape()[0], a.shape()[1]);
    let n = b.shape()[1];
    if b.shape()[0] != k {
        return Err(TensorError::ShapeMismatch {
            expected: vec![k, n],
            actual: b.shape().to_vec(),
        });
    }

    let mut c = Tensor::zeros(&[m, n]);
    if m == 0 || n == 0 || k == 0 {
        return Ok(c);
    }
    let a_mat = a.as_faer_mat(m, k);
    let b_mat = b.as_faer_mat(k, n);
    let mut c_mat = c.as_faer_mat_mut(m, n);
    faer_matmul(c_mat.as_mut(), Accum::Replace, a_mat, b_mat, T::one(), Par::Seq);
    Ok(c)
}
