//! Zero-copy conversion between `Tensor` and faer matrices.
//!
//! Both sides use column-major storage, so a rank-2 tensor is a faer matrix
//! view over the same slice.

use faer::{MatMut, MatRef};

use crate::scalar::Scalar;
use crate::tensor::Tensor;

/// Extension trait for viewing tensor data as faer matrices.
pub trait AsFaerMat<T: Scalar> {
    /// View tensor data as an immutable `rows x cols` matrix (zero-copy).
    ///
    /// # Panics
    ///
    /// Panics if `rows * cols != tensor.len()`; callers validate shapes first.
    ///
    /// # Example
    ///
    /// ```
    /// use ndtape::Tensor;
    /// use ndtape::backend::AsFaerMat;
    ///
    /// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// let mat = t.as_faer_mat(2, 3);
    /// assert_eq!(mat.nrows(), 2);
    /// assert_eq!(mat.ncols(), 3);
    /// ```
    fn as_faer_mat(&self, rows: usize, cols: usize) -> MatRef<'_, T>;

    /// View tensor data as a mutable `rows x cols` matrix (zero-copy).
    fn as_faer_mat_mut(&mut self, rows: usize, cols: usize) -> MatMut<'_, T>;
}

impl<T: Scalar> AsFaerMat<T> for Tensor<T> {
    fn as_faer_mat(&self, rows: usize, cols: usize) -> MatRef<'_, T> {
        assert_eq!(
            rows * cols,
            self.len(),
            "matrix view {rows} x {cols} does not cover tensor of {} elements",
            self.len()
        );
        MatRef::from_column_major_slice(self.data(), rows, cols)
    }

    fn as_faer_mat_mut(&mut self, rows: usize, cols: usize) -> MatMut<'_, T> {
        assert_eq!(
            rows * cols,
            self.len(),
            "matrix view {rows} x {cols} does not cover tensor of {} elements",
            self.len()
        );
        MatMut::from_column_major_slice_mut(self.data_mut(), rows, cols)
    }
}

/// Copy a faer matrix into a new `[rows, cols]` tensor.
pub fn tensor_from_faer_mat<T: Scalar>(mat: MatRef<'_, T>) -> Tensor<T> {
    let (rows, cols) = (mat.nrows(), mat.ncols());
    Tensor::from_fn(&[rows, cols], |idx| mat[(idx[0], idx[1])])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_faer_mat_column_major() {
        let t: Tensor<f64> = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let mat = t.as_faer_mat(2, 3);
        assert_eq!(mat[(1, 0)], 2.0);
        assert_eq!(mat[(0, 1)], 3.0);
    }

    #[test]
    fn test_as_faer_mat_mut_writes_through() {
        let mut t: Tensor<f64> = Tensor::zeros(&[2, 2]);
        {
            let mut mat = t.as_faer_mat_mut(2, 2);
            mat[(0, 1)] = 7.0;
        }
        assert_eq!(t.get(&[0, 1]), Some(&7.0));
    }

    #[test]
    fn test_tensor_from_faer_mat() {
        let t: Tensor<f64> = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let back = tensor_from_faer_mat(t.as_faer_mat(2, 2));
        assert_eq!(back, t);
    }

    #[test]
    #[should_panic]
    fn test_as_faer_mat_wrong_size_panics() {
        let t: Tensor<f64> = Tensor::zeros(&[2, 3]);
        let _ = t.as_faer_mat(2, 2);
    }
}
