//! Dense n-dimensional tensor.
//!
//! This is the value type that flows through the graph: node seeds, current
//! values, edge outputs and every gradient. Clones and reshapes share
//! storage, so recording a value on the tape does not copy it.

use crate::error::TensorError;
use crate::scalar::Scalar;
use crate::shape::{cartesian_to_linear, check_same_shape, compute_strides, for_each_index, numel};
use crate::storage::Dense;

/// A dense n-dimensional tensor in column-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<ElT: Scalar> {
    storage: Dense<ElT>,
    shape: Vec<usize>,
    strides: Vec<usize>,
}

impl<ElT: Scalar> Tensor<ElT> {
    /// Create a new tensor with the given shape, zero-initialized.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndtape::Tensor;
    ///
    /// let t: Tensor<f64> = Tensor::zeros(&[2, 3, 4]);
    /// assert_eq!(t.shape(), &[2, 3, 4]);
    /// assert_eq!(t.len(), 24);
    /// ```
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            storage: Dense::zeros(numel(shape)),
            shape: shape.to_vec(),
            strides: compute_strides(shape),
        }
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, ElT::one())
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: &[usize], value: ElT) -> Self {
        Self {
            storage: Dense::from_vec(vec![value; numel(shape)]),
            shape: shape.to_vec(),
            strides: compute_strides(shape),
        }
    }

    /// A one-element tensor of shape `[1]`.
    pub fn scalar(value: ElT) -> Self {
        Self::full(&[1], value)
    }

    /// Square identity matrix.
    pub fn eye(n: usize) -> Self {
        let mut t = Self::zeros(&[n, n]);
        let data = t.data_mut();
        for i in 0..n {
            data[i + i * n] = ElT::one();
        }
        t
    }

    /// Create tensor from data and shape.
    ///
    /// Data is expected to be in column-major order.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::LengthMismatch` if data length doesn't match shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndtape::Tensor;
    ///
    /// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// assert_eq!(t.get(&[1, 0]), Some(&2.0)); // column-major
    /// assert_eq!(t.get(&[0, 1]), Some(&3.0));
    /// ```
    pub fn from_vec(data: Vec<ElT>, shape: &[usize]) -> Result<Self, TensorError> {
        let expected = numel(shape);
        if data.len() != expected {
            return Err(TensorError::LengthMismatch {
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            storage: Dense::from_vec(data),
            shape: shape.to_vec(),
            strides: compute_strides(shape),
        })
    }

    /// Build a tensor by evaluating `f` at every cartesian index.
    pub fn from_fn(shape: &[usize], mut f: impl FnMut(&[usize]) -> ElT) -> Self {
        let mut data = Vec::with_capacity(numel(shape));
        for_each_index(shape, |idx| data.push(f(idx)));
        Self {
            storage: Dense::from_vec(data),
            shape: shape.to_vec(),
            strides: compute_strides(shape),
        }
    }

    /// A zero tensor with the same shape as `self`.
    pub fn zeros_like(&self) -> Self {
        Self::zeros(&self.shape)
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Rank (number of dimensions).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[inline]
    pub fn data(&self) -> &[ElT] {
        self.storage.as_slice()
    }

    /// Mutable data; detaches from any tensor sharing this storage.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [ElT] {
        self.storage.as_mut_slice()
    }

    /// Consume the tensor and return its data.
    pub fn into_vec(self) -> Vec<ElT> {
        self.storage.into_vec()
    }

    #[inline]
    pub fn get_linear(&self, i: usize) -> Option<&ElT> {
        self.storage.as_slice().get(i)
    }

    /// Get element by cartesian indices.
    ///
    /// Returns `None` if indices are out of bounds or wrong number of indices.
    pub fn get(&self, indices: &[usize]) -> Option<&ElT> {
        if indices.len() != self.ndim() {
            return None;
        }
        if indices.iter().zip(&self.shape).any(|(&idx, &dim)| idx >= dim) {
            return None;
        }
        self.get_linear(cartesian_to_linear(indices, &self.strides))
    }

    /// Set element by cartesian indices.
    pub fn set(&mut self, indices: &[usize], value: ElT) -> Result<(), TensorError> {
        if indices.len() != self.ndim() {
            return Err(TensorError::WrongNumberOfIndices {
                expected: self.ndim(),
                actual: indices.len(),
            });
        }
        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return Err(TensorError::IndexOutOfBounds {
                    index: idx,
                    dim_size: dim,
                });
            }
        }
        let linear = cartesian_to_linear(indices, &self.strides);
        self.storage.as_mut_slice()[linear] = value;
        Ok(())
    }

    /// Fill all elements with a value.
    pub fn fill(&mut self, value: ElT) {
        self.data_mut().fill(value);
    }

    /// Reshape the tensor to a new shape (zero-copy view).
    ///
    /// # Example
    ///
    /// ```
    /// use ndtape::Tensor;
    ///
    /// let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
    /// let t3x2 = t.reshape(&[3, 2]).unwrap();
    /// assert_eq!(t3x2.shape(), &[3, 2]);
    /// assert!(t.shares_storage_with(&t3x2));
    /// ```
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self, TensorError> {
        if numel(new_shape) != self.len() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                actual: new_shape.to_vec(),
            });
        }
        Ok(Self {
            storage: self.storage.view(),
            shape: new_shape.to_vec(),
            strides: compute_strides(new_shape),
        })
    }

    /// Check if this tensor shares storage with another tensor.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        self.storage
            .buffer()
            .shares_storage_with(other.storage.buffer())
    }

    /// Permute the dimensions of the tensor.
    ///
    /// `perm[i]` gives the source dimension for the i-th dimension of the result.
    pub fn permutedims(&self, perm: &[usize]) -> Result<Self, TensorError> {
        crate::operations::permutedims(self, perm)
    }

    /// Elementwise `self += other`.
    ///
    /// Gradient accumulation goes through here, so shapes must match exactly.
    pub fn add_assign(&mut self, other: &Self) -> Result<(), TensorError> {
        check_same_shape(&self.shape, &other.shape)?;
        for (x, &y) in self.data_mut().iter_mut().zip(other.data()) {
            *x += y;
        }
        Ok(())
    }

    /// Largest absolute elementwise difference, for tolerance checks.
    pub fn max_abs_diff(&self, other: &Self) -> Result<ElT, TensorError> {
        check_same_shape(&self.shape, &other.shape)?;
        Ok(self
            .data()
            .iter()
            .zip(other.data())
            .fold(ElT::zero(), |acc, (&a, &b)| acc.max((a - b).abs())))
    }
}

/// Add `grad` into an optional accumulator, initialising it on first use.
pub(crate) fn accumulate<ElT: Scalar>(
    slot: &mut Option<Tensor<ElT>>,
    grad: &Tensor<ElT>,
) -> Result<(), TensorError> {
    match slot {
        Some(existing) => existing.add_assign(grad),
        None => {
            *slot = Some(grad.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_zeros_generic<T: Scalar>() {
        let t: Tensor<T> = Tensor::zeros(&[2, 3]);
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.ndim(), 2);
        assert_eq!(t.len(), 6);
        assert_eq!(t.strides(), &[1, 2]);
        for i in 0..6 {
            assert_eq!(*t.get_linear(i).unwrap(), T::zero());
        }
    }

    #[test]
    fn test_zeros_f64() {
        test_zeros_generic::<f64>();
    }

    #[test]
    fn test_zeros_f32() {
        test_zeros_generic::<f32>();
    }

    #[test]
    fn test_from_vec_column_major() {
        let t: Tensor<f64> = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(t.get(&[0, 0]), Some(&1.0));
        assert_eq!(t.get(&[1, 0]), Some(&2.0));
        assert_eq!(t.get(&[0, 1]), Some(&3.0));
        assert_eq!(t.get(&[1, 2]), Some(&6.0));
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        let result = Tensor::<f64>::from_vec(vec![1.0, 2.0, 3.0], &[2, 3]);
        assert!(matches!(
            result,
            Err(TensorError::LengthMismatch {
                expected: 6,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_get_out_of_bounds() {
        let t: Tensor<f64> = Tensor::zeros(&[2, 3]);
        assert_eq!(t.get(&[2, 0]), None);
        assert_eq!(t.get(&[0, 3]), None);
        assert_eq!(t.get(&[0]), None);
    }

    #[test]
    fn test_set_and_fill() {
        let mut t: Tensor<f64> = Tensor::zeros(&[2, 3]);
        t.set(&[1, 2], 42.0).unwrap();
        assert_eq!(t.get(&[1, 2]), Some(&42.0));
        assert!(t.set(&[2, 0], 1.0).is_err());
        t.fill(5.0);
        assert!(t.data().iter().all(|&x| x == 5.0));
    }

    #[test]
    fn test_rank0_holds_one_element() {
        let t: Tensor<f64> = Tensor::zeros(&[]);
        assert_eq!(t.ndim(), 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_eye() {
        let t: Tensor<f64> = Tensor::eye(2);
        assert_eq!(t.data(), &[1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_from_fn() {
        let t: Tensor<f64> = Tensor::from_fn(&[2, 2], |idx| (idx[0] * 10 + idx[1]) as f64);
        assert_eq!(t.get(&[1, 0]), Some(&10.0));
        assert_eq!(t.get(&[0, 1]), Some(&1.0));
    }

    #[test]
    fn test_reshape_copy_on_write() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let mut t1d = t.reshape(&[6]).unwrap();
        assert!(t.shares_storage_with(&t1d));

        t1d.set(&[0], 100.0).unwrap();

        assert!(!t.shares_storage_with(&t1d));
        assert_eq!(*t.get_linear(0).unwrap(), 1.0);
        assert_eq!(*t1d.get_linear(0).unwrap(), 100.0);
    }

    #[test]
    fn test_reshape_invalid_size() {
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert!(t.reshape(&[5]).is_err());
        assert!(t.reshape(&[2, 2]).is_err());
    }

    #[test]
    fn test_add_assign_checks_shape() {
        let mut a: Tensor<f64> = Tensor::ones(&[2]);
        let b = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        a.add_assign(&b).unwrap();
        assert_eq!(a.data(), &[2.0, 3.0]);

        let c: Tensor<f64> = Tensor::ones(&[3]);
        assert!(a.add_assign(&c).is_err());
    }

    #[test]
    fn test_accumulate_initialises_slot() {
        let mut slot: Option<Tensor<f64>> = None;
        let g = Tensor::ones(&[2]);
        accumulate(&mut slot, &g).unwrap();
        accumulate(&mut slot, &g).unwrap();
        assert_eq!(slot.unwrap().data(), &[2.0, 2.0]);
    }
}
