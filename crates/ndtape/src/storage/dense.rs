//! Dense storage for tensor data.

use super::buffer::CpuBuffer;
use crate::scalar::Scalar;

/// Dense storage - contiguous array of elements in column-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense<ElT: Scalar> {
    buffer: CpuBuffer<ElT>,
}

impl<ElT: Scalar> Dense<ElT> {
    /// Create dense storage with given length, zero-initialized.
    pub fn zeros(len: usize) -> Self {
        Self {
            buffer: CpuBuffer::zeros(len),
        }
    }

    /// Create dense storage from existing vector (takes ownership).
    pub fn from_vec(data: Vec<ElT>) -> Self {
        Self {
            buffer: CpuBuffer::from_vec(data),
        }
    }

    /// Length of storage.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[ElT] {
        self.buffer.as_slice()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [ElT] {
        self.buffer.as_mut_slice()
    }

    /// Storage sharing the same buffer (zero-copy).
    #[inline]
    pub fn view(&self) -> Self {
        Self {
            buffer: self.buffer.view(),
        }
    }

    /// Underlying buffer.
    #[inline]
    pub fn buffer(&self) -> &CpuBuffer<ElT> {
        &self.buffer
    }

    pub fn into_vec(self) -> Vec<ElT> {
        self.buffer.into_vec()
    }
}

impl<ElT: Scalar> std::ops::Index<usize> for Dense<ElT> {
    type Output = ElT;

    #[inline]
    fn index(&self, i: usize) -> &ElT {
        &self.buffer.as_slice()[i]
    }
}

impl<ElT: Scalar> std::ops::IndexMut<usize> for Dense<ElT> {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut ElT {
        &mut self.buffer.as_mut_slice()[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let d: Dense<f64> = Dense::zeros(5);
        assert_eq!(d.len(), 5);
        assert!(!d.is_empty());
        for i in 0..5 {
            assert_eq!(d[i], 0.0);
        }
    }

    #[test]
    fn test_index_mut_detaches_view() {
        let mut d = Dense::from_vec(vec![1.0, 2.0, 3.0]);
        let v = d.view();
        d[1] = 5.0;
        assert_eq!(d[1], 5.0);
        assert_eq!(v[1], 2.0);
    }
}
