//! Copy-on-write CPU buffer.

use crate::scalar::Scalar;
use std::sync::Arc;

/// CPU data buffer backed by a shared `Vec<T>`.
///
/// Clones share the allocation; the first mutable access on a shared buffer
/// copies it (`Arc::make_mut`). Buffers are `Send + Sync`, so recorded values
/// can cross into worker-pool tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer<T: Scalar> {
    data: Arc<Vec<T>>,
}

impl<T: Scalar> CpuBuffer<T> {
    /// Create buffer with given length, zero-initialized.
    #[inline]
    pub fn zeros(len: usize) -> Self {
        Self {
            data: Arc::new(vec![T::zero(); len]),
        }
    }

    /// Create buffer from existing vector (takes ownership).
    #[inline]
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// Length of buffer (number of elements).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get immutable slice of data.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Get mutable slice of data, detaching from other owners first.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Another handle to the same allocation.
    #[inline]
    pub fn view(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    /// Whether both buffers point at the same allocation.
    #[inline]
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Whether other handles to this allocation exist.
    #[inline]
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    /// Consume the buffer and return the data, copying only if shared.
    pub fn into_vec(self) -> Vec<T> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_buffer_zeros() {
        let buf: CpuBuffer<f64> = CpuBuffer::zeros(5);
        assert_eq!(buf.len(), 5);
        assert!(!buf.is_empty());
        assert!(buf.as_slice().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_view_shares_until_write() {
        let buf = CpuBuffer::from_vec(vec![1.0, 2.0, 3.0]);
        let mut view = buf.view();
        assert!(buf.shares_storage_with(&view));
        assert!(buf.is_shared());

        view.as_mut_slice()[0] = 10.0;

        assert!(!buf.shares_storage_with(&view));
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(view.as_slice(), &[10.0, 2.0, 3.0]);
    }

    #[test]
    fn test_into_vec_shared_copies() {
        let buf = CpuBuffer::from_vec(vec![1.0f32, 2.0]);
        let view = buf.view();
        assert_eq!(buf.into_vec(), vec![1.0, 2.0]);
        assert_eq!(view.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_cpu_buffer_empty() {
        let buf: CpuBuffer<f64> = CpuBuffer::zeros(0);
        assert!(buf.is_empty());
    }
}
