//! Error types for ndtape.

use crate::graph::NodeId;
use thiserror::Error;

/// Errors raised by tensor kernels and primitive operators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// Operand shapes are incompatible.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Data length does not match the number of elements implied by a shape.
    #[error("length mismatch: shape {shape:?} needs {expected} elements, got {actual}")]
    LengthMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Axis is out of range for the tensor rank.
    #[error("invalid axis {axis} for tensor of rank {ndim}")]
    InvalidAxis { axis: usize, ndim: usize },

    /// Axis length is not a multiple of the requested group size.
    #[error("axis {axis} has length {len}, which is not divisible by group size {group_size}")]
    NotDivisible {
        axis: usize,
        len: usize,
        group_size: usize,
    },

    /// Index out of bounds.
    #[error("index out of bounds: index {index} is out of range for dimension {dim_size}")]
    IndexOutOfBounds { index: usize, dim_size: usize },

    /// Wrong number of indices provided.
    #[error("wrong number of indices: expected {expected}, got {actual}")]
    WrongNumberOfIndices { expected: usize, actual: usize },

    /// Invalid permutation.
    #[error("invalid permutation {perm:?} for tensor with {ndim} dimensions")]
    InvalidPermutation { perm: Vec<usize>, ndim: usize },

    /// Operation requires specific tensor rank.
    #[error("expected tensor of rank {expected}, got rank {actual}")]
    RankMismatch { expected: usize, actual: usize },

    /// Slice range out of bounds.
    #[error("slice range {start}..{end} out of bounds for dimension {dim} with size {size}")]
    SliceOutOfBounds {
        start: usize,
        end: usize,
        dim: usize,
        size: usize,
    },

    /// Operator received the wrong number of operands.
    #[error("operator {op} takes {expected} operand(s), got {actual}")]
    WrongArity {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Any other rejected argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors raised by the computation graph and the backward executor.
///
/// Structural errors carry the offending node so the caller can locate the
/// missing `branch()` call or the misused handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// A kernel precondition failed.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// `back` was requested without any upstream gradient.
    #[error("node {node} has no upstream gradient")]
    MissingUpstream { node: NodeId },

    /// A branch node was back-propagated directly instead of through its parent.
    #[error("node {node} is a branch of node {parent}; back-propagate the parent instead")]
    IllegalDirectBackOnBranch { node: NodeId, parent: NodeId },

    /// A branch recorded operations whose result never reached a back-propagated node.
    #[error("gradient for branch node {node} cannot be resolved; is a branch() call missing?")]
    UnresolvedBranchGradient { node: NodeId },

    /// A gradient was requested from a node that has none.
    #[error("node {node} has no gradient; call back() first")]
    NoGradient { node: NodeId },

    /// A node handle belonging to another graph was used as an operand.
    #[error("node {node} belongs to a different graph")]
    ForeignNode { node: NodeId },

    /// The node advanced while a forward step on it was being computed.
    #[error("node {node} was modified while a forward step was being recorded")]
    ConcurrentModification { node: NodeId },

    /// The dedicated worker pool could not be started.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_error_display() {
        let err = TensorError::NotDivisible {
            axis: 1,
            len: 5,
            group_size: 2,
        };
        assert_eq!(
            err.to_string(),
            "axis 1 has length 5, which is not divisible by group size 2"
        );
    }

    #[test]
    fn test_graph_error_wraps_tensor_error() {
        let err: GraphError = TensorError::InvalidAxis { axis: 3, ndim: 2 }.into();
        assert_eq!(err.to_string(), "invalid axis 3 for tensor of rank 2");
    }

    #[test]
    fn test_structural_error_names_node() {
        let err = GraphError::UnresolvedBranchGradient {
            node: NodeId::new_for_test(7),
        };
        assert!(err.to_string().contains("node #7"));
    }
}
