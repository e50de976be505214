//! ndtape - dynamic reverse-mode automatic differentiation over dense tensors.
//!
//! Every [`Node`] records the operations applied to it on a tape. A backward
//! pass walks the tape in reverse and routes gradients to every node the
//! result depends on, including nodes created by branching, splitting and
//! parallel fan-out.
//!
//! # Architecture
//!
//! ```text
//! Graph (arena behind a mutex)
//! ├── Node      seed, per-engine tape, gradient, priority, accumulation mode
//! ├── Edge      one recorded step: op, inputs, output, operand gradients
//! ├── SplitGroup  siblings of one split; concatenates their gradients
//! └── BranchTracker  pending branches and deferred low-priority nodes
//!
//! Executor (graph::backward)  reverse traversal, branch pulls, split combines
//! ops::Op                     forward and backward formula of each primitive
//! operations                  dense kernels (faer matmul, rayon elementwise)
//! ```
//!
//! # Example
//!
//! ```
//! use ndtape::{Graph, Tensor};
//!
//! let graph = Graph::new();
//! let x = graph.leaf(Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]).unwrap());
//!
//! // y = x + branch(x), the branch being squared first.
//! let b = x.branch();
//! b.square().unwrap();
//! x.add(&b).unwrap();
//! x.sum_all().unwrap();
//!
//! let grad = x.back(Tensor::scalar(1.0)).unwrap();
//! assert_eq!(grad.data(), &[3.0, 5.0, 7.0]);
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod operations;
pub mod ops;
pub mod optim;
pub mod random;
pub mod scalar;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use config::{AccumulationMode, GraphConfig, Priority};
pub use error::{GraphError, TensorError};
pub use graph::{BackwardState, Edge, EdgeId, EngineId, Graph, Input, Node, NodeId, ParallelTask};
pub use ops::Op;
pub use optim::{Adam, AdamConfig, DampedAdam, Optimizer};
pub use random::RandomScalar;
pub use scalar::Scalar;
pub use storage::Dense;
pub use tensor::Tensor;
