//! Tensor kernels.
//!
//! Everything here is a plain function from tensors to a new tensor. The
//! primitive operators in [`crate::ops`] compose these for both their
//! forward values and their gradient formulas:
//!
//! ```text
//! Op::forward / Op::backward
//!     → validate shapes
//!     → call kernel (elementwise, reduce, matmul, ...)
//!     → kernel allocates the output and fills it
//! ```

mod concat;
mod elementwise;
mod matmul;
mod permutedims;
mod reduce;
mod slice;

pub use concat::{concat, split_axis};
pub use elementwise::{map, map_par, scale, zip_map, zip_map_par};
pub use matmul::matmul;
pub use permutedims::{permutedims, permutedims_into, transpose};
pub use reduce::{broadcast_axis, sum_all, sum_axis};
pub use slice::{embed, slice};
