//! Storage types for tensor data.
//!
//! ```text
//! Dense<T>
//! └── CpuBuffer<T>  - reference-counted Vec<T>, copied on first write
//! ```
//!
//! Recorded graph steps keep the operand and output values alive for the
//! backward pass, so cloning a tensor must be cheap. Storage is shared
//! between clones and views until one of them is mutated.

mod buffer;
mod dense;

pub use buffer::CpuBuffer;
pub use dense::Dense;
