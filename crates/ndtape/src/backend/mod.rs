//! Backend glue for dense kernels.
//!
//! Only the CPU path exists: tensors are column-major `Vec`s, which faer can
//! view as matrices without copying. `faer_interop` holds those views; the
//! kernels in `operations` use them for matrix products.

mod faer_interop;

pub use faer_interop::{AsFaerMat, tensor_from_faer_mat};
