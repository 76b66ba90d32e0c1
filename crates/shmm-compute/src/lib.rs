//! `shmm-compute` - the pure parts of the shared-memory multiplier.
//!
//! - `partition`: split N rows into P equal, contiguous row bands
//! - `worker`: compute one band of `C = A @ B` into a caller-provided slice
//! - `matrix`: operand initialisation, a reference product, and text output
//!
//! Nothing here touches shared memory or processes; callers hand in plain
//! slices.

pub mod error;
pub mod matrix;
pub mod partition;
pub mod worker;

pub use error::{ComputeError, Result};
pub use matrix::{fill, format_matrix, reference_matmul};
pub use partition::{matrix_bytes, partition, Band};
