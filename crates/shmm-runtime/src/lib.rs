//! `shmm-runtime` - runs a shared-memory matrix multiplication.
//!
//! The [`Orchestrator`] allocates the operand and result regions, fills the
//! operands, starts one worker per row band (forked processes or scoped
//! threads), joins them all, and destroys the regions. Timing covers only
//! the span between the first spawn and the last join.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod process;

pub use config::{Isolation, Operands, RunConfig};
pub use error::{Result, RuntimeError};
pub use orchestrator::{Orchestrator, Phase, RunReport};
pub use process::{WorkerExit, WorkerFailure};
