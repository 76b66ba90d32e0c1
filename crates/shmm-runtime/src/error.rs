use std::io;

use thiserror::Error;

use shmm_compute::ComputeError;
use shmm_region::RegionError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("failed to spawn worker {worker}: {source}")]
    Spawn { worker: usize, source: io::Error },
    #[error("failed to wait for workers: {source}")]
    Wait { source: io::Error },
}

impl RuntimeError {
    /// True for failures detected before any region was allocated.
    pub fn is_configuration(&self) -> bool {
        matches!(self, RuntimeError::Compute(_))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
