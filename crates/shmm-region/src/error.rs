use std::io;

use thiserror::Error;

use crate::region::RegionId;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("failed to allocate region {id} ({size} bytes): {source}")]
    Allocation {
        id: RegionId,
        size: usize,
        source: io::Error,
    },
    #[error("region {id} does not exist: {source}")]
    NotFound { id: RegionId, source: io::Error },
    #[error("failed to attach region {id}: {source}")]
    Attach { id: RegionId, source: io::Error },
    #[error("failed to detach region {id}: {source}")]
    Detach { id: RegionId, source: io::Error },
    #[error("failed to destroy region {id}: {source}")]
    Destroy { id: RegionId, source: io::Error },
    #[error("region {id} cannot be viewed as f64: {reason}")]
    Layout { id: RegionId, reason: String },
}

impl RegionError {
    /// The id of the region the failure refers to.
    pub fn id(&self) -> RegionId {
        match self {
            RegionError::Allocation { id, .. }
            | RegionError::NotFound { id, .. }
            | RegionError::Attach { id, .. }
            | RegionError::Detach { id, .. }
            | RegionError::Destroy { id, .. }
            | RegionError::Layout { id, .. } => *id,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegionError>;
