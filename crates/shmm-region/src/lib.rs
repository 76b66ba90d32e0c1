//! `shmm-region` - shared memory regions for the shmm multiplier.
//!
//! This crate provides:
//! - `RegionId`/`RegionKeys`: fixed keys naming the operand and result regions
//! - The `RegionAllocator`, `SharedRegion` and `Mapping` traits
//!   (allocate / attach / detach / destroy)
//! - `RegionGuard`, which destroys a region on every exit path
//! - A System V backend and a memory-mapped file backend

pub mod error;
pub mod mmap;
pub mod region;
pub mod sysv;

pub use error::{RegionError, Result};
pub use mmap::{MmapAllocator, MmapMapping, MmapRegion};
pub use region::{
    Mapping, RegionAllocator, RegionGuard, RegionId, RegionKeys, SharedRegion, OPERAND_A,
    OPERAND_B, RESULT_C,
};
pub use sysv::{SysvAllocator, SysvMapping, SysvRegion};
