use std::fmt;
use std::mem;
use std::ops::Range;

use crate::error::{RegionError, Result};

/// Fixed key identifying a shared region across process address spaces.
///
/// Any process on the host that uses the same key refers to the same
/// region. Nothing arbitrates between unrelated programs picking the same
/// key; callers that need isolation pick distinct keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionId(pub i32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Well-known key of the operand A region.
pub const OPERAND_A: RegionId = RegionId(0x1234);
/// Well-known key of the operand B region.
pub const OPERAND_B: RegionId = RegionId(0x5678);
/// Well-known key of the result C region.
pub const RESULT_C: RegionId = RegionId(0x9ABC);

/// The three region keys a multiplication run needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionKeys {
    pub a: RegionId,
    pub b: RegionId,
    pub c: RegionId,
}

impl Default for RegionKeys {
    fn default() -> Self {
        Self {
            a: OPERAND_A,
            b: OPERAND_B,
            c: RESULT_C,
        }
    }
}

impl RegionKeys {
    /// Keys derived from the current process id and a caller-chosen salt.
    ///
    /// Two processes get different keys unless their pids agree in the low
    /// 14 bits; two salts within one process never collide (salt is taken
    /// modulo 4096).
    pub fn per_process(salt: u16) -> Self {
        let pid = (std::process::id() & 0x3fff) as i32;
        let salt = (salt & 0x0fff) as i32;
        let base = 0x4000_0000 | (pid << 14) | (salt << 2);
        Self {
            a: RegionId(base),
            b: RegionId(base + 1),
            c: RegionId(base + 2),
        }
    }

    pub fn as_array(&self) -> [RegionId; 3] {
        [self.a, self.b, self.c]
    }
}

/// Creates or looks up shared regions by key.
pub trait RegionAllocator {
    type Region: SharedRegion;

    /// Short backend name for diagnostics (e.g. "sysv", "mmap").
    fn name(&self) -> &str;

    /// Create the region `id` with `byte_size` bytes, or reuse an existing
    /// region of that key if its size is compatible.
    fn allocate(&self, id: RegionId, byte_size: usize) -> Result<Self::Region>;

    /// Look up an existing region without creating it.
    fn open(&self, id: RegionId, byte_size: usize) -> Result<Self::Region>;
}

/// Handle to a region that can be mapped into the calling process.
pub trait SharedRegion {
    type Mapping: Mapping;

    fn id(&self) -> RegionId;

    fn byte_size(&self) -> usize;

    /// Map the region into this process. Every attach of the same region,
    /// from any process, refers to the same physical storage.
    fn attach(&self) -> Result<Self::Mapping>;

    /// Mark the region for reclamation. Mappings that are still attached
    /// stay valid until they are detached.
    fn destroy(self) -> Result<()>;
}

/// A region mapped into the calling process. Dropping it detaches.
pub trait Mapping {
    fn region_id(&self) -> RegionId;

    fn as_ptr(&self) -> *const u8;

    fn as_mut_ptr(&mut self) -> *mut u8;

    /// Mapped length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unmap from this process only. Other attachers are unaffected.
    fn detach(self) -> Result<()>;

    /// View the mapping as `f64` values.
    ///
    /// # Safety
    /// No other process or thread may write the region while the returned
    /// slice is alive.
    unsafe fn as_f64_slice(&self) -> Result<&[f64]> {
        let len = check_f64_layout(self.region_id(), self.as_ptr(), self.len())?;
        Ok(std::slice::from_raw_parts(self.as_ptr() as *const f64, len))
    }

    /// Mutable `f64` view of the whole mapping.
    ///
    /// # Safety
    /// No other process or thread may access the region while the returned
    /// slice is alive.
    unsafe fn as_f64_slice_mut(&mut self) -> Result<&mut [f64]> {
        let len = check_f64_layout(self.region_id(), self.as_ptr(), self.len())?;
        self.f64_range_mut(0..len)
    }

    /// Mutable view of the `f64` elements in `range` only.
    ///
    /// # Safety
    /// No other process or thread may access elements in `range` while the
    /// returned slice is alive. Elements outside `range` may be written
    /// concurrently by others.
    unsafe fn f64_range_mut(&mut self, range: Range<usize>) -> Result<&mut [f64]> {
        let id = self.region_id();
        let len = check_f64_layout(id, self.as_ptr(), self.len())?;
        if range.start > range.end || range.end > len {
            return Err(RegionError::Layout {
                id,
                reason: format!("element range {:?} outside 0..{}", range, len),
            });
        }
        let base = self.as_mut_ptr() as *mut f64;
        Ok(std::slice::from_raw_parts_mut(
            base.add(range.start),
            range.end - range.start,
        ))
    }
}

/// Returns the number of `f64` elements the mapping holds.
fn check_f64_layout(id: RegionId, ptr: *const u8, len: usize) -> Result<usize> {
    if len % mem::size_of::<f64>() != 0 {
        return Err(RegionError::Layout {
            id,
            reason: format!("length {} is not a multiple of 8", len),
        });
    }
    if (ptr as usize) % mem::align_of::<f64>() != 0 {
        return Err(RegionError::Layout {
            id,
            reason: format!("address {:p} is not 8-byte aligned", ptr),
        });
    }
    Ok(len / mem::size_of::<f64>())
}

/// Owns a region and destroys it when dropped.
///
/// Use [`RegionGuard::release`] on the normal path to observe destroy
/// errors; the drop path only logs them.
pub struct RegionGuard<R: SharedRegion> {
    region: Option<R>,
}

impl<R: SharedRegion> RegionGuard<R> {
    pub fn new(region: R) -> Self {
        Self {
            region: Some(region),
        }
    }

    pub fn region(&self) -> &R {
        match &self.region {
            Some(r) => r,
            None => unreachable!("region guard accessed after release"),
        }
    }

    /// Destroy the region now.
    pub fn release(mut self) -> Result<()> {
        match self.region.take() {
            Some(r) => r.destroy(),
            None => Ok(()),
        }
    }
}

impl<R: SharedRegion> Drop for RegionGuard<R> {
    fn drop(&mut self) {
        if let Some(region) = self.region.take() {
            let id = region.id();
            log::debug!("destroying region {} on drop", id);
            if let Err(e) = region.destroy() {
                log::warn!("region {} leaked: {}", id, e);
            }
        }
    }
}
