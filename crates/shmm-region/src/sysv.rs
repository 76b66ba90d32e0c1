//! System V shared memory (`shmget`/`shmat`) backend.

use std::io;
use std::ptr::{self, NonNull};

use crate::error::{RegionError, Result};
use crate::region::{Mapping, RegionAllocator, RegionId, SharedRegion};

const PERMISSIONS: libc::c_int = 0o666;

/// Allocates System V segments keyed by [`RegionId`].
///
/// Allocation does not use `IPC_EXCL`: a segment left behind under the same
/// key is reused only when its size matches exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvAllocator;

impl SysvAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl RegionAllocator for SysvAllocator {
    type Region = SysvRegion;

    fn name(&self) -> &str {
        "sysv"
    }

    fn allocate(&self, id: RegionId, byte_size: usize) -> Result<SysvRegion> {
        let shmid = unsafe {
            libc::shmget(id.0 as libc::key_t, byte_size, libc::IPC_CREAT | PERMISSIONS)
        };
        if shmid < 0 {
            return Err(RegionError::Allocation {
                id,
                size: byte_size,
                source: io::Error::last_os_error(),
            });
        }
        let existing = segment_size(shmid).map_err(|source| RegionError::Allocation {
            id,
            size: byte_size,
            source,
        })?;
        if existing != byte_size {
            return Err(RegionError::Allocation {
                id,
                size: byte_size,
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("existing segment holds {} bytes", existing),
                ),
            });
        }
        log::debug!("sysv: region {} -> shmid {} ({} bytes)", id, shmid, byte_size);
        Ok(SysvRegion {
            id,
            shmid,
            size: byte_size,
        })
    }

    fn open(&self, id: RegionId, byte_size: usize) -> Result<SysvRegion> {
        let shmid = unsafe { libc::shmget(id.0 as libc::key_t, byte_size, 0) };
        if shmid < 0 {
            let source = io::Error::last_os_error();
            return Err(if source.raw_os_error() == Some(libc::ENOENT) {
                RegionError::NotFound { id, source }
            } else {
                RegionError::Attach { id, source }
            });
        }
        Ok(SysvRegion {
            id,
            shmid,
            size: byte_size,
        })
    }
}

/// Size in bytes of an existing segment (`IPC_STAT`).
fn segment_size(shmid: libc::c_int) -> io::Result<usize> {
    let mut stat: libc::shmid_ds = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::shmctl(shmid, libc::IPC_STAT, &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.shm_segsz as usize)
}

/// A System V segment identified by its `shmid`.
#[derive(Debug)]
pub struct SysvRegion {
    id: RegionId,
    shmid: libc::c_int,
    size: usize,
}

impl SysvRegion {
    pub fn shmid(&self) -> libc::c_int {
        self.shmid
    }
}

impl SharedRegion for SysvRegion {
    type Mapping = SysvMapping;

    fn id(&self) -> RegionId {
        self.id
    }

    fn byte_size(&self) -> usize {
        self.size
    }

    fn attach(&self) -> Result<SysvMapping> {
        let addr = unsafe { libc::shmat(self.shmid, ptr::null(), 0) };
        if addr as isize == -1 {
            return Err(RegionError::Attach {
                id: self.id,
                source: io::Error::last_os_error(),
            });
        }
        let ptr = NonNull::new(addr as *mut u8).ok_or_else(|| RegionError::Attach {
            id: self.id,
            source: io::Error::new(io::ErrorKind::Other, "shmat returned null"),
        })?;
        Ok(SysvMapping {
            id: self.id,
            ptr,
            len: self.size,
        })
    }

    fn destroy(self) -> Result<()> {
        let rc = unsafe { libc::shmctl(self.shmid, libc::IPC_RMID, ptr::null_mut()) };
        if rc != 0 {
            return Err(RegionError::Destroy {
                id: self.id,
                source: io::Error::last_os_error(),
            });
        }
        log::debug!("sysv: region {} (shmid {}) marked for removal", self.id, self.shmid);
        Ok(())
    }
}

/// A segment attached with `shmat`.
#[derive(Debug)]
pub struct SysvMapping {
    id: RegionId,
    ptr: NonNull<u8>,
    len: usize,
}

impl SysvMapping {
    fn shmdt(&self) -> Result<()> {
        let rc = unsafe { libc::shmdt(self.ptr.as_ptr() as *const libc::c_void) };
        if rc != 0 {
            return Err(RegionError::Detach {
                id: self.id,
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

impl Mapping for SysvMapping {
    fn region_id(&self) -> RegionId {
        self.id
    }

    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn detach(self) -> Result<()> {
        let result = self.shmdt();
        std::mem::forget(self);
        result
    }
}

impl Drop for SysvMapping {
    fn drop(&mut self) {
        if let Err(e) = self.shmdt() {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionGuard, RegionKeys};

    const SIZE: usize = 4 * 4 * 8;

    #[test]
    fn test_attachments_share_storage() {
        let id = RegionKeys::per_process(0x100).a;
        let region = SysvAllocator.allocate(id, SIZE).unwrap();

        let mut writer = region.attach().unwrap();
        let reader = region.attach().unwrap();
        assert_ne!(writer.as_ptr(), std::ptr::null());

        unsafe {
            writer.as_f64_slice_mut().unwrap()[5] = 42.0;
            assert_eq!(reader.as_f64_slice().unwrap()[5], 42.0);
            assert_eq!(reader.as_f64_slice().unwrap().len(), 16);
        }

        writer.detach().unwrap();
        reader.detach().unwrap();
        region.destroy().unwrap();
    }

    #[test]
    fn test_destroyed_region_cannot_be_opened() {
        let id = RegionKeys::per_process(0x101).a;
        let region = SysvAllocator.allocate(id, SIZE).unwrap();
        let mapping = region.attach().unwrap();
        mapping.detach().unwrap();
        region.destroy().unwrap();

        let err = SysvAllocator.open(id, SIZE).unwrap_err();
        assert!(matches!(err, RegionError::NotFound { .. }));
    }

    #[test]
    fn test_open_finds_allocated_region() {
        let id = RegionKeys::per_process(0x102).b;
        let region = SysvAllocator.allocate(id, SIZE).unwrap();
        let again = SysvAllocator.open(id, SIZE).unwrap();
        assert_eq!(again.shmid(), region.shmid());
        region.destroy().unwrap();
    }

    #[test]
    fn test_incompatible_size_fails() {
        let id = RegionKeys::per_process(0x103).c;
        let region = SysvAllocator.allocate(id, SIZE).unwrap();
        let err = SysvAllocator.allocate(id, SIZE * 1024).unwrap_err();
        assert!(matches!(err, RegionError::Allocation { .. }));
        region.destroy().unwrap();
    }

    #[test]
    fn test_larger_leftover_is_not_reused() {
        let id = RegionKeys::per_process(0x106).a;
        let leftover = SysvAllocator.allocate(id, 4096).unwrap();
        let mut mapping = leftover.attach().unwrap();
        unsafe { mapping.as_f64_slice_mut().unwrap()[0] = 99.0 };

        let err = SysvAllocator.allocate(id, SIZE).unwrap_err();
        assert!(matches!(err, RegionError::Allocation { size: SIZE, .. }));

        mapping.detach().unwrap();
        leftover.destroy().unwrap();
    }

    #[test]
    fn test_same_size_leftover_is_reused() {
        let id = RegionKeys::per_process(0x107).a;
        let first = SysvAllocator.allocate(id, SIZE).unwrap();
        let second = SysvAllocator.allocate(id, SIZE).unwrap();
        assert_eq!(first.shmid(), second.shmid());
        first.destroy().unwrap();
    }

    #[test]
    fn test_guard_destroys_on_drop() {
        let id = RegionKeys::per_process(0x104).a;
        {
            let guard = RegionGuard::new(SysvAllocator.allocate(id, SIZE).unwrap());
            assert_eq!(guard.region().byte_size(), SIZE);
        }
        assert!(SysvAllocator.open(id, SIZE).is_err());
    }

    #[test]
    fn test_mapping_survives_destroy_until_detached() {
        let id = RegionKeys::per_process(0x105).a;
        let region = SysvAllocator.allocate(id, SIZE).unwrap();
        let mut mapping = region.attach().unwrap();
        region.destroy().unwrap();

        unsafe {
            let values = mapping.as_f64_slice_mut().unwrap();
            values[0] = 1.5;
            assert_eq!(values[0], 1.5);
        }
        mapping.detach().unwrap();
    }
}
