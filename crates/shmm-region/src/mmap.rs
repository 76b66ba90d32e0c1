//! Shared regions backed by memory-mapped files.
//!
//! Each key maps to one file inside a directory. On Linux the default
//! directory is `/dev/shm`, so the pages never touch a disk.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{RegionError, Result};
use crate::region::{Mapping, RegionAllocator, RegionId, SharedRegion};

#[derive(Debug, Clone)]
pub struct MmapAllocator {
    dir: PathBuf,
}

impl Default for MmapAllocator {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

impl MmapAllocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `/dev/shm` when present, otherwise the system temp directory.
    pub fn default_dir() -> PathBuf {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backing file for a region key.
    pub fn path_for(&self, id: RegionId) -> PathBuf {
        self.dir.join(format!("shmm-{:08x}", id.0 as u32))
    }
}

impl RegionAllocator for MmapAllocator {
    type Region = MmapRegion;

    fn name(&self) -> &str {
        "mmap"
    }

    fn allocate(&self, id: RegionId, byte_size: usize) -> Result<MmapRegion> {
        let alloc_err = |source| RegionError::Allocation {
            id,
            size: byte_size,
            source,
        };
        if byte_size == 0 {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "region size must be non-zero",
            )));
        }

        let path = self.path_for(id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(alloc_err)?;

        let existing = file.metadata().map_err(alloc_err)?.len();
        if existing != 0 && existing != byte_size as u64 {
            return Err(alloc_err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already holds {} bytes", path.display(), existing),
            )));
        }
        file.set_len(byte_size as u64).map_err(alloc_err)?;

        log::debug!("mmap: region {} -> {} ({} bytes)", id, path.display(), byte_size);
        Ok(MmapRegion {
            id,
            path,
            file,
            size: byte_size,
        })
    }

    fn open(&self, id: RegionId, byte_size: usize) -> Result<MmapRegion> {
        let path = self.path_for(id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    RegionError::NotFound { id, source }
                } else {
                    RegionError::Attach { id, source }
                }
            })?;

        let len = file
            .metadata()
            .map_err(|source| RegionError::Attach { id, source })?
            .len();
        if len < byte_size as u64 {
            return Err(RegionError::Attach {
                id,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("region holds {} bytes, {} requested", len, byte_size),
                ),
            });
        }

        Ok(MmapRegion {
            id,
            path,
            file,
            size: byte_size,
        })
    }
}

/// A region file together with an open descriptor for it.
#[derive(Debug)]
pub struct MmapRegion {
    id: RegionId,
    path: PathBuf,
    file: File,
    size: usize,
}

impl MmapRegion {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SharedRegion for MmapRegion {
    type Mapping = MmapMapping;

    fn id(&self) -> RegionId {
        self.id
    }

    fn byte_size(&self) -> usize {
        self.size
    }

    fn attach(&self) -> Result<MmapMapping> {
        // File-backed maps are MAP_SHARED, so writes are visible to every
        // other mapping of the same file.
        let map = unsafe { MmapOptions::new().len(self.size).map_mut(&self.file) }
            .map_err(|source| RegionError::Attach {
                id: self.id,
                source,
            })?;
        Ok(MmapMapping { id: self.id, map })
    }

    fn destroy(self) -> Result<()> {
        std::fs::remove_file(&self.path).map_err(|source| RegionError::Destroy {
            id: self.id,
            source,
        })?;
        log::debug!("mmap: region {} removed ({})", self.id, self.path.display());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MmapMapping {
    id: RegionId,
    map: MmapMut,
}

impl Mapping for MmapMapping {
    fn region_id(&self) -> RegionId {
        self.id
    }

    fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn detach(self) -> Result<()> {
        drop(self.map);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{RegionGuard, RESULT_C};

    const SIZE: usize = 3 * 3 * 8;

    #[test]
    fn test_attachments_share_storage() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        let region = alloc.allocate(RESULT_C, SIZE).unwrap();
        assert!(region.path().exists());

        let mut writer = region.attach().unwrap();
        let reader = alloc.open(RESULT_C, SIZE).unwrap().attach().unwrap();
        unsafe {
            writer.as_f64_slice_mut().unwrap()[8] = 3.25;
            assert_eq!(reader.as_f64_slice().unwrap()[8], 3.25);
        }
        writer.detach().unwrap();
        reader.detach().unwrap();
        region.destroy().unwrap();
    }

    #[test]
    fn test_destroyed_region_cannot_be_opened() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        let region = alloc.allocate(RESULT_C, SIZE).unwrap();
        region.attach().unwrap().detach().unwrap();
        region.destroy().unwrap();

        let err = alloc.open(RESULT_C, SIZE).unwrap_err();
        assert!(matches!(err, RegionError::NotFound { .. }));
        assert!(!alloc.path_for(RESULT_C).exists());
    }

    #[test]
    fn test_reuses_region_of_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        let first = alloc.allocate(RESULT_C, SIZE).unwrap();
        let mut m = first.attach().unwrap();
        unsafe { m.as_f64_slice_mut().unwrap()[0] = 7.0 };

        let second = alloc.allocate(RESULT_C, SIZE).unwrap();
        let m2 = second.attach().unwrap();
        assert_eq!(unsafe { m2.as_f64_slice().unwrap()[0] }, 7.0);
        first.destroy().unwrap();
    }

    #[test]
    fn test_incompatible_size_fails() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        let _region = alloc.allocate(RESULT_C, SIZE).unwrap();
        let err = alloc.allocate(RESULT_C, SIZE * 2).unwrap_err();
        assert!(matches!(err, RegionError::Allocation { .. }));
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        assert!(alloc.allocate(RESULT_C, 0).is_err());
        assert!(!alloc.path_for(RESULT_C).exists());
    }

    #[test]
    fn test_open_missing_directory_is_not_found() {
        let alloc = MmapAllocator::new("/nonexistent/shmm-test-dir");
        assert!(matches!(
            alloc.open(RESULT_C, SIZE),
            Err(RegionError::NotFound { .. })
        ));
        assert!(matches!(
            alloc.allocate(RESULT_C, SIZE),
            Err(RegionError::Allocation { .. })
        ));
    }

    #[test]
    fn test_guard_destroys_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        drop(RegionGuard::new(alloc.allocate(RESULT_C, SIZE).unwrap()));
        assert!(!alloc.path_for(RESULT_C).exists());
    }

    #[test]
    fn test_guard_release_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = MmapAllocator::new(dir.path());
        let guard = RegionGuard::new(alloc.allocate(RESULT_C, SIZE).unwrap());
        std::fs::remove_file(alloc.path_for(RESULT_C)).unwrap();
        assert!(matches!(guard.release(), Err(RegionError::Destroy { .. })));
    }
}
