//! Read-only memory over a persisted artifact.
//!
//! A [`Mapping`] is either a file mapped read-only (optionally mlock'd) or
//! an anonymous mapping handed over from [`super::MemWriter`]. Cloning
//! produces physically separate storage in both cases: the file is
//! re-mapped, the anonymous mapping is copied into a fresh one. This is an
//! explicit optimization against memory-bank conflicts under heavy
//! concurrent query load.

use memmap2::{Advice, Mmap, MmapMut};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Source {
    File(PathBuf),
    Anonymous,
}

/// Shared-immutable bytes of a loaded artifact.
#[derive(Debug)]
pub struct Mapping {
    map: Mmap,
    source: Source,
}

impl Mapping {
    /// Map a file read-only. With `need_mlock`, lock its pages resident.
    pub fn open(path: &Path, need_mlock: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        if need_mlock {
            map.lock()?;
        }
        Ok(Self {
            map,
            source: Source::File(path.to_owned()),
        })
    }

    /// Copy the file into an anonymous huge-page mapping instead of
    /// mapping it directly. Needs a configured HugeTLB pool; fails with
    /// the OS error otherwise. Clones of this mapping fall back to
    /// regular anonymous pages.
    #[cfg(target_os = "linux")]
    pub fn open_huge_pages(path: &Path) -> io::Result<Self> {
        use std::io::Read;

        let mut file = File::open(path)?;
        let size = file.metadata()?.len() as usize;
        let mut map = memmap2::MmapOptions::new().len(size).huge(None).map_anon()?;
        file.read_exact(&mut map[..size])?;
        Ok(Self::from_anon(map.make_read_only()?))
    }

    /// Wrap a sealed anonymous mapping from the in-memory writer.
    pub(crate) fn from_anon(map: Mmap) -> Self {
        Self {
            map,
            source: Source::Anonymous,
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Forward an advice flag to the OS. Returns whether the kernel
    /// accepted it.
    pub fn advise(&self, advice: Advice) -> bool {
        self.map.advise(advice).is_ok()
    }

    /// Physically separate copy of this mapping: file sources re-map the
    /// file, anonymous sources copy into a fresh anonymous mapping.
    pub fn try_clone(&self) -> io::Result<Self> {
        match &self.source {
            Source::File(path) => Self::open(path, false),
            Source::Anonymous => {
                let mut copy = MmapMut::map_anon(self.map.len())?;
                copy.copy_from_slice(&self.map);
                Ok(Self::from_anon(copy.make_read_only()?))
            }
        }
    }
}
