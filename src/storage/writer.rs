//! Byte-stream destinations for the indexer's save path.
//!
//! The writer is polymorphic over two destinations: a buffered file (later
//! memory-mapped by the searcher) and an anonymous memory mapping of the
//! exact calculated size, handed to the searcher without touching disk.

use crate::storage::mapping::Mapping;
use memmap2::MmapMut;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination for the serialized artifact. `open` has already happened in
/// the concrete constructor; writes arrive in layout order.
pub trait IndexWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<()>;
}

/// Streams bytes to a file.
pub struct FileWriter {
    inner: BufWriter<File>,
}

impl FileWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::new(file),
        })
    }

    /// Flush and sync. Consumes the writer; the artifact is complete.
    pub fn finish(self) -> io::Result<()> {
        let file = self.inner.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

impl IndexWriter for FileWriter {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }
}

/// Receives the artifact into an anonymous mapping sized to the exact
/// calculated byte length.
pub struct MemWriter {
    map: MmapMut,
    pos: usize,
}

impl MemWriter {
    pub fn with_len(len: usize) -> io::Result<Self> {
        let map = MmapMut::map_anon(len)?;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            // keep index pages out of core dumps
            let _ = map.advise(memmap2::Advice::DontDump);
        }
        Ok(Self { map, pos: 0 })
    }

    /// Seal the mapping read-only and hand it to a searcher. Fails if the
    /// calculated size was not written exactly.
    pub fn into_mapping(self) -> io::Result<Mapping> {
        if self.pos != self.map.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "in-memory artifact incomplete: wrote {} of {} bytes",
                    self.pos,
                    self.map.len()
                ),
            ));
        }
        Ok(Mapping::from_anon(self.map.make_read_only()?))
    }
}

impl IndexWriter for MemWriter {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.map.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past calculated artifact size",
            ));
        }
        self.map[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }
}
