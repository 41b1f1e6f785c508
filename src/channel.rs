//! The backing channel: a seekable, sized, force-able byte file.
//!
//! This is deliberately the thinnest possible seam. File creation and
//! growth *policy* belong to the caller; the pool only ever extends the
//! file up to a brick boundary it is about to map, since `mmap` requires
//! the mapped range to already exist.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// What the pool needs from a backing file. Grounded in the same shape as
/// positional reads/writes, a length query, and an explicit `force` (fsync)
/// rather than relying on OS writeback.
pub trait Channel: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
    fn len(&self) -> io::Result<u64>;
    fn set_len(&self, len: u64) -> io::Result<()>;
    fn force(&self) -> io::Result<()>;

    /// The raw file, when one exists, for `mmap`-backed windows. Channels
    /// that aren't file-backed (e.g. an in-memory test double) return
    /// `None`, which disables real memory mapping regardless of
    /// `PoolConfig::use_memory_mapped`.
    fn raw_file(&self) -> Option<&File>;
}

/// A [`Channel`] backed by a single `std::fs::File`.
pub struct FileChannel {
    file: File,
}

impl FileChannel {
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn from_file(file: File) -> Self {
        Self { file }
    }
}

#[cfg(unix)]
impl Channel for FileChannel {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.write_all_at(buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn force(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn raw_file(&self) -> Option<&File> {
        Some(&self.file)
    }
}

#[cfg(not(unix))]
impl Channel for FileChannel {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        // Non-Unix platforms lack FileExt's positional I/O; fall back to a
        // seek-then-read. Concurrent callers serialize through the OS file
        // position, which is weaker than the Unix path but keeps the crate
        // portable.
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn force(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn raw_file(&self) -> Option<&File> {
        Some(&self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.bin");
        let channel = FileChannel::open(&path, false).unwrap();
        channel.set_len(4096).unwrap();
        channel.write_at(10, b"hello").unwrap();
        let mut buf = [0u8; 5];
        channel.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn len_reflects_set_len() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.bin");
        let channel = FileChannel::open(&path, false).unwrap();
        channel.set_len(8192).unwrap();
        assert_eq!(channel.len().unwrap(), 8192);
    }
}
