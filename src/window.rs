//! Windows: the three concrete ways the pool keeps record bytes resident.
//!
//! A `Window` owns a contiguous run of records and an operation lock
//! (shared read / exclusive write). `in_use` is a separate, lock-free gate
//! used only to decide whether a window may be installed into or evicted
//! from a brick slot — it says nothing about whether the window is
//! currently being read or written.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapMut, MmapOptions};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};

use crate::channel::Channel;
use crate::common::Position;
use crate::error::{PoolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    Mapped,
    Plain,
    Row,
}

/// Which access a caller intends to perform; drives whether `acquire`
/// takes the window's operation lock for read or for write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

enum MappedBody {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

struct PlainBody {
    buf: Vec<u8>,
    dirty: bool,
}

struct RowBody {
    buf: Vec<u8>,
    dirty: bool,
}

enum WindowBody {
    Mapped(MappedBody),
    Plain(PlainBody),
    Row(RowBody),
}

/// A resident run of records: a memory-mapped brick, a heap-buffered
/// brick, or a single-record row.
pub struct Window {
    kind: WindowKind,
    /// First record position this window covers.
    base_position: Position,
    /// Number of records covered (1 for a row).
    record_count: usize,
    page_size: usize,
    in_use: AtomicBool,
    body: Arc<RwLock<WindowBody>>,
}

impl Window {
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    pub fn base_position(&self) -> Position {
        self.base_position
    }

    pub fn covers(&self, position: Position) -> bool {
        position >= self.base_position && position < self.base_position + self.record_count as u64
    }

    /// Atomically claims the window for a caller. Returns `false` if it is
    /// already claimed (by a concurrent acquirer, or because it is
    /// mid-eviction).
    pub(crate) fn mark_in_use(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn unmark_in_use(&self) {
        self.in_use.store(false, Ordering::Release);
    }

    pub(crate) fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    fn record_offset(&self, position: Position) -> usize {
        ((position - self.base_position) as usize) * self.page_size
    }

    /// Builds a `MappedPersistenceWindow` over `[offset, offset+len)` of
    /// `channel`'s backing file. The caller is responsible for ensuring the
    /// file is already at least `offset + len` bytes long.
    pub(crate) fn new_mapped(
        base_position: Position,
        record_count: usize,
        page_size: usize,
        channel: &dyn Channel,
        offset: u64,
        len: usize,
        read_only: bool,
    ) -> Result<Arc<Window>> {
        let file = channel
            .raw_file()
            .ok_or_else(|| PoolError::Mapping("channel has no raw file to map".to_string()))?;
        let body = if read_only {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(len)
                    .map(file)
                    .map_err(|e: io::Error| PoolError::Mapping(e.to_string()))?
            };
            MappedBody::ReadOnly(mmap)
        } else {
            let mmap = unsafe {
                MmapOptions::new()
                    .offset(offset)
                    .len(len)
                    .map_mut(file)
                    .map_err(|e: io::Error| PoolError::Mapping(e.to_string()))?
            };
            MappedBody::ReadWrite(mmap)
        };
        Ok(Arc::new(Window {
            kind: WindowKind::Mapped,
            base_position,
            record_count,
            page_size,
            in_use: AtomicBool::new(false),
            body: Arc::new(RwLock::new(WindowBody::Mapped(body))),
        }))
    }

    /// Builds a `PlainPersistenceWindow`: a heap buffer eagerly loaded with
    /// the brick's current contents.
    pub(crate) fn new_plain(
        base_position: Position,
        record_count: usize,
        page_size: usize,
        channel: &dyn Channel,
        offset: u64,
        len: usize,
    ) -> Result<Arc<Window>> {
        let mut buf = vec![0u8; len];
        let file_len = channel.len()?;
        if file_len > offset {
            let readable = (file_len - offset).min(len as u64) as usize;
            channel.read_at(offset, &mut buf[..readable])?;
        }
        Ok(Arc::new(Window {
            kind: WindowKind::Plain,
            base_position,
            record_count,
            page_size,
            in_use: AtomicBool::new(false),
            body: Arc::new(RwLock::new(WindowBody::Plain(PlainBody {
                buf,
                dirty: false,
            }))),
        }))
    }

    /// Builds a `PersistenceRow`, loading the single record at `position`.
    /// Returned already marked in-use: the caller creating it owns it
    /// until it is inserted into the active row map (or dropped, if the
    /// insert loses a race).
    pub(crate) fn new_row(
        position: Position,
        page_size: usize,
        channel: &dyn Channel,
    ) -> Result<Arc<Window>> {
        let offset = position * page_size as u64;
        let mut buf = vec![0u8; page_size];
        let file_len = channel.len()?;
        if file_len > offset {
            let readable = (file_len - offset).min(page_size as u64) as usize;
            channel.read_at(offset, &mut buf[..readable])?;
        }
        Ok(Arc::new(Window {
            kind: WindowKind::Row,
            base_position: position,
            record_count: 1,
            page_size,
            in_use: AtomicBool::new(true),
            body: Arc::new(RwLock::new(WindowBody::Row(RowBody {
                buf,
                dirty: false,
            }))),
        }))
    }

    /// Writes any dirty bytes back through `channel` and, for mapped
    /// windows, asks the OS to flush the mapping. No-op for clean windows.
    pub(crate) fn flush(&self, channel: &dyn Channel) -> Result<()> {
        let mut body = self.body.write();
        match &mut *body {
            WindowBody::Mapped(MappedBody::ReadWrite(mmap)) => {
                mmap.flush().map_err(|e| PoolError::Mapping(e.to_string()))?;
            }
            WindowBody::Mapped(MappedBody::ReadOnly(_)) => {}
            WindowBody::Plain(plain) => {
                if plain.dirty {
                    let offset = self.base_position * self.page_size as u64;
                    channel.write_at(offset, &plain.buf)?;
                    plain.dirty = false;
                }
            }
            WindowBody::Row(row) => {
                if row.dirty {
                    let offset = self.base_position * self.page_size as u64;
                    channel.write_at(offset, &row.buf)?;
                    row.dirty = false;
                }
            }
        }
        Ok(())
    }
}

enum BodyGuard {
    Read(ArcRwLockReadGuard<RawRwLock, WindowBody>),
    Write(ArcRwLockWriteGuard<RawRwLock, WindowBody>),
}

/// RAII convenience over the raw acquire/release pair. Releases the window
/// automatically on drop; [`crate::pool::WindowPool::release`] is sugar for
/// dropping one explicitly.
pub struct WindowGuard {
    pub(crate) window: Arc<Window>,
    pub(crate) position: Position,
    pub(crate) brick_index: Option<usize>,
    pub(crate) mode: AccessMode,
    body: BodyGuard,
    pub(crate) released: bool,
}

impl WindowGuard {
    pub(crate) fn new(
        window: Arc<Window>,
        position: Position,
        brick_index: Option<usize>,
        mode: AccessMode,
    ) -> Self {
        let body = match mode {
            AccessMode::Read => BodyGuard::Read(Arc::clone(&window.body).read_arc()),
            AccessMode::Write => BodyGuard::Write(Arc::clone(&window.body).write_arc()),
        };
        WindowGuard {
            window,
            position,
            brick_index,
            mode,
            body,
            released: false,
        }
    }

    pub fn kind(&self) -> WindowKind {
        self.window.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// The record's bytes, exactly `page_size` long.
    pub fn bytes(&self) -> &[u8] {
        let offset = self.window.record_offset(self.position);
        let len = self.window.page_size;
        match &self.body {
            BodyGuard::Read(g) => Self::slice(g, offset, len),
            BodyGuard::Write(g) => Self::slice(g, offset, len),
        }
    }

    /// The record's bytes, mutable. Panics if this guard was acquired for
    /// `AccessMode::Read` — callers decide intent up front via `acquire`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        assert_eq!(self.mode, AccessMode::Write, "guard was not acquired for write");
        let offset = self.window.record_offset(self.position);
        let len = self.window.page_size;
        match &mut self.body {
            BodyGuard::Write(g) => {
                match &mut **g {
                    WindowBody::Mapped(MappedBody::ReadWrite(mmap)) => &mut mmap[offset..offset + len],
                    WindowBody::Mapped(MappedBody::ReadOnly(_)) => {
                        unreachable!("read-only mapping cannot be acquired for write")
                    }
                    WindowBody::Plain(plain) => {
                        plain.dirty = true;
                        &mut plain.buf[offset..offset + len]
                    }
                    WindowBody::Row(row) => {
                        row.dirty = true;
                        &mut row.buf[offset..offset + len]
                    }
                }
            }
            BodyGuard::Read(_) => unreachable!(),
        }
    }

    fn slice(body: &WindowBody, offset: usize, len: usize) -> &[u8] {
        match body {
            WindowBody::Mapped(MappedBody::ReadWrite(mmap)) => &mmap[offset..offset + len],
            WindowBody::Mapped(MappedBody::ReadOnly(mmap)) => &mmap[offset..offset + len],
            WindowBody::Plain(plain) => &plain.buf[offset..offset + len],
            WindowBody::Row(row) => &row.buf[offset..offset + len],
        }
    }

    /// Whether this row carries unflushed writes. Only meaningful for
    /// `WindowKind::Row`; used by `release` to decide whether to hand the
    /// record off to a brick's plain window before dropping the row.
    pub(crate) fn row_dirty(&self) -> bool {
        match &self.body {
            BodyGuard::Read(g) => matches!(&**g, WindowBody::Row(r) if r.dirty),
            BodyGuard::Write(g) => matches!(&**g, WindowBody::Row(r) if r.dirty),
        }
    }

    pub(crate) fn row_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            BodyGuard::Read(g) => match &**g {
                WindowBody::Row(r) => Some(&r.buf),
                _ => None,
            },
            BodyGuard::Write(g) => match &**g {
                WindowBody::Row(r) => Some(&r.buf),
                _ => None,
            },
        }
    }
}

impl Drop for WindowGuard {
    fn drop(&mut self) {
        if !self.released {
            self.window.unmark_in_use();
        }
    }
}
