//! TypeIndexTable: fixed-slot directory of index list descriptors, backed by mmap.
//!
//! # Layout
//! ```text
//! [i*64 .. (i+1)*64)   slot for type id i
//! ```
//! Each slot: `magic:u32 | version:u16 | flags:u16 | head:u64 | count:u64 | crc32:u32 | reserved`
//! The file is sized once at creation and never resized; its length is the
//! only record of the type count.
//!
//! # Thread Safety
//! One mutex per slot. Slot bytes are only touched through a [`SlotGuard`],
//! so writes to different type ids proceed in parallel without a table-wide
//! lock.

use memmap2::MmapMut;
use parking_lot::{Mutex, MutexGuard};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, TypeIndexError};
use crate::list::IndexList;
use crate::types::{TypeId, INDEX_LIST_BYTES};

pub struct TypeIndexTable {
    mmap: MmapMut,
    _file: File,
    path: PathBuf,
    type_count: u32,
    /// index-aligned with slots
    locks: Box<[Mutex<()>]>,
}

/// Exclusive access to one slot, held for the duration of a read-modify-write.
pub struct SlotGuard<'a> {
    table: &'a TypeIndexTable,
    type_id: TypeId,
    _lock: MutexGuard<'a, ()>,
}

impl TypeIndexTable {
    /// Create a new table with `type_count` empty slots. Fails if `path` exists.
    pub fn create(path: &Path, type_count: u32) -> Result<Self> {
        if type_count == 0 {
            return Err(TypeIndexError::InvalidConfig("type count must be at least 1".into()));
        }
        let file_size = type_count as u64 * INDEX_LIST_BYTES as u64;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(file_size)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let empty = IndexList::EMPTY.encode();
        for chunk in mmap.chunks_exact_mut(INDEX_LIST_BYTES) {
            chunk.copy_from_slice(&empty);
        }
        mmap.flush()?;

        debug!(path = %path.display(), type_count, "type_table.create");
        Ok(Self::from_parts(mmap, file, path, type_count))
    }

    /// Map an existing table read/write without changing its size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();

        if len == 0 || len % INDEX_LIST_BYTES as u64 != 0 {
            return Err(TypeIndexError::format(format!(
                "table {} is {} bytes, not a positive multiple of {}",
                path.display(),
                len,
                INDEX_LIST_BYTES
            )));
        }
        let type_count = u32::try_from(len / INDEX_LIST_BYTES as u64).map_err(|_| {
            TypeIndexError::format(format!("table {} holds too many slots", path.display()))
        })?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), type_count, "type_table.open");
        Ok(Self::from_parts(mmap, file, path, type_count))
    }

    fn from_parts(mmap: MmapMut, file: File, path: &Path, type_count: u32) -> Self {
        let locks = (0..type_count).map(|_| Mutex::new(())).collect();
        Self {
            mmap,
            _file: file,
            path: path.to_path_buf(),
            type_count,
            locks,
        }
    }

    pub fn type_count(&self) -> u32 {
        self.type_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn slot_off(type_id: TypeId) -> usize {
        type_id as usize * INDEX_LIST_BYTES
    }

    fn check(&self, type_id: TypeId) -> Result<()> {
        if type_id < self.type_count {
            Ok(())
        } else {
            Err(TypeIndexError::InvalidTypeId {
                type_id,
                type_count: self.type_count,
            })
        }
    }

    /// Block until the slot for `type_id` is free and take it.
    pub fn lock_slot(&self, type_id: TypeId) -> Result<SlotGuard<'_>> {
        self.check(type_id)?;
        let lock = self.locks[type_id as usize].lock();
        Ok(SlotGuard {
            table: self,
            type_id,
            _lock: lock,
        })
    }

    pub fn read_slot(&self, type_id: TypeId) -> Result<IndexList> {
        self.lock_slot(type_id)?.load()
    }

    pub fn write_slot(&self, type_id: TypeId, list: &IndexList) -> Result<()> {
        self.lock_slot(type_id)?.store(list);
        Ok(())
    }

    /// Synchronously write one slot's page range back to disk.
    pub fn flush_slot(&self, type_id: TypeId) -> Result<()> {
        self.lock_slot(type_id)?.flush()
    }

    /// Raw bytes of one slot, for diagnostics.
    pub fn slot_bytes(&self, type_id: TypeId) -> Result<[u8; INDEX_LIST_BYTES]> {
        Ok(self.lock_slot(type_id)?.bytes())
    }

    /// Flush all pages to OS.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Unmap the table, optionally flushing everything to stable storage first.
    pub fn close(self, flush: bool) -> Result<()> {
        if flush {
            self.mmap.flush()?;
        }
        debug!(path = %self.path.display(), flush, "type_table.close");
        Ok(())
    }
}

impl SlotGuard<'_> {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    fn bytes(&self) -> [u8; INDEX_LIST_BYTES] {
        let off = TypeIndexTable::slot_off(self.type_id);
        let mut out = [0u8; INDEX_LIST_BYTES];
        out.copy_from_slice(&self.table.mmap[off..off + INDEX_LIST_BYTES]);
        out
    }

    pub fn load(&self) -> Result<IndexList> {
        IndexList::decode(&self.bytes()).map_err(|e| match e {
            TypeIndexError::FormatMismatch(msg) => {
                TypeIndexError::format(format!("slot {}: {}", self.type_id, msg))
            }
            other => other,
        })
    }

    /// Overwrite this slot's bytes. Neighbouring slots are not touched.
    pub fn store(&mut self, list: &IndexList) {
        let bytes = list.encode();
        let off = TypeIndexTable::slot_off(self.type_id);
        // SAFETY: `off..off+64` lies inside the mapping (type id checked in
        // `lock_slot`) and only the holder of this slot's lock writes there.
        unsafe {
            let dest = self.table.mmap.as_ptr().add(off) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, INDEX_LIST_BYTES);
        }
    }

    pub fn flush(&self) -> Result<()> {
        let off = TypeIndexTable::slot_off(self.type_id);
        self.table.mmap.flush_range(off, INDEX_LIST_BYTES)?;
        Ok(())
    }
}
