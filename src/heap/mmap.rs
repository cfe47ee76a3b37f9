//! File-backed heap
//!
//! # Layout
//! ```text
//! [0..256)   HeapHeader { magic, version, bump, live_bytes, free_heads[16], .. }
//! [256..)    blocks, 16-byte granules
//! ```
//! A freed block of a recycled size class stores the next free block's
//! address in its first 8 bytes; the class heads live in the header, so free
//! space survives restart.
//!
//! # Thread Safety
//! - allocation metadata (bump, free lists, header bytes) → `alloc` mutex
//! - the mapping itself → `RwLock`, write-locked only to grow and remap
//!
//! Lock order is always `alloc` then `map`.

use super::{check_range, rounded, size_class, zero_sized, Heap, SIZE_CLASSES};
use crate::error::{Result, TypeIndexError};
use crate::types::Address;
use bytemuck::{Pod, Zeroable};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

const HEAP_MAGIC: u64 = 0x5449_4458_4845_4150; // "TIDXHEAP"
const HEAP_VERSION: u32 = 1;
const HEADER_SIZE: usize = 256;
const MIN_FILE_SIZE: u64 = 4096;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct HeapHeader {
    magic: u64,
    version: u32,
    _pad0: u32,
    bump: u64,
    live_bytes: u64,
    _pad1: [u64; 4],
    free_heads: [u64; SIZE_CLASSES],
    _reserved: [u64; 8], // Pad to 256 bytes total
}

const _: () = assert!(std::mem::size_of::<HeapHeader>() == HEADER_SIZE);

struct AllocState {
    bump: u64,
    live_bytes: u64,
    free_heads: [u64; SIZE_CLASSES],
}

impl AllocState {
    fn header(&self) -> HeapHeader {
        let mut free_heads = [0u64; SIZE_CLASSES];
        for (dst, src) in free_heads.iter_mut().zip(self.free_heads.iter()) {
            *dst = src.to_le();
        }
        HeapHeader {
            magic: HEAP_MAGIC.to_le(),
            version: HEAP_VERSION.to_le(),
            _pad0: 0,
            bump: self.bump.to_le(),
            live_bytes: self.live_bytes.to_le(),
            _pad1: [0; 4],
            free_heads,
            _reserved: [0; 8],
        }
    }

    fn from_header(h: &HeapHeader) -> Self {
        let mut free_heads = [0u64; SIZE_CLASSES];
        for (dst, src) in free_heads.iter_mut().zip(h.free_heads.iter()) {
            *dst = u64::from_le(*src);
        }
        Self {
            bump: u64::from_le(h.bump),
            live_bytes: u64::from_le(h.live_bytes),
            free_heads,
        }
    }
}

// NOTE: MmapHeap cannot be Clone'd - share it behind an Arc instead.
pub struct MmapHeap {
    map: RwLock<MmapMut>,
    file: File,
    path: PathBuf,
    alloc: Mutex<AllocState>,
    max_bytes: Option<u64>,
}

impl MmapHeap {
    /// Create a new heap file. Fails if `path` already exists.
    pub fn create(path: &Path, initial_bytes: u64, max_bytes: Option<u64>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create_new(true).open(path)?;
        let size = initial_bytes.max(MIN_FILE_SIZE);
        file.set_len(size)?;

        let map = unsafe { MmapMut::map_mut(&file)? };
        let state = AllocState {
            bump: HEADER_SIZE as u64,
            live_bytes: 0,
            free_heads: [0; SIZE_CLASSES],
        };
        let heap = Self {
            map: RwLock::new(map),
            file,
            path: path.to_path_buf(),
            alloc: Mutex::new(state),
            max_bytes,
        };
        {
            let state = heap.alloc.lock();
            heap.store_header(&state);
        }
        debug!(path = %path.display(), size, "heap.create");
        Ok(heap)
    }

    /// Map an existing heap file without changing its size.
    pub fn open(path: &Path, max_bytes: Option<u64>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(TypeIndexError::format(format!(
                "heap file {} is {} bytes, shorter than its header",
                path.display(),
                len
            )));
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        let header: HeapHeader = bytemuck::pod_read_unaligned(&map[..HEADER_SIZE]);
        if u64::from_le(header.magic) != HEAP_MAGIC {
            return Err(TypeIndexError::format(format!("{} is not a heap file", path.display())));
        }
        if u32::from_le(header.version) != HEAP_VERSION {
            return Err(TypeIndexError::format(format!(
                "heap version {} not supported",
                u32::from_le(header.version)
            )));
        }
        let state = AllocState::from_header(&header);
        if state.bump < HEADER_SIZE as u64 || state.bump > len {
            return Err(TypeIndexError::format(format!(
                "heap bump pointer {:#x} outside file of {} bytes",
                state.bump, len
            )));
        }

        debug!(path = %path.display(), size = len, live = state.live_bytes, "heap.open");
        Ok(Self {
            map: RwLock::new(map),
            file,
            path: path.to_path_buf(),
            alloc: Mutex::new(state),
            max_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the backing file.
    pub fn capacity(&self) -> u64 {
        self.map.read().len() as u64
    }

    // ── raw mapping I/O ───────────────────────────────────────────────────────

    #[inline]
    fn copy_in(map: &MmapMut, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= map.len());
        // SAFETY: range is bounds-checked by the caller. Concurrent writers
        // never share a block: list nodes are written under their type's lock,
        // header and free-list links under `alloc`.
        unsafe {
            let dest = map.as_ptr().add(offset) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dest, bytes.len());
        }
    }

    fn read_link(map: &MmapMut, offset: u64) -> u64 {
        let off = offset as usize;
        u64::from_le_bytes(map[off..off + 8].try_into().unwrap_or([0u8; 8]))
    }

    /// Must be called with `alloc` held.
    fn store_header(&self, state: &AllocState) {
        let header = state.header();
        let map = self.map.read();
        Self::copy_in(&map, 0, bytemuck::bytes_of(&header));
    }

    /// Grow the file so that `needed` bytes fit. Must be called with `alloc` held.
    fn grow(&self, needed: u64, size: usize) -> Result<()> {
        let mut map = self.map.write();
        let current = map.len() as u64;
        if needed <= current {
            return Ok(());
        }
        let mut target = (current * 2).max(needed);
        if let Some(max) = self.max_bytes {
            if needed > max {
                return Err(TypeIndexError::HeapAllocationFailure {
                    size,
                    reason: format!("heap limit of {} bytes reached", max),
                });
            }
            target = target.min(max);
        }

        map.flush().map_err(|e| grow_failed(size, e))?;
        self.file.set_len(target).map_err(|e| grow_failed(size, e))?;
        *map = unsafe { MmapMut::map_mut(&self.file) }.map_err(|e| grow_failed(size, e))?;
        debug!(from = current, to = target, "heap.grow");
        Ok(())
    }
}

fn grow_failed(size: usize, e: std::io::Error) -> TypeIndexError {
    TypeIndexError::HeapAllocationFailure {
        size,
        reason: format!("could not grow heap file: {}", e),
    }
}

impl Heap for MmapHeap {
    fn allocate(&self, size: usize) -> Result<Address> {
        if size == 0 {
            return Err(zero_sized());
        }
        let size = rounded(size);
        let mut state = self.alloc.lock();

        if let Some(class) = size_class(size) {
            let head = state.free_heads[class];
            if head != 0 {
                let next = {
                    let map = self.map.read();
                    check_range(Address::new(head), 8, HEADER_SIZE as u64, map.len() as u64)?;
                    Self::read_link(&map, head)
                };
                state.free_heads[class] = next;
                state.live_bytes += size as u64;
                self.store_header(&state);
                return Ok(Address::new(head));
            }
        }

        let offset = state.bump;
        let end = offset + size as u64;
        if end > self.capacity() {
            self.grow(end, size)?;
        }
        state.bump = end;
        state.live_bytes += size as u64;
        self.store_header(&state);
        Ok(Address::new(offset))
    }

    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        let map = self.map.read();
        let start = check_range(addr, buf.len(), HEADER_SIZE as u64, map.len() as u64)?;
        buf.copy_from_slice(&map[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, addr: Address, bytes: &[u8]) -> Result<()> {
        let map = self.map.read();
        let start = check_range(addr, bytes.len(), HEADER_SIZE as u64, map.len() as u64)?;
        Self::copy_in(&map, start, bytes);
        Ok(())
    }

    fn free(&self, addr: Address, size: usize) -> Result<()> {
        let size = rounded(size);
        let mut state = self.alloc.lock();
        {
            let map = self.map.read();
            let start = check_range(addr, size, HEADER_SIZE as u64, state.bump)?;
            if let Some(class) = size_class(size) {
                Self::copy_in(&map, start, &state.free_heads[class].to_le_bytes());
                state.free_heads[class] = addr.get();
            }
        }
        state.live_bytes = state.live_bytes.saturating_sub(size as u64);
        self.store_header(&state);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.map.read().flush()?;
        Ok(())
    }

    fn flush_range(&self, addr: Address, len: usize) -> Result<()> {
        let map = self.map.read();
        let start = check_range(addr, len, HEADER_SIZE as u64, map.len() as u64)?;
        map.flush_range(0, HEADER_SIZE)?;
        map.flush_range(start, len)?;
        Ok(())
    }

    fn live_bytes(&self) -> u64 {
        self.alloc.lock().live_bytes
    }
}
