//! Persistent Heap Module
//!
//! Storage for index list nodes, separate from the fixed-size type table.
//!
//! Implementations:
//! - `MmapHeap`: file-backed, growable, survives restart
//! - `MemoryHeap`: volatile, for tests and throwaway graphs
//!
//! Both round requests up to 16-byte granules. Blocks up to 256 bytes are
//! recycled through per-size-class free lists; larger freed blocks are not
//! reused.

mod traits;
mod memory;
mod mmap;

pub use traits::Heap;
pub use memory::MemoryHeap;
pub use mmap::MmapHeap;

use crate::error::{Result, TypeIndexError};
use crate::types::Address;

pub const GRANULE: usize = 16;
pub const SIZE_CLASSES: usize = 16;
pub const MAX_RECYCLED_BYTES: usize = GRANULE * SIZE_CLASSES;

/// Round a request up to the granule size.
#[inline]
pub(crate) fn rounded(size: usize) -> usize {
    (size + GRANULE - 1) / GRANULE * GRANULE
}

/// Free-list class for an already-rounded size, if it is recycled at all.
#[inline]
pub(crate) fn size_class(rounded_size: usize) -> Option<usize> {
    if rounded_size == 0 || rounded_size > MAX_RECYCLED_BYTES {
        None
    } else {
        Some(rounded_size / GRANULE - 1)
    }
}

pub(crate) fn zero_sized() -> TypeIndexError {
    TypeIndexError::HeapAllocationFailure {
        size: 0,
        reason: "zero-sized allocation".into(),
    }
}

/// Bounds check shared by both implementations. `floor` is the first
/// address that can hold user data.
pub(crate) fn check_range(addr: Address, len: usize, floor: u64, limit: u64) -> Result<usize> {
    let start = addr.get();
    let end = start.checked_add(len as u64);
    match end {
        Some(end) if start >= floor && end <= limit => Ok(start as usize),
        _ => Err(TypeIndexError::format(format!(
            "heap address {} (+{} bytes) outside [{:#x}, {:#x})",
            addr, len, floor, limit
        ))),
    }
}
