//! Volatile heap
//!
//! Same allocation policy as `MmapHeap`, backed by a `Vec<u8>`.
//! Nothing survives the process.

use super::{check_range, rounded, size_class, zero_sized, Heap, GRANULE, SIZE_CLASSES};
use crate::error::{Result, TypeIndexError};
use crate::types::Address;
use parking_lot::Mutex;

struct MemoryInner {
    bytes: Vec<u8>,
    free: [Vec<u64>; SIZE_CLASSES],
    live_bytes: u64,
}

pub struct MemoryHeap {
    inner: Mutex<MemoryInner>,
    max_bytes: Option<usize>,
}

impl MemoryHeap {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Heap that refuses to grow past `max_bytes` total.
    pub fn with_limit(max_bytes: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                // first granule stays unused so address 0 is never handed out
                bytes: vec![0u8; GRANULE],
                free: Default::default(),
                live_bytes: 0,
            }),
            max_bytes,
        }
    }
}

impl Default for MemoryHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap for MemoryHeap {
    fn allocate(&self, size: usize) -> Result<Address> {
        if size == 0 {
            return Err(zero_sized());
        }
        let size = rounded(size);
        let mut inner = self.inner.lock();

        if let Some(class) = size_class(size) {
            if let Some(offset) = inner.free[class].pop() {
                inner.live_bytes += size as u64;
                return Ok(Address::new(offset));
            }
        }

        let offset = inner.bytes.len();
        let end = offset + size;
        if let Some(max) = self.max_bytes {
            if end > max {
                return Err(TypeIndexError::HeapAllocationFailure {
                    size,
                    reason: format!("memory heap limit of {} bytes reached", max),
                });
            }
        }
        inner.bytes.resize(end, 0);
        inner.live_bytes += size as u64;
        Ok(Address::new(offset as u64))
    }

    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock();
        let start = check_range(addr, buf.len(), GRANULE as u64, inner.bytes.len() as u64)?;
        buf.copy_from_slice(&inner.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, addr: Address, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let start = check_range(addr, bytes.len(), GRANULE as u64, inner.bytes.len() as u64)?;
        inner.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn free(&self, addr: Address, size: usize) -> Result<()> {
        let size = rounded(size);
        let mut inner = self.inner.lock();
        check_range(addr, size, GRANULE as u64, inner.bytes.len() as u64)?;
        inner.live_bytes = inner.live_bytes.saturating_sub(size as u64);
        if let Some(class) = size_class(size) {
            inner.free[class].push(addr.get());
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn live_bytes(&self) -> u64 {
        self.inner.lock().live_bytes
    }
}
