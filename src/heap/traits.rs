//! Heap Trait Definitions

use crate::error::Result;
use crate::types::Address;

/// Persistent allocator consumed by index lists.
///
/// Addresses stay valid across restarts as long as the same backing store is
/// reopened. `Address::NULL` is never handed out.
///
/// Implementations serialize their own allocation metadata; callers only
/// guarantee that no two threads write the same block at once.
pub trait Heap: Send + Sync {
    /// Reserve a block of at least `size` bytes
    fn allocate(&self, size: usize) -> Result<Address>;

    /// Copy `buf.len()` bytes starting at `addr` into `buf`
    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()>;

    /// Overwrite `bytes.len()` bytes starting at `addr`
    fn write(&self, addr: Address, bytes: &[u8]) -> Result<()>;

    /// Return a block obtained from `allocate(size)` to the heap
    fn free(&self, addr: Address, size: usize) -> Result<()>;

    /// Force everything written so far to stable storage
    fn flush(&self) -> Result<()>;

    /// Force one block (and the allocation metadata) to stable storage
    fn flush_range(&self, addr: Address, len: usize) -> Result<()> {
        let _ = (addr, len);
        self.flush()
    }

    /// Bytes currently handed out and not freed
    fn live_bytes(&self) -> u64;
}
