//! TypeIndex: per-type node id lists behind a mapped directory.
//!
//! Composes a [`TypeIndexTable`] (one slot + one lock per type id), a
//! `DashMap` cache of live [`IndexList`] descriptors and a shared [`Heap`]
//! holding the list nodes.
//!
//! Every push/remove runs under the type's slot lock:
//! copy cached list → mutate heap → store slot → publish copy to cache.
//! The cache is only replaced after the slot has the new bytes, so a failure
//! part-way leaves cache and slot agreeing on the old descriptor.
//!
//! A bare descriptor from [`TypeIndex::get`] points into the live heap chain,
//! which later removes rewrite and recycle. Enumerate through
//! [`TypeIndex::snapshot`] or [`TypeIndex::members`] instead.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Durability;
use crate::error::{Result, TypeIndexError};
use crate::heap::Heap;
use crate::list::IndexList;
use crate::table::{SlotGuard, TypeIndexTable};
use crate::types::{NodeUuid, TypeId, INDEX_LIST_NODE_BYTES};

pub struct TypeIndex {
    table: TypeIndexTable,
    /// type id → descriptor; fully populated for every slot
    cache: DashMap<TypeId, IndexList>,
    heap: Arc<dyn Heap>,
    durability: Durability,
}

/// Owned copy of one type's list, read under the type's lock.
///
/// Unaffected by anything that happens to the index afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeListSnapshot {
    list: IndexList,
    members: Vec<NodeUuid>,
}

impl TypeListSnapshot {
    /// Descriptor the members were read from.
    pub fn list(&self) -> IndexList {
        self.list
    }

    pub fn count(&self) -> u64 {
        self.list.count()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Ids newest first.
    pub fn members(&self) -> &[NodeUuid] {
        &self.members
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeUuid> {
        self.members.iter()
    }

    pub fn into_vec(self) -> Vec<NodeUuid> {
        self.members
    }
}

impl IntoIterator for TypeListSnapshot {
    type Item = NodeUuid;
    type IntoIter = std::vec::IntoIter<NodeUuid>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.into_iter()
    }
}

impl<'a> IntoIterator for &'a TypeListSnapshot {
    type Item = &'a NodeUuid;
    type IntoIter = std::slice::Iter<'a, NodeUuid>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

/// Point-in-time summary, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeIndexStats {
    pub type_count: u32,
    pub non_empty_types: u32,
    pub total_members: u64,
    pub heap_live_bytes: u64,
}

impl TypeIndex {
    /// Create a new index file with `type_count` empty lists rooted in `heap`.
    pub fn create(path: &Path, type_count: u32, heap: Arc<dyn Heap>) -> Result<Self> {
        let table = TypeIndexTable::create(path, type_count)?;
        let index = Self::populate(table, heap)?;
        debug!(path = %path.display(), type_count, "type_index.create");
        Ok(index)
    }

    /// Open an existing index file. Only descriptors are read; no chain is walked.
    pub fn open(path: &Path, heap: Arc<dyn Heap>) -> Result<Self> {
        let table = TypeIndexTable::open(path)?;
        let index = Self::populate(table, heap)?;
        debug!(
            path = %path.display(),
            type_count = index.type_count(),
            "type_index.open"
        );
        Ok(index)
    }

    fn populate(table: TypeIndexTable, heap: Arc<dyn Heap>) -> Result<Self> {
        let cache = DashMap::with_capacity(table.type_count() as usize);
        for type_id in 0..table.type_count() {
            cache.insert(type_id, table.read_slot(type_id)?);
        }
        Ok(Self {
            table,
            cache,
            heap,
            durability: Durability::default(),
        })
    }

    pub fn with_durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn durability(&self) -> Durability {
        self.durability
    }

    pub fn type_count(&self) -> u32 {
        self.table.type_count()
    }

    pub fn heap(&self) -> &Arc<dyn Heap> {
        &self.heap
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }

    pub fn table(&self) -> &TypeIndexTable {
        &self.table
    }

    /// Cached descriptor. Every type id is cached from create/open on, so a
    /// miss means the index is broken.
    fn current(&self, slot: &SlotGuard<'_>) -> Result<IndexList> {
        match self.cache.get(&slot.type_id()) {
            Some(entry) => Ok(*entry),
            None => Err(TypeIndexError::format(format!(
                "type {} missing from descriptor cache",
                slot.type_id()
            ))),
        }
    }

    /// Store `list` in the slot, then publish it. Caller holds `slot`.
    fn commit(&self, slot: &mut SlotGuard<'_>, list: IndexList) {
        slot.store(&list);
        self.cache.insert(slot.type_id(), list);
    }

    /// Add `uuid` to `type_id`'s list. With `unless_present`, an id already in
    /// the list is left alone. Returns the resulting descriptor.
    ///
    /// An `Err` means nothing was added.
    pub fn push(&self, uuid: NodeUuid, type_id: TypeId, unless_present: bool) -> Result<IndexList> {
        let mut slot = self.table.lock_slot(type_id)?;
        let mut list = self.current(&slot)?;

        let added = if unless_present {
            list.push_unless_present(self.heap.as_ref(), uuid)?
        } else {
            list.push(self.heap.as_ref(), uuid)?;
            true
        };
        if !added {
            return Ok(list);
        }

        if self.durability == Durability::Sync {
            // the node must be durable before any slot points at it
            if let Err(e) = self.heap.flush_range(list.head(), INDEX_LIST_NODE_BYTES) {
                if let Err(free_err) = self.heap.free(list.head(), INDEX_LIST_NODE_BYTES) {
                    warn!(type_id, addr = %list.head(), error = %free_err, "type_index.push.rollback_failed");
                }
                return Err(e);
            }
        }

        self.commit(&mut slot, list);
        if self.durability == Durability::Sync {
            self.flush_committed(&slot, false, "push");
        }

        debug!(type_id, %uuid, count = list.count(), "type_index.push");
        Ok(list)
    }

    /// Remove one occurrence of `uuid` from `type_id`'s list. Absent ids are a
    /// no-op. The unlinked node goes back to the heap after the slot update.
    ///
    /// Once the node is unlinked the removal is applied; later flush failures
    /// are logged, not returned.
    pub fn remove(&self, uuid: NodeUuid, type_id: TypeId) -> Result<IndexList> {
        let mut slot = self.table.lock_slot(type_id)?;
        let mut list = self.current(&slot)?;

        let Some(unlinked) = list.remove(self.heap.as_ref(), uuid)? else {
            return Ok(list);
        };

        self.commit(&mut slot, list);
        if self.durability == Durability::Sync {
            self.flush_committed(&slot, true, "remove");
        }

        if let Err(e) = self.heap.free(unlinked, INDEX_LIST_NODE_BYTES) {
            warn!(type_id, addr = %unlinked, error = %e, "type_index.remove.free_failed");
        }

        debug!(type_id, %uuid, count = list.count(), "type_index.remove");
        Ok(list)
    }

    /// Sync-mode flush after `commit`. The update is already visible, so a
    /// failure is logged; the mapped bytes get written at the next
    /// `flush`/`close`, which do report errors.
    fn flush_committed(&self, slot: &SlotGuard<'_>, flush_heap: bool, op: &'static str) {
        if flush_heap {
            if let Err(e) = self.heap.flush() {
                warn!(type_id = slot.type_id(), op, error = %e, "type_index.sync.heap_flush_failed");
            }
        }
        if let Err(e) = slot.flush() {
            warn!(type_id = slot.type_id(), op, error = %e, "type_index.sync.slot_flush_failed");
        }
    }

    /// `type_id`'s descriptor, read under its lock so `head` and `count`
    /// agree. Walking it later reads the live chain; use [`Self::snapshot`]
    /// to enumerate.
    pub fn get(&self, type_id: TypeId) -> Result<IndexList> {
        let slot = self.table.lock_slot(type_id)?;
        self.current(&slot)
    }

    /// Descriptor plus every member, all read under the type's lock.
    pub fn snapshot(&self, type_id: TypeId) -> Result<TypeListSnapshot> {
        let slot = self.table.lock_slot(type_id)?;
        let list = self.current(&slot)?;
        let members = list.to_vec(self.heap.as_ref())?;
        Ok(TypeListSnapshot { list, members })
    }

    /// All ids of `type_id`, newest first, read under the type's lock.
    pub fn members(&self, type_id: TypeId) -> Result<Vec<NodeUuid>> {
        let slot = self.table.lock_slot(type_id)?;
        self.current(&slot)?.to_vec(self.heap.as_ref())
    }

    pub fn contains(&self, uuid: NodeUuid, type_id: TypeId) -> Result<bool> {
        let slot = self.table.lock_slot(type_id)?;
        self.current(&slot)?.contains(self.heap.as_ref(), uuid)
    }

    pub fn count(&self, type_id: TypeId) -> Result<u64> {
        Ok(self.get(type_id)?.count())
    }

    pub fn stats(&self) -> TypeIndexStats {
        let mut non_empty_types = 0;
        let mut total_members = 0;
        for entry in self.cache.iter() {
            if !entry.is_empty() {
                non_empty_types += 1;
                total_members += entry.count();
            }
        }
        TypeIndexStats {
            type_count: self.type_count(),
            non_empty_types,
            total_members,
            heap_live_bytes: self.heap.live_bytes(),
        }
    }

    /// Flush heap and table pages without closing.
    pub fn flush(&self) -> Result<()> {
        self.heap.flush()?;
        self.table.flush()
    }

    /// Flush everything to stable storage and unmap the table.
    pub fn close(self) -> Result<()> {
        self.heap.flush()?;
        let path = self.table.path().to_path_buf();
        self.table.close(true)?;
        debug!(path = %path.display(), "type_index.close");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{MemoryHeap, MmapHeap};
    use crate::types::{Address, INDEX_LIST_BYTES};
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Memory heap whose flushes fail while `fail_flush` is set.
    #[derive(Default)]
    struct FlakyHeap {
        inner: MemoryHeap,
        fail_flush: AtomicBool,
    }

    impl FlakyHeap {
        fn flush_result(&self) -> Result<()> {
            if self.fail_flush.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk went away").into());
            }
            Ok(())
        }
    }

    impl Heap for FlakyHeap {
        fn allocate(&self, size: usize) -> Result<Address> {
            self.inner.allocate(size)
        }
        fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
            self.inner.read(addr, buf)
        }
        fn write(&self, addr: Address, bytes: &[u8]) -> Result<()> {
            self.inner.write(addr, bytes)
        }
        fn free(&self, addr: Address, size: usize) -> Result<()> {
            self.inner.free(addr, size)
        }
        fn flush(&self) -> Result<()> {
            self.flush_result()
        }
        fn flush_range(&self, _addr: Address, _len: usize) -> Result<()> {
            self.flush_result()
        }
        fn live_bytes(&self) -> u64 {
            self.inner.live_bytes()
        }
    }

    fn setup_flaky(dir: &TempDir) -> (TypeIndex, Arc<FlakyHeap>) {
        let heap = Arc::new(FlakyHeap::default());
        let shared: Arc<dyn Heap> = heap.clone();
        let index = TypeIndex::create(&dir.path().join("t.tbl"), 2, shared)
            .unwrap()
            .with_durability(Durability::Sync);
        (index, heap)
    }

    fn uuid(n: u128) -> NodeUuid {
        NodeUuid::from_u128(n)
    }

    fn setup(type_count: u32) -> (TypeIndex, TempDir) {
        let dir = tempdir().unwrap();
        let heap: Arc<dyn Heap> = Arc::new(MemoryHeap::new());
        let index = TypeIndex::create(&dir.path().join("t.tbl"), type_count, heap).unwrap();
        (index, dir)
    }

    #[test]
    fn test_create_populates_every_type() {
        let (index, _dir) = setup(16);
        assert_eq!(index.cache.len(), 16);
        for t in 0..16 {
            assert_eq!(index.get(t).unwrap(), IndexList::EMPTY);
        }
    }

    #[test]
    fn test_push_returns_descriptor_and_updates_slot() {
        let (index, _dir) = setup(4);
        let list = index.push(uuid(1), 2, false).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(index.table.read_slot(2).unwrap(), list);
        assert_eq!(index.get(2).unwrap(), list);
    }

    #[test]
    fn test_push_unless_present_twice() {
        let (index, _dir) = setup(4);
        let first = index.push(uuid(1), 0, true).unwrap();
        let second = index.push(uuid(1), 0, true).unwrap();
        assert_eq!(first, second);
        assert_eq!(index.members(0).unwrap(), vec![uuid(1)]);
    }

    #[test]
    fn test_invalid_type_id_leaves_slots_unchanged() {
        let (index, _dir) = setup(4);
        index.push(uuid(1), 0, false).unwrap();
        index.push(uuid(2), 3, false).unwrap();
        let before: Vec<[u8; INDEX_LIST_BYTES]> =
            (0..4).map(|t| index.table.slot_bytes(t).unwrap()).collect();
        let live_before = index.heap().live_bytes();

        let err = index.push(uuid(9), 4, false).unwrap_err();
        assert!(matches!(err, TypeIndexError::InvalidTypeId { type_id: 4, type_count: 4 }));
        assert!(matches!(index.remove(uuid(1), 4), Err(TypeIndexError::InvalidTypeId { .. })));
        assert!(matches!(index.get(4), Err(TypeIndexError::InvalidTypeId { .. })));

        let after: Vec<[u8; INDEX_LIST_BYTES]> =
            (0..4).map(|t| index.table.slot_bytes(t).unwrap()).collect();
        assert_eq!(before, after);
        assert_eq!(index.heap().live_bytes(), live_before);
    }

    #[test]
    fn test_remove_frees_heap_node() {
        let (index, _dir) = setup(2);
        index.push(uuid(1), 1, false).unwrap();
        index.push(uuid(2), 1, false).unwrap();
        let live = index.heap().live_bytes();

        let list = index.remove(uuid(1), 1).unwrap();
        assert_eq!(list.count(), 1);
        assert!(index.heap().live_bytes() < live);
        assert_eq!(index.members(1).unwrap(), vec![uuid(2)]);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (index, _dir) = setup(2);
        index.push(uuid(1), 0, false).unwrap();
        let before = index.table.slot_bytes(0).unwrap();
        let list = index.remove(uuid(5), 0).unwrap();
        assert_eq!(list.count(), 1);
        assert_eq!(index.table.slot_bytes(0).unwrap(), before);
    }

    #[test]
    fn test_failed_push_keeps_cache_and_slot_reconciled() {
        let dir = tempdir().unwrap();
        // reserved granule + one 32-byte node
        let heap: Arc<dyn Heap> = Arc::new(MemoryHeap::with_limit(Some(48)));
        let index = TypeIndex::create(&dir.path().join("t.tbl"), 2, heap).unwrap();

        let ok = index.push(uuid(1), 0, false).unwrap();
        let err = index.push(uuid(2), 0, false).unwrap_err();
        assert!(matches!(err, TypeIndexError::HeapAllocationFailure { .. }));

        assert_eq!(index.get(0).unwrap(), ok);
        assert_eq!(index.table.read_slot(0).unwrap(), ok);
        // lock was released on the error path
        assert_eq!(index.members(0).unwrap(), vec![uuid(1)]);
    }

    #[test]
    fn test_stats() {
        let (index, _dir) = setup(8);
        index.push(uuid(1), 0, false).unwrap();
        index.push(uuid(2), 0, false).unwrap();
        index.push(uuid(3), 5, false).unwrap();
        let stats = index.stats();
        assert_eq!(stats.type_count, 8);
        assert_eq!(stats.non_empty_types, 2);
        assert_eq!(stats.total_members, 3);
        assert_eq!(stats.heap_live_bytes, 3 * 32);
    }

    #[test]
    fn test_sync_durability_round_trip() {
        let dir = tempdir().unwrap();
        let heap_path = dir.path().join("heap.mmap");
        let table_path = dir.path().join("t.tbl");
        {
            let heap: Arc<dyn Heap> = Arc::new(MmapHeap::create(&heap_path, 0, None).unwrap());
            let index = TypeIndex::create(&table_path, 4, heap)
                .unwrap()
                .with_durability(Durability::Sync);
            index.push(uuid(1), 1, false).unwrap();
            index.push(uuid(2), 1, false).unwrap();
            index.remove(uuid(1), 1).unwrap();
            index.close().unwrap();
        }
        let heap: Arc<dyn Heap> = Arc::new(MmapHeap::open(&heap_path, None).unwrap());
        let index = TypeIndex::open(&table_path, heap).unwrap();
        assert_eq!(index.members(1).unwrap(), vec![uuid(2)]);
    }

    #[test]
    fn test_same_type_concurrent_pushes_lose_nothing() {
        use std::thread;

        let (index, _dir) = setup(1);
        let index = Arc::new(index);
        let handles: Vec<_> = (0..8u128)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for i in 0..250u128 {
                        index.push(uuid(t * 1000 + i + 1), 0, false).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(index.count(0).unwrap(), 2000);
        assert_eq!(index.members(0).unwrap().len(), 2000);
    }

    #[test]
    fn test_snapshot_survives_later_remove_and_reuse() {
        let dir = tempdir().unwrap();
        let heap_path = dir.path().join("heap.mmap");
        let heap: Arc<dyn Heap> = Arc::new(MmapHeap::create(&heap_path, 0, None).unwrap());
        let index = TypeIndex::create(&dir.path().join("t.tbl"), 2, heap).unwrap();
        let (a, b, c) = (uuid(1), uuid(2), uuid(3));
        index.push(a, 0, false).unwrap();
        index.push(b, 0, false).unwrap();
        index.push(c, 0, false).unwrap();

        let snap = index.snapshot(0).unwrap();
        index.remove(c, 0).unwrap();
        // lands in the node c just gave back
        index.push(uuid(99), 1, false).unwrap();

        assert_eq!(snap.count(), 3);
        assert_eq!(snap.members(), &[c, b, a]);
        assert_eq!(snap.iter().copied().collect::<Vec<_>>(), vec![c, b, a]);
        assert_eq!(index.snapshot(0).unwrap().into_vec(), vec![b, a]);
        assert_eq!(index.members(1).unwrap(), vec![uuid(99)]);
    }

    #[test]
    fn test_sync_push_with_failed_heap_flush_adds_nothing() {
        let dir = tempdir().unwrap();
        let (index, heap) = setup_flaky(&dir);
        index.push(uuid(1), 0, false).unwrap();
        let before = index.get(0).unwrap();
        let live = heap.live_bytes();

        heap.fail_flush.store(true, Ordering::SeqCst);
        let err = index.push(uuid(2), 0, false).unwrap_err();
        assert!(matches!(err, TypeIndexError::Io(_)));

        assert_eq!(index.get(0).unwrap(), before);
        assert_eq!(index.table.read_slot(0).unwrap(), before);
        assert_eq!(heap.live_bytes(), live);

        // a retry after the disk recovers adds exactly one entry
        heap.fail_flush.store(false, Ordering::SeqCst);
        index.push(uuid(2), 0, false).unwrap();
        assert_eq!(index.members(0).unwrap(), vec![uuid(2), uuid(1)]);
    }

    #[test]
    fn test_sync_remove_with_failed_heap_flush_still_frees_node() {
        let dir = tempdir().unwrap();
        let (index, heap) = setup_flaky(&dir);
        index.push(uuid(1), 1, false).unwrap();
        index.push(uuid(2), 1, false).unwrap();
        let live = heap.live_bytes();

        heap.fail_flush.store(true, Ordering::SeqCst);
        let list = index.remove(uuid(1), 1).unwrap();

        assert_eq!(list.count(), 1);
        assert_eq!(index.table.read_slot(1).unwrap(), list);
        assert_eq!(heap.live_bytes(), live - 32);
        assert_eq!(index.members(1).unwrap(), vec![uuid(2)]);
    }

    #[test]
    fn test_cache_miss_is_format_error() {
        let (index, _dir) = setup(2);
        index.cache.remove(&1);
        assert!(matches!(index.get(1), Err(TypeIndexError::FormatMismatch(_))));
        assert!(matches!(index.push(uuid(1), 1, false), Err(TypeIndexError::FormatMismatch(_))));
        assert_eq!(index.get(0).unwrap(), IndexList::EMPTY);
    }
}
