//! IndexList: heap-resident singly-linked list of node ids for one type.
//!
//! The list itself is just its descriptor `{head, count}`; the chain lives in
//! a [`Heap`] and is resolved lazily. Newest entries sit at the head.
//!
//! Every mutating method leaves the descriptor untouched when it returns an
//! error, so callers can keep using their previous copy.

use tracing::warn;

use crate::error::{Result, TypeIndexError};
use crate::heap::Heap;
use crate::types::{
    Address, IndexListNode, NodeUuid, SlotRecord, INDEX_LIST_BYTES, INDEX_LIST_NODE_BYTES,
    SLOT_CRC_SPAN, SLOT_MAGIC, SLOT_VERSION,
};

/// Byte offset of `next` inside a heap node.
const NEXT_OFFSET: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IndexList {
    head: Address,
    count: u64,
}

impl IndexList {
    pub const EMPTY: IndexList = IndexList {
        head: Address::NULL,
        count: 0,
    };

    /// Build a descriptor, rejecting a head/count pair that disagree on emptiness.
    pub fn from_parts(head: Address, count: u64) -> Result<Self> {
        if head.is_null() != (count == 0) {
            return Err(TypeIndexError::format(format!(
                "descriptor head {:?} inconsistent with count {}",
                head, count
            )));
        }
        Ok(Self { head, count })
    }

    pub fn head(&self) -> Address {
        self.head
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Prepend `uuid`. O(1). Returns the new node's address.
    pub fn push<H: Heap + ?Sized>(&mut self, heap: &H, uuid: NodeUuid) -> Result<Address> {
        let addr = heap.allocate(INDEX_LIST_NODE_BYTES)?;
        let node = IndexListNode::new(uuid, self.head);
        if let Err(e) = heap.write(addr, &node.to_bytes()) {
            if let Err(free_err) = heap.free(addr, INDEX_LIST_NODE_BYTES) {
                warn!(%addr, error = %free_err, "index_list.push.rollback_failed");
            }
            return Err(e);
        }
        self.head = addr;
        self.count += 1;
        Ok(addr)
    }

    /// Prepend `uuid` unless it is already in the list. O(n).
    /// Returns whether a node was added.
    pub fn push_unless_present<H: Heap + ?Sized>(&mut self, heap: &H, uuid: NodeUuid) -> Result<bool> {
        if self.contains(heap, uuid)? {
            return Ok(false);
        }
        self.push(heap, uuid)?;
        Ok(true)
    }

    /// Unlink the first occurrence of `uuid`. O(n).
    ///
    /// Returns the unlinked node's address so the caller can hand it back to
    /// the heap once the new descriptor is durable; `None` if absent.
    pub fn remove<H: Heap + ?Sized>(&mut self, heap: &H, uuid: NodeUuid) -> Result<Option<Address>> {
        let mut prev = Address::NULL;
        let mut cur = self.head;

        for _ in 0..self.count {
            let node = read_node(heap, cur, self.count)?;
            if node.uuid() == uuid {
                if prev.is_null() {
                    self.head = node.next();
                } else {
                    let link = Address::new(prev.get() + NEXT_OFFSET);
                    heap.write(link, &node.next().get().to_le_bytes())?;
                }
                self.count -= 1;
                return Ok(Some(cur));
            }
            prev = cur;
            cur = node.next();
        }
        Ok(None)
    }

    pub fn contains<H: Heap + ?Sized>(&self, heap: &H, uuid: NodeUuid) -> Result<bool> {
        for item in self.iter(heap) {
            if item? == uuid {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Lazy head-to-tail sequence of ids, newest first. Call `iter` again to
    /// start over; clone the iterator to resume from the same position.
    ///
    /// Reads the live chain. Only walk it while holding the type's slot lock,
    /// or while nothing removes from this list: a removed node goes back to
    /// the heap and may be reused by any other list.
    pub fn iter<'h, H: Heap + ?Sized>(&self, heap: &'h H) -> IndexListIter<'h, H> {
        IndexListIter {
            heap,
            next: self.head,
            remaining: self.count,
            total: self.count,
        }
    }

    pub fn to_vec<H: Heap + ?Sized>(&self, heap: &H) -> Result<Vec<NodeUuid>> {
        let mut out = Vec::with_capacity(self.count as usize);
        for item in self.iter(heap) {
            out.push(item?);
        }
        Ok(out)
    }

    // ── slot encoding ────────────────────────────────────────────────────────

    pub fn encode(&self) -> [u8; INDEX_LIST_BYTES] {
        let mut record = SlotRecord {
            magic: SLOT_MAGIC.to_le(),
            version: SLOT_VERSION.to_le(),
            flags: 0,
            head: self.head.get().to_le(),
            count: self.count.to_le(),
            ..SlotRecord::default()
        };
        let crc = crc32fast::hash(&bytemuck::bytes_of(&record)[..SLOT_CRC_SPAN]);
        record.crc32 = crc.to_le();
        bytemuck::cast(record)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_LIST_BYTES {
            return Err(TypeIndexError::format(format!(
                "slot is {} bytes, expected {}",
                bytes.len(),
                INDEX_LIST_BYTES
            )));
        }
        let record: SlotRecord = bytemuck::pod_read_unaligned(&bytes[..INDEX_LIST_BYTES]);

        let magic = u32::from_le(record.magic);
        if magic != SLOT_MAGIC {
            return Err(TypeIndexError::format(format!("bad slot magic {:#010x}", magic)));
        }
        let version = u16::from_le(record.version);
        if version != SLOT_VERSION {
            return Err(TypeIndexError::format(format!("unsupported slot version {}", version)));
        }
        let crc = crc32fast::hash(&bytes[..SLOT_CRC_SPAN]);
        if crc != u32::from_le(record.crc32) {
            return Err(TypeIndexError::format("slot checksum mismatch"));
        }

        Self::from_parts(Address::new(u64::from_le(record.head)), u64::from_le(record.count))
    }
}

fn read_node<H: Heap + ?Sized>(heap: &H, addr: Address, count: u64) -> Result<IndexListNode> {
    if addr.is_null() {
        return Err(TypeIndexError::format(format!(
            "chain ends before its recorded count of {}",
            count
        )));
    }
    let mut buf = [0u8; INDEX_LIST_NODE_BYTES];
    heap.read(addr, &mut buf)?;
    Ok(IndexListNode::from_bytes(&buf))
}

/// Iterator over an [`IndexList`]. Yields at most `count` items; a chain that
/// ends early yields one `FormatMismatch` and then stops.
pub struct IndexListIter<'h, H: Heap + ?Sized> {
    heap: &'h H,
    next: Address,
    remaining: u64,
    total: u64,
}

impl<H: Heap + ?Sized> Clone for IndexListIter<'_, H> {
    fn clone(&self) -> Self {
        Self {
            heap: self.heap,
            next: self.next,
            remaining: self.remaining,
            total: self.total,
        }
    }
}

impl<H: Heap + ?Sized> Iterator for IndexListIter<'_, H> {
    type Item = Result<NodeUuid>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match read_node(self.heap, self.next, self.total) {
            Ok(node) => {
                self.remaining -= 1;
                self.next = node.next();
                Some(Ok(node.uuid()))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
