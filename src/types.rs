use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Small integer identifying a declared node type; index into the table.
pub type TypeId = u32;

/// 128-bit node identifier, unique across the whole graph.
pub type NodeUuid = uuid::Uuid;

/// Default size of the type universe when no config overrides it.
pub const DEFAULT_MAX_NODE_TYPES: u32 = 1024;

/// Width of one table slot. Changing it invalidates existing table files.
pub const INDEX_LIST_BYTES: usize = 64;

/// Opaque offset into a [`Heap`](crate::heap::Heap). Zero is never allocated.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u64);

impl Address {
    pub const NULL: Address = Address(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Address(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Address(null)")
        } else {
            write!(f, "Address({:#x})", self.0)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One link of an index list as stored in the heap (24 bytes, little-endian).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct IndexListNode {
    pub uuid: [u8; 16],
    pub next: u64,
}

pub const INDEX_LIST_NODE_BYTES: usize = std::mem::size_of::<IndexListNode>();

impl IndexListNode {
    pub fn new(uuid: NodeUuid, next: Address) -> Self {
        Self {
            uuid: *uuid.as_bytes(),
            next: next.get().to_le(),
        }
    }

    pub fn uuid(&self) -> NodeUuid {
        NodeUuid::from_bytes(self.uuid)
    }

    pub fn next(&self) -> Address {
        Address::new(u64::from_le(self.next))
    }

    pub fn to_bytes(&self) -> [u8; INDEX_LIST_NODE_BYTES] {
        bytemuck::cast(*self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        bytemuck::pod_read_unaligned(&bytes[..INDEX_LIST_NODE_BYTES])
    }
}

/// On-disk slot record. Field values are stored little-endian.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct SlotRecord {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub head: u64,
    pub count: u64,
    pub crc32: u32,
    pub _reserved0: u32,
    pub _reserved: [u64; 4], // Pad to 64 bytes total
}

pub const SLOT_MAGIC: u32 = 0x5449_4458; // "TIDX"
pub const SLOT_VERSION: u16 = 1;

/// Bytes covered by the slot checksum: magic, version, flags, head, count.
pub const SLOT_CRC_SPAN: usize = 24;

const _: () = assert!(std::mem::size_of::<SlotRecord>() == INDEX_LIST_BYTES);
const _: () = assert!(INDEX_LIST_NODE_BYTES == 24);
