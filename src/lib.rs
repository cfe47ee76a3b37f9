// typeindex v0.1.0 - Persistent per-type node index for graph databases
// mmap directory of list descriptors + growable persistent heap

pub mod config;
pub mod error;
pub mod graph;
pub mod heap;
pub mod hooks;
pub mod list;
pub mod table;
pub mod type_index;
pub mod types;

// Re-export main types
pub use config::{Durability, TypeIndexConfig};
pub use error::{Result, TypeIndexError};
pub use graph::Graph;
pub use heap::{Heap, MemoryHeap, MmapHeap};
pub use hooks::{add_to_type_index, get_type_index_list, remove_from_type_index, TypeIndexed};
pub use list::{IndexList, IndexListIter};
pub use table::{SlotGuard, TypeIndexTable};
pub use type_index::{TypeIndex, TypeIndexStats, TypeListSnapshot};
pub use types::{Address, NodeUuid, TypeId, DEFAULT_MAX_NODE_TYPES, INDEX_LIST_BYTES};
