use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TypeIndexConfig;
use crate::error::Result;
use crate::heap::{Heap, MmapHeap};
use crate::type_index::TypeIndex;

const TABLE_FILE: &str = "type_index.tbl";
const HEAP_FILE: &str = "heap.mmap";

/// One open graph directory: the heap holding list nodes and the type index
/// over it. Passed explicitly to the integration hooks.
pub struct Graph {
    heap: Arc<MmapHeap>,
    type_index: TypeIndex,
    config: TypeIndexConfig,
    base_path: PathBuf,
}

impl Graph {
    /// Create a fresh graph under `base_path`. Fails if one already exists there.
    pub fn create(base_path: &Path, config: TypeIndexConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(base_path)?;

        let heap_path = base_path.join(HEAP_FILE);
        let heap = Arc::new(MmapHeap::create(
            &heap_path,
            config.heap_initial_bytes,
            config.heap_max_bytes,
        )?);
        let shared: Arc<dyn Heap> = heap.clone();
        let type_index = match TypeIndex::create(&base_path.join(TABLE_FILE), config.max_node_types, shared) {
            Ok(index) => index.with_durability(config.durability),
            Err(e) => {
                drop(heap);
                // don't leave a heap behind that no table refers to
                if let Err(rm_err) = fs::remove_file(&heap_path) {
                    warn!(path = %heap_path.display(), error = %rm_err, "graph.create.heap_cleanup_failed");
                }
                return Err(e);
            }
        };

        info!(path = %base_path.display(), types = config.max_node_types, "graph.create");
        Ok(Self {
            heap,
            type_index,
            config,
            base_path: base_path.to_path_buf(),
        })
    }

    /// Reopen a graph. `config.max_node_types` is ignored; the table file
    /// decides the type count.
    pub fn open(base_path: &Path, config: TypeIndexConfig) -> Result<Self> {
        config.validate()?;
        let heap = Arc::new(MmapHeap::open(&base_path.join(HEAP_FILE), config.heap_max_bytes)?);
        let shared: Arc<dyn Heap> = heap.clone();
        let type_index = TypeIndex::open(&base_path.join(TABLE_FILE), shared)?
            .with_durability(config.durability);

        info!(
            path = %base_path.display(),
            types = type_index.type_count(),
            "graph.open"
        );
        Ok(Self {
            heap,
            type_index,
            config,
            base_path: base_path.to_path_buf(),
        })
    }

    /// Open the graph at `base_path` if its table exists, otherwise create it.
    pub fn open_or_create(base_path: &Path, config: TypeIndexConfig) -> Result<Self> {
        if base_path.join(TABLE_FILE).exists() {
            Self::open(base_path, config)
        } else {
            Self::create(base_path, config)
        }
    }

    pub fn type_index(&self) -> &TypeIndex {
        &self.type_index
    }

    pub fn heap(&self) -> &MmapHeap {
        &self.heap
    }

    pub fn config(&self) -> &TypeIndexConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn flush(&self) -> Result<()> {
        self.type_index.flush()
    }

    /// Flush and close. The graph cannot be used afterwards.
    pub fn close(self) -> Result<()> {
        self.type_index.close()?;
        debug!(path = %self.base_path.display(), "graph.close");
        Ok(())
    }
}
