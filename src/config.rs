//! Type index configuration
//!
//! Runtime knobs for a graph's type index and its heap.
//!
//! # Example
//! ```ignore
//! use typeindex::config::{TypeIndexConfig, Durability};
//!
//! let config = TypeIndexConfig::new(256).durability(Durability::Sync);
//! let config = TypeIndexConfig::from_json_str(r#"{"max_node_types": 64}"#)?;
//! ```

use serde::Deserialize;

use crate::error::{Result, TypeIndexError};
use crate::types::DEFAULT_MAX_NODE_TYPES;

/// When slot and heap writes reach stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Pages are written back by the OS and flushed on close - DEFAULT
    #[default]
    Deferred,

    /// Every push/remove flushes the touched heap and slot ranges before returning
    Sync,
}

impl Durability {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "deferred" | "async" | "lazy" => Durability::Deferred,
            "sync" | "durable" | "fsync" => Durability::Sync,
            _ => Durability::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TypeIndexConfig {
    /// Size of the type universe; only used when creating a new graph
    pub max_node_types: u32,
    pub durability: Durability,
    /// Initial heap file size in bytes
    pub heap_initial_bytes: u64,
    /// Upper bound for heap growth; `None` grows until the filesystem refuses
    pub heap_max_bytes: Option<u64>,
}

impl Default for TypeIndexConfig {
    fn default() -> Self {
        Self {
            max_node_types: DEFAULT_MAX_NODE_TYPES,
            durability: Durability::default(),
            heap_initial_bytes: 1024 * 1024,
            heap_max_bytes: None,
        }
    }
}

impl TypeIndexConfig {
    pub fn new(max_node_types: u32) -> Self {
        Self {
            max_node_types,
            ..Default::default()
        }
    }

    pub fn durability(mut self, durability: Durability) -> Self {
        self.durability = durability;
        self
    }

    pub fn heap_initial_bytes(mut self, bytes: u64) -> Self {
        self.heap_initial_bytes = bytes;
        self
    }

    pub fn heap_max_bytes(mut self, bytes: u64) -> Self {
        self.heap_max_bytes = Some(bytes);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TypeIndexError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_node_types == 0 {
            return Err(TypeIndexError::InvalidConfig("max_node_types must be at least 1".into()));
        }
        if let Some(max) = self.heap_max_bytes {
            if max < self.heap_initial_bytes {
                return Err(TypeIndexError::InvalidConfig(format!(
                    "heap_max_bytes ({}) is below heap_initial_bytes ({})",
                    max, self.heap_initial_bytes
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durability_from_str() {
        assert_eq!(Durability::from_str("SYNC"), Durability::Sync);
        assert_eq!(Durability::from_str("fsync"), Durability::Sync);
        assert_eq!(Durability::from_str("off"), Durability::Deferred);
        assert_eq!(Durability::from_str("whatever"), Durability::Deferred);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = TypeIndexConfig::from_json_str(r#"{"max_node_types": 8, "durability": "sync"}"#).unwrap();
        assert_eq!(config.max_node_types, 8);
        assert_eq!(config.durability, Durability::Sync);
        assert_eq!(config.heap_initial_bytes, TypeIndexConfig::default().heap_initial_bytes);
        assert!(config.heap_max_bytes.is_none());
    }

    #[test]
    fn test_rejects_zero_types() {
        let err = TypeIndexConfig::from_json_str(r#"{"max_node_types": 0}"#).unwrap_err();
        assert!(matches!(err, TypeIndexError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_max_below_initial() {
        let config = TypeIndexConfig::default().heap_initial_bytes(4096).heap_max_bytes(1024);
        assert!(config.validate().is_err());
    }
}
