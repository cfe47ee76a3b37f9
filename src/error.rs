use std::io;
use thiserror::Error;

use crate::types::TypeId;

pub type Result<T> = std::result::Result<T, TypeIndexError>;

#[derive(Debug, Error)]
pub enum TypeIndexError {
    #[error("type id {type_id} out of range (type count {type_count})")]
    InvalidTypeId { type_id: TypeId, type_count: u32 },
    #[error("heap allocation of {size} bytes failed: {reason}")]
    HeapAllocationFailure { size: usize, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("format mismatch: {0}")]
    FormatMismatch(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl TypeIndexError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        TypeIndexError::FormatMismatch(msg.into())
    }
}
