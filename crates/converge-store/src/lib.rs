// Disk Record Store - persisted disk, snapshot and orphan bookkeeping
use thiserror::Error;
use uuid::Uuid;

mod change;
mod storage;
mod types;

pub use change::Change;
pub use storage::{DiskStore, InMemoryDiskStore, StoreCounts};
pub use types::*;

// Error Types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Uniqueness violation: {entity}.{field} `{value}' already exists")]
    UniqueViolation {
        entity: &'static str,
        field: &'static str,
        value: String,
    },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("{entity} references missing {target} {id}")]
    InvalidReference {
        entity: &'static str,
        target: &'static str,
        id: Uuid,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
