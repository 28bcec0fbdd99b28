use converge_common::{AgentError, CloudError, RecreateError};
use converge_store::StoreError;
use thiserror::Error;

mod manager;
mod orphan;

pub use converge_common as common;
pub use converge_store as store;
pub use manager::DiskManager;

// --- Custom Error Type ---
// Collaborator failures pass through unchanged so callers can match on the
// root cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiskError {
    #[error("`{instance}' has invalid disks: agent reports `{reported}' while director record shows `{recorded}'")]
    AgentDiskOutOfSync {
        instance: String,
        reported: String,
        recorded: String,
    },
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Recreate(#[from] RecreateError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, DiskError>;
