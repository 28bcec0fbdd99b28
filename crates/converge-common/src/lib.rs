// Re-export dependencies used in public interfaces of common types

use std::fmt::Display;

use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
use thiserror::Error;
pub use uuid;
use uuid::Uuid;

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, ConvergeConfig};

/// Opaque key/value mapping handed verbatim to the cloud provider.
pub type CloudProperties = serde_json::Map<String, serde_json::Value>;

// --- Collaborator error taxonomy ---

/// Failures reported by the cloud-provider interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("No disk space available (ok to retry: {ok_to_retry})")]
    NoDiskSpace { ok_to_retry: bool },

    #[error("Disk not found: {disk_cid}")]
    DiskNotFound { disk_cid: String, ok_to_retry: bool },

    #[error("Snapshot not found: {snapshot_cid}")]
    SnapshotNotFound { snapshot_cid: String },

    #[error("VM not found: {vm_cid}")]
    VmNotFound { vm_cid: String },

    #[error("Cloud operation `{operation}' failed: {message}")]
    Failed { operation: String, message: String },
}

impl CloudError {
    pub fn failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Failed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by the in-VM agent RPC channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Agent call `{method}' failed: {message}")]
    Rpc { method: String, message: String },

    #[error("Agent call `{method}' timed out")]
    Timeout { method: String },
}

impl AgentError {
    pub fn rpc(method: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::Rpc {
            method: method.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecreateError {
    #[error("Recreating VM for {instance} failed: {message}")]
    Failed { instance: String, message: String },
}

// --- Desired state ---

/// Desired persistent disk for an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Size in MB.
    pub size: u64,
    #[serde(default)]
    pub cloud_properties: CloudProperties,
}

impl DiskSpec {
    pub fn new(size: u64, cloud_properties: CloudProperties) -> Self {
        Self {
            size,
            cloud_properties,
        }
    }

    /// A zero-sized disk type means "no persistent disk".
    pub fn is_requested(&self) -> bool {
        self.size > 0
    }
}

/// Reconciliation record pairing an instance's desired state with what is
/// currently bound to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePlan {
    pub instance_id: Uuid,
    pub job_name: String,
    pub index: u32,
    pub deployment_name: String,
    pub availability_zone: Option<String>,
    pub vm_cid: String,
    pub desired_disk: Option<DiskSpec>,
    /// Whether the instance state reports a persistent disk attached.
    pub disk_currently_attached: bool,
}

impl InstancePlan {
    /// Desired disk, ignoring zero-sized disk types.
    pub fn requested_disk(&self) -> Option<&DiskSpec> {
        self.desired_disk.as_ref().filter(|spec| spec.is_requested())
    }
}

impl Display for InstancePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.job_name, self.index)
    }
}

// --- Collaborator seams ---

/// Cloud-provider interface (CPI).
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create_disk(
        &self,
        size: u64,
        cloud_properties: &CloudProperties,
        vm_cid: &str,
    ) -> Result<String, CloudError>;

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError>;

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError>;

    /// Must report [`CloudError::DiskNotFound`] for disks that no longer exist.
    async fn delete_disk(&self, disk_cid: &str) -> Result<(), CloudError>;

    async fn delete_snapshot(&self, snapshot_cid: &str) -> Result<(), CloudError>;
}

/// RPC channel to the agent running inside an instance's VM.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn list_disk(&self, vm_cid: &str) -> Result<Vec<String>, AgentError>;

    async fn mount_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), AgentError>;

    async fn unmount_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), AgentError>;

    async fn migrate_disk(
        &self,
        vm_cid: &str,
        old_disk_cid: &str,
        new_disk_cid: &str,
    ) -> Result<(), AgentError>;
}

/// Replaces an instance's VM in place so a disk can be attached to it.
#[async_trait]
pub trait VmRecreator: Send + Sync {
    /// Returns the cid of the VM now bound to the instance.
    async fn recreate_vm(&self, plan: &InstancePlan, disk_cid: &str)
        -> Result<String, RecreateError>;
}
