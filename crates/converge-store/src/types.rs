use chrono::{DateTime, Utc};
use converge_common::CloudProperties;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent disk owned by an instance. At most one per instance is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentDisk {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub disk_cid: String,
    /// Size in MB.
    pub size: u64,
    pub cloud_properties: CloudProperties,
    pub active: bool,
}

impl PersistentDisk {
    /// New, inactive disk record.
    pub fn new(
        instance_id: Uuid,
        disk_cid: impl Into<String>,
        size: u64,
        cloud_properties: CloudProperties,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            disk_cid: disk_cid.into(),
            size,
            cloud_properties,
            active: false,
        }
    }

    pub fn activated(mut self) -> Self {
        self.active = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub persistent_disk_id: Uuid,
    pub snapshot_cid: String,
    pub clean: bool,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(persistent_disk_id: Uuid, snapshot_cid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            persistent_disk_id,
            snapshot_cid: snapshot_cid.into(),
            clean: false,
            created_at: Utc::now(),
        }
    }
}

/// Disk kept for deferred cloud-side deletion after leaving its instance.
///
/// Carries the instance metadata that would otherwise be lost once the
/// owning instance is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanDisk {
    pub id: Uuid,
    pub disk_cid: String,
    pub size: Option<u64>,
    pub availability_zone: Option<String>,
    pub deployment_name: String,
    pub instance_name: String,
    pub cloud_properties: Option<CloudProperties>,
    pub orphaned_at: DateTime<Utc>,
}

impl OrphanDisk {
    pub fn new(
        disk_cid: impl Into<String>,
        deployment_name: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            disk_cid: disk_cid.into(),
            size: None,
            availability_zone: None,
            deployment_name: deployment_name.into(),
            instance_name: instance_name.into(),
            cloud_properties: None,
            orphaned_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanSnapshot {
    pub id: Uuid,
    pub orphan_disk_id: Uuid,
    pub snapshot_cid: String,
    pub clean: bool,
    /// When the original snapshot was taken.
    pub snapshot_created_at: DateTime<Utc>,
    pub orphaned_at: DateTime<Utc>,
}

impl OrphanSnapshot {
    pub fn from_snapshot(orphan_disk_id: Uuid, snapshot: &Snapshot, orphaned_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            orphan_disk_id,
            snapshot_cid: snapshot.snapshot_cid.clone(),
            clean: snapshot.clean,
            snapshot_created_at: snapshot.created_at,
            orphaned_at,
        }
    }
}
