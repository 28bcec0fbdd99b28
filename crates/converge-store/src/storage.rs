use crate::{
    Change, OrphanDisk, OrphanSnapshot, PersistentDisk, Result, Snapshot, StoreError,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Repository over the persisted disk records.
#[async_trait]
pub trait DiskStore: Send + Sync {
    /// Disks owned by an instance, in insertion order.
    async fn persistent_disks(&self, instance_id: Uuid) -> Result<Vec<PersistentDisk>>;
    async fn find_persistent_disk(&self, disk_cid: &str) -> Result<Option<PersistentDisk>>;
    async fn snapshots(&self, persistent_disk_id: Uuid) -> Result<Vec<Snapshot>>;
    /// All orphan disks, oldest orphan first.
    async fn orphan_disks(&self) -> Result<Vec<OrphanDisk>>;
    async fn find_orphan_disk(&self, disk_cid: &str) -> Result<Option<OrphanDisk>>;
    async fn orphan_snapshots(&self, orphan_disk_id: Uuid) -> Result<Vec<OrphanSnapshot>>;

    /// Apply a batch of changes atomically.
    async fn commit(&self, changes: Vec<Change>) -> Result<()>;

    async fn apply(&self, change: Change) -> Result<()> {
        self.commit(vec![change]).await
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub persistent_disks: usize,
    pub snapshots: usize,
    pub orphan_disks: usize,
    pub orphan_snapshots: usize,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    disks: Vec<PersistentDisk>,
    snapshots: Vec<Snapshot>,
    orphan_disks: Vec<OrphanDisk>,
    orphan_snapshots: Vec<OrphanSnapshot>,
}

impl Tables {
    fn apply(&mut self, change: Change) -> Result<()> {
        match change {
            Change::InsertDisk(disk) => {
                if self.disks.iter().any(|d| d.disk_cid == disk.disk_cid) {
                    return Err(unique("PersistentDisk", "disk_cid", &disk.disk_cid));
                }
                self.disks.push(disk);
            }
            Change::SetDiskActive { disk_id, active } => {
                let disk = self
                    .disks
                    .iter_mut()
                    .find(|d| d.id == disk_id)
                    .ok_or(StoreError::NotFound {
                        entity: "PersistentDisk",
                        id: disk_id,
                    })?;
                disk.active = active;
            }
            Change::DeleteDisk { disk_id } => {
                let before = self.disks.len();
                self.disks.retain(|d| d.id != disk_id);
                if self.disks.len() == before {
                    return Err(StoreError::NotFound {
                        entity: "PersistentDisk",
                        id: disk_id,
                    });
                }
                self.snapshots.retain(|s| s.persistent_disk_id != disk_id);
            }
            Change::InsertSnapshot(snapshot) => {
                if !self.disks.iter().any(|d| d.id == snapshot.persistent_disk_id) {
                    return Err(StoreError::InvalidReference {
                        entity: "Snapshot",
                        target: "PersistentDisk",
                        id: snapshot.persistent_disk_id,
                    });
                }
                if self
                    .snapshots
                    .iter()
                    .any(|s| s.snapshot_cid == snapshot.snapshot_cid)
                {
                    return Err(unique("Snapshot", "snapshot_cid", &snapshot.snapshot_cid));
                }
                self.snapshots.push(snapshot);
            }
            Change::DeleteSnapshot { snapshot_id } => {
                let before = self.snapshots.len();
                self.snapshots.retain(|s| s.id != snapshot_id);
                if self.snapshots.len() == before {
                    return Err(StoreError::NotFound {
                        entity: "Snapshot",
                        id: snapshot_id,
                    });
                }
            }
            Change::InsertOrphanDisk(orphan) => {
                if self
                    .orphan_disks
                    .iter()
                    .any(|o| o.disk_cid == orphan.disk_cid)
                {
                    return Err(unique("OrphanDisk", "disk_cid", &orphan.disk_cid));
                }
                self.orphan_disks.push(orphan);
            }
            Change::InsertOrphanSnapshot(orphan) => {
                if !self.orphan_disks.iter().any(|o| o.id == orphan.orphan_disk_id) {
                    return Err(StoreError::InvalidReference {
                        entity: "OrphanSnapshot",
                        target: "OrphanDisk",
                        id: orphan.orphan_disk_id,
                    });
                }
                if self
                    .orphan_snapshots
                    .iter()
                    .any(|o| o.snapshot_cid == orphan.snapshot_cid)
                {
                    return Err(unique(
                        "OrphanSnapshot",
                        "snapshot_cid",
                        &orphan.snapshot_cid,
                    ));
                }
                self.orphan_snapshots.push(orphan);
            }
            Change::DeleteOrphanDisk { orphan_disk_id } => {
                let before = self.orphan_disks.len();
                self.orphan_disks.retain(|o| o.id != orphan_disk_id);
                if self.orphan_disks.len() == before {
                    return Err(StoreError::NotFound {
                        entity: "OrphanDisk",
                        id: orphan_disk_id,
                    });
                }
                self.orphan_snapshots
                    .retain(|o| o.orphan_disk_id != orphan_disk_id);
            }
        }
        Ok(())
    }
}

fn unique(entity: &'static str, field: &'static str, value: &str) -> StoreError {
    StoreError::UniqueViolation {
        entity,
        field,
        value: value.to_string(),
    }
}

// In-memory storage implementation for development/testing.
// Commits stage every change on a copy of the tables and swap it in only
// once the whole batch has applied.
#[derive(Default)]
pub struct InMemoryDiskStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDiskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn counts(&self) -> StoreCounts {
        let tables = self.tables.read().await;
        StoreCounts {
            persistent_disks: tables.disks.len(),
            snapshots: tables.snapshots.len(),
            orphan_disks: tables.orphan_disks.len(),
            orphan_snapshots: tables.orphan_snapshots.len(),
        }
    }

    pub async fn all_persistent_disks(&self) -> Vec<PersistentDisk> {
        self.tables.read().await.disks.clone()
    }

    pub async fn all_orphan_snapshots(&self) -> Vec<OrphanSnapshot> {
        self.tables.read().await.orphan_snapshots.clone()
    }
}

#[async_trait]
impl DiskStore for InMemoryDiskStore {
    async fn persistent_disks(&self, instance_id: Uuid) -> Result<Vec<PersistentDisk>> {
        Ok(self
            .tables
            .read()
            .await
            .disks
            .iter()
            .filter(|d| d.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn find_persistent_disk(&self, disk_cid: &str) -> Result<Option<PersistentDisk>> {
        Ok(self
            .tables
            .read()
            .await
            .disks
            .iter()
            .find(|d| d.disk_cid == disk_cid)
            .cloned())
    }

    async fn snapshots(&self, persistent_disk_id: Uuid) -> Result<Vec<Snapshot>> {
        Ok(self
            .tables
            .read()
            .await
            .snapshots
            .iter()
            .filter(|s| s.persistent_disk_id == persistent_disk_id)
            .cloned()
            .collect())
    }

    async fn orphan_disks(&self) -> Result<Vec<OrphanDisk>> {
        let mut orphans = self.tables.read().await.orphan_disks.clone();
        // stable: equal timestamps keep insertion order
        orphans.sort_by_key(|o| o.orphaned_at);
        Ok(orphans)
    }

    async fn find_orphan_disk(&self, disk_cid: &str) -> Result<Option<OrphanDisk>> {
        Ok(self
            .tables
            .read()
            .await
            .orphan_disks
            .iter()
            .find(|o| o.disk_cid == disk_cid)
            .cloned())
    }

    async fn orphan_snapshots(&self, orphan_disk_id: Uuid) -> Result<Vec<OrphanSnapshot>> {
        Ok(self
            .tables
            .read()
            .await
            .orphan_snapshots
            .iter()
            .filter(|o| o.orphan_disk_id == orphan_disk_id)
            .cloned()
            .collect())
    }

    async fn commit(&self, changes: Vec<Change>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let total = changes.len();
        let deletes = changes.iter().filter(|c| c.is_delete()).count();

        for change in changes {
            let entity = change.entity();
            staged.apply(change).map_err(|e| {
                debug!(entity, error = %e, "Rolling back disk store transaction");
                e
            })?;
        }

        *tables = staged;
        debug!(total, deletes, "Committed disk store transaction");
        Ok(())
    }
}
