use uuid::Uuid;

use crate::{OrphanDisk, OrphanSnapshot, PersistentDisk, Snapshot};

/// A single write inside a unit of work.
///
/// A batch of changes is handed to [`crate::DiskStore::commit`] and either
/// every change lands or none does.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertDisk(PersistentDisk),
    SetDiskActive { disk_id: Uuid, active: bool },
    /// Also removes the disk's snapshot records.
    DeleteDisk { disk_id: Uuid },
    InsertSnapshot(Snapshot),
    DeleteSnapshot { snapshot_id: Uuid },
    InsertOrphanDisk(OrphanDisk),
    InsertOrphanSnapshot(OrphanSnapshot),
    /// Also removes the orphan disk's orphan snapshot records.
    DeleteOrphanDisk { orphan_disk_id: Uuid },
}

impl Change {
    /// Name of the record type this change writes.
    pub fn entity(&self) -> &'static str {
        match self {
            Change::InsertDisk(_) | Change::SetDiskActive { .. } | Change::DeleteDisk { .. } => {
                "PersistentDisk"
            }
            Change::InsertSnapshot(_) | Change::DeleteSnapshot { .. } => "Snapshot",
            Change::InsertOrphanDisk(_) | Change::DeleteOrphanDisk { .. } => "OrphanDisk",
            Change::InsertOrphanSnapshot(_) => "OrphanSnapshot",
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Change::DeleteDisk { .. }
                | Change::DeleteSnapshot { .. }
                | Change::DeleteOrphanDisk { .. }
        )
    }
}
