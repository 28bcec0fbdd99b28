use chrono::Utc;
use converge_common::{CloudError, InstancePlan};
use converge_store::{Change, OrphanDisk, OrphanSnapshot, PersistentDisk};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::{DiskManager, Result};

impl DiskManager {
    /// Move a disk and its snapshots into the orphan tables in one commit.
    ///
    /// A clash on orphan snapshot cid rolls the whole move back and the
    /// original records stay as they were.
    #[instrument(skip(self, owner, disk), fields(instance = %owner, disk_cid = %disk.disk_cid))]
    pub async fn orphan_disk(&self, owner: &InstancePlan, disk: &PersistentDisk) -> Result<()> {
        let snapshots = self.store.snapshots(disk.id).await?;
        let orphaned_at = Utc::now();

        let orphan = OrphanDisk {
            size: Some(disk.size),
            availability_zone: owner.availability_zone.clone(),
            cloud_properties: Some(disk.cloud_properties.clone()),
            orphaned_at,
            ..OrphanDisk::new(
                disk.disk_cid.clone(),
                owner.deployment_name.clone(),
                owner.to_string(),
            )
        };

        let mut changes = Vec::with_capacity(snapshots.len() + 2);
        changes.push(Change::InsertOrphanDisk(orphan.clone()));
        changes.extend(snapshots.iter().map(|snapshot| {
            Change::InsertOrphanSnapshot(OrphanSnapshot::from_snapshot(
                orphan.id,
                snapshot,
                orphaned_at,
            ))
        }));
        changes.push(Change::DeleteDisk { disk_id: disk.id });

        info!(snapshots = snapshots.len(), "Orphaning disk");
        self.store.commit(changes).await?;
        Ok(())
    }

    /// Orphan disks as flat records. Absent optional values are rendered
    /// with the configured "not applicable" placeholder.
    pub async fn list_orphan_disks(&self) -> Result<Vec<Map<String, Value>>> {
        let na = || Value::String(self.config.not_applicable.clone());

        Ok(self
            .store
            .orphan_disks()
            .await?
            .into_iter()
            .map(|orphan| {
                let mut record = Map::new();
                record.insert("disk_cid".into(), Value::String(orphan.disk_cid));
                record.insert(
                    "size".into(),
                    orphan.size.map(Value::from).unwrap_or_else(na),
                );
                record.insert(
                    "availability_zone".into(),
                    orphan.availability_zone.map(Value::String).unwrap_or_else(na),
                );
                record.insert(
                    "deployment_name".into(),
                    Value::String(orphan.deployment_name),
                );
                record.insert("instance_name".into(), Value::String(orphan.instance_name));
                record.insert(
                    "cloud_properties".into(),
                    orphan.cloud_properties.map(Value::Object).unwrap_or_else(na),
                );
                record.insert(
                    "orphaned_at".into(),
                    Value::String(orphan.orphaned_at.to_rfc3339()),
                );
                record
            })
            .collect())
    }

    /// Delete an orphan disk (and its orphan snapshots) from the cloud, then
    /// drop the records. Objects the cloud no longer knows about count as
    /// deleted.
    #[instrument(skip(self))]
    pub async fn delete_orphan_disk(&self, disk_cid: &str) -> Result<()> {
        let Some(orphan) = self.store.find_orphan_disk(disk_cid).await? else {
            debug!("Orphan disk not found, nothing to delete");
            return Ok(());
        };

        for snapshot in self.store.orphan_snapshots(orphan.id).await? {
            match self.cloud.delete_snapshot(&snapshot.snapshot_cid).await {
                Ok(()) => {}
                Err(CloudError::SnapshotNotFound { .. }) => {
                    warn!(snapshot_cid = %snapshot.snapshot_cid, "Orphan snapshot already gone from cloud");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!("Deleting orphan disk");
        match self.cloud.delete_disk(disk_cid).await {
            Ok(()) => {}
            Err(CloudError::DiskNotFound { .. }) => {
                warn!("Orphan disk already gone from cloud");
            }
            Err(err) => return Err(err.into()),
        }

        self.store
            .apply(Change::DeleteOrphanDisk {
                orphan_disk_id: orphan.id,
            })
            .await?;
        Ok(())
    }
}
