//! Persistent disk reconciliation for a single instance.
//!
//! [`DiskManager::update_persistent_disk`] drives one instance from its
//! current disk to the desired one: re-attach a detached disk, check the
//! agent agrees with the records, provision and attach a replacement,
//! mount it, migrate data, flip the active flag, then retire the old disk. Once a replacement disk
//! record exists, every failure path removes it again before returning the
//! original error.

use std::sync::Arc;

use converge_common::{
    AgentClient, CloudError, CloudProvider, ConvergeConfig, DiskSpec, InstancePlan, VmRecreator,
};
use converge_store::{Change, DiskStore, PersistentDisk};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{DiskError, Result};

/// What a reconciliation pass has to do for an instance.
#[derive(Debug, PartialEq)]
enum DiskChange<'a> {
    Unchanged,
    Replace(&'a DiskSpec),
    Remove,
}

fn disk_change<'a>(plan: &'a InstancePlan, active: Option<&PersistentDisk>) -> DiskChange<'a> {
    match (plan.requested_disk(), active) {
        (None, None) => DiskChange::Unchanged,
        (None, Some(_)) => DiskChange::Remove,
        (Some(spec), None) => DiskChange::Replace(spec),
        (Some(spec), Some(disk)) => {
            if spec.size == disk.size && spec.cloud_properties == disk.cloud_properties {
                DiskChange::Unchanged
            } else {
                DiskChange::Replace(spec)
            }
        }
    }
}

/// How far a replacement disk got before a step failed.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Provisioned {
    Recorded,
    Attached,
    Mounted,
}

#[derive(Clone)]
pub struct DiskManager {
    pub(crate) cloud: Arc<dyn CloudProvider>,
    pub(crate) agent: Arc<dyn AgentClient>,
    pub(crate) store: Arc<dyn DiskStore>,
    pub(crate) config: ConvergeConfig,
}

impl DiskManager {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        agent: Arc<dyn AgentClient>,
        store: Arc<dyn DiskStore>,
    ) -> Self {
        Self {
            cloud,
            agent,
            store,
            config: ConvergeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConvergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConvergeConfig {
        &self.config
    }

    /// Reconcile the instance's persistent disk with its desired disk.
    ///
    /// `recreator` is only consulted when attaching a new disk reports a
    /// retryable capacity error.
    #[instrument(skip(self, plan, recreator), fields(instance = %plan, vm_cid = %plan.vm_cid))]
    pub async fn update_persistent_disk(
        &self,
        plan: &InstancePlan,
        recreator: Option<&dyn VmRecreator>,
    ) -> Result<()> {
        let disks = self.store.persistent_disks(plan.instance_id).await?;
        let active = disks.iter().find(|d| d.active);

        // A detached disk is invisible to the agent until it is mounted again.
        if let Some(disk) = active {
            if !plan.disk_currently_attached {
                self.attach_existing_disk(plan, disk).await?;
            }
        }

        self.check_persistent_disk(plan, &disks).await?;

        match disk_change(plan, active) {
            DiskChange::Unchanged => Ok(()),
            DiskChange::Remove => {
                // Remove is only produced with an active disk present.
                let Some(old) = active else { return Ok(()) };
                info!(disk_cid = %old.disk_cid, "Persistent disk no longer desired");
                // The record stays active until the disk is unmounted and
                // detached, so a failed pass is retried from the same state.
                self.retire_disk(&plan.vm_cid, old).await
            }
            DiskChange::Replace(spec) => self.replace_disk(plan, spec, active, recreator).await,
        }
    }

    /// Fail if the agent does not report the active disk as mounted.
    async fn check_persistent_disk(
        &self,
        plan: &InstancePlan,
        disks: &[PersistentDisk],
    ) -> Result<()> {
        if disks.is_empty() {
            return Ok(());
        }

        let reported = self.agent.list_disk(&plan.vm_cid).await?;

        if let Some(active) = disks.iter().find(|d| d.active) {
            if !reported.contains(&active.disk_cid) {
                let err = DiskError::AgentDiskOutOfSync {
                    instance: plan.to_string(),
                    reported: reported.join(", "),
                    recorded: active.disk_cid.clone(),
                };
                error!(error = %err, "Agent disk list disagrees with records");
                return Err(err);
            }
        }

        for disk in disks.iter().filter(|d| !d.active) {
            if !reported.contains(&disk.disk_cid) {
                warn!("`{}' has inactive disk {}", plan, disk.disk_cid);
            }
        }

        Ok(())
    }

    async fn attach_existing_disk(&self, plan: &InstancePlan, disk: &PersistentDisk) -> Result<()> {
        info!(disk_cid = %disk.disk_cid, "Attaching existing persistent disk");
        self.cloud.attach_disk(&plan.vm_cid, &disk.disk_cid).await?;
        self.agent.mount_disk(&plan.vm_cid, &disk.disk_cid).await?;
        Ok(())
    }

    async fn replace_disk(
        &self,
        plan: &InstancePlan,
        spec: &DiskSpec,
        old: Option<&PersistentDisk>,
        recreator: Option<&dyn VmRecreator>,
    ) -> Result<()> {
        info!(size = spec.size, "Creating persistent disk");
        let disk_cid = self
            .cloud
            .create_disk(spec.size, &spec.cloud_properties, &plan.vm_cid)
            .await?;

        let new_disk = PersistentDisk::new(
            plan.instance_id,
            disk_cid,
            spec.size,
            spec.cloud_properties.clone(),
        );
        self.store.apply(Change::InsertDisk(new_disk.clone())).await?;

        // The VM may be replaced while attaching.
        let vm_cid = match self.attach_new_disk(plan, &new_disk.disk_cid, recreator).await {
            Ok(vm_cid) => vm_cid,
            Err(err) => {
                error!(disk_cid = %new_disk.disk_cid, error = %err, "Failed to attach new disk");
                self.discard_new_disk(&plan.vm_cid, &new_disk, Provisioned::Recorded)
                    .await;
                return Err(err);
            }
        };

        info!(disk_cid = %new_disk.disk_cid, "Mounting new disk");
        if let Err(err) = self.agent.mount_disk(&vm_cid, &new_disk.disk_cid).await {
            error!(disk_cid = %new_disk.disk_cid, error = %err, "Failed to mount new disk");
            self.discard_new_disk(&vm_cid, &new_disk, Provisioned::Attached)
                .await;
            return Err(err.into());
        }

        if let Some(old) = old {
            info!(from = %old.disk_cid, to = %new_disk.disk_cid, "Migrating disk data");
            if let Err(err) = self
                .agent
                .migrate_disk(&vm_cid, &old.disk_cid, &new_disk.disk_cid)
                .await
            {
                error!(error = %err, "Failed to migrate disk data");
                self.discard_new_disk(&vm_cid, &new_disk, Provisioned::Mounted)
                    .await;
                return Err(err.into());
            }
        }

        let mut switch = vec![Change::SetDiskActive {
            disk_id: new_disk.id,
            active: true,
        }];
        if let Some(old) = old {
            switch.push(Change::SetDiskActive {
                disk_id: old.id,
                active: false,
            });
        }
        if let Err(err) = self.store.commit(switch).await {
            error!(error = %err, "Failed to switch active disk");
            self.discard_new_disk(&vm_cid, &new_disk, Provisioned::Mounted)
                .await;
            return Err(err.into());
        }
        info!(disk_cid = %new_disk.disk_cid, "New persistent disk active");

        match old {
            Some(old) => self.retire_disk(&vm_cid, old).await,
            None => Ok(()),
        }
    }

    /// Attach, recreating the VM and retrying once on a retryable capacity
    /// error. Returns the cid of the VM the disk ended up attached to.
    async fn attach_new_disk(
        &self,
        plan: &InstancePlan,
        disk_cid: &str,
        recreator: Option<&dyn VmRecreator>,
    ) -> Result<String> {
        info!(%disk_cid, "Attaching new disk");
        let err = match self.cloud.attach_disk(&plan.vm_cid, disk_cid).await {
            Ok(()) => return Ok(plan.vm_cid.clone()),
            Err(err) => err,
        };

        let retryable = matches!(err, CloudError::NoDiskSpace { ok_to_retry: true })
            && self.config.recreate_on_no_disk_space;

        match recreator {
            Some(recreator) if retryable => {
                warn!(%disk_cid, "No disk space on attach, recreating VM");
                let vm_cid = recreator.recreate_vm(plan, disk_cid).await?;
                self.cloud.attach_disk(&vm_cid, disk_cid).await?;
                Ok(vm_cid)
            }
            _ => Err(err.into()),
        }
    }

    /// Undo a replacement disk. Cleanup failures are logged; the caller
    /// returns the error that triggered the cleanup.
    async fn discard_new_disk(&self, vm_cid: &str, disk: &PersistentDisk, reached: Provisioned) {
        if reached == Provisioned::Mounted {
            if let Err(err) = self.agent.unmount_disk(vm_cid, &disk.disk_cid).await {
                error!(disk_cid = %disk.disk_cid, error = %err, "Cleanup: unmount failed");
            }
        }
        if reached != Provisioned::Recorded {
            if let Err(err) = self.cloud.detach_disk(vm_cid, &disk.disk_cid).await {
                error!(disk_cid = %disk.disk_cid, error = %err, "Cleanup: detach failed");
            }
        }
        if let Err(err) = self.store.apply(Change::DeleteDisk { disk_id: disk.id }).await {
            error!(disk_cid = %disk.disk_cid, error = %err, "Cleanup: deleting disk record failed");
        }
    }

    /// Unmount, detach and forget a disk. Cloud-side snapshots stay.
    async fn retire_disk(&self, vm_cid: &str, disk: &PersistentDisk) -> Result<()> {
        info!(disk_cid = %disk.disk_cid, "Retiring old persistent disk");
        self.agent.unmount_disk(vm_cid, &disk.disk_cid).await?;
        self.cloud.detach_disk(vm_cid, &disk.disk_cid).await?;
        self.store.apply(Change::DeleteDisk { disk_id: disk.id }).await?;
        Ok(())
    }

    /// Drop every disk and snapshot record of an instance without touching
    /// the cloud or the agent.
    #[instrument(skip(self))]
    pub async fn delete_persistent_disks(&self, instance_id: Uuid) -> Result<()> {
        let changes: Vec<_> = self
            .store
            .persistent_disks(instance_id)
            .await?
            .into_iter()
            .map(|disk| Change::DeleteDisk { disk_id: disk.id })
            .collect();

        if changes.is_empty() {
            return Ok(());
        }
        info!(count = changes.len(), "Deleting persistent disk records");
        self.store.commit(changes).await?;
        Ok(())
    }
}
