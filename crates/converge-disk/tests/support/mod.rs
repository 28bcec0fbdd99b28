//! Recording fakes for the cloud, agent and VM recreator.
//!
//! All fakes share one call log so tests can assert on the exact order of
//! collaborator calls across the cloud and the agent.
#![allow(dead_code)]

use async_trait::async_trait;
use converge_common::{
    AgentClient, AgentError, CloudError, CloudProperties, CloudProvider, DiskSpec, InstancePlan,
    RecreateError, VmRecreator,
};
use converge_disk::DiskManager;
use converge_store::{Change, DiskStore, InMemoryDiskStore, PersistentDisk, Snapshot};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const VM_CID: &str = "vm234";
pub const NEW_DISK_CID: &str = "new-disk-cid";

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateDisk {
        size: u64,
        cloud_properties: CloudProperties,
        vm_cid: String,
    },
    AttachDisk { vm_cid: String, disk_cid: String },
    DetachDisk { vm_cid: String, disk_cid: String },
    DeleteDisk(String),
    DeleteSnapshot(String),
    ListDisk,
    MountDisk { vm_cid: String, disk_cid: String },
    UnmountDisk { vm_cid: String, disk_cid: String },
    MigrateDisk { old: String, new: String },
    RecreateVm { disk_cid: String },
}

impl Call {
    pub fn attach(vm_cid: &str, disk_cid: &str) -> Self {
        Call::AttachDisk {
            vm_cid: vm_cid.to_string(),
            disk_cid: disk_cid.to_string(),
        }
    }

    pub fn detach(vm_cid: &str, disk_cid: &str) -> Self {
        Call::DetachDisk {
            vm_cid: vm_cid.to_string(),
            disk_cid: disk_cid.to_string(),
        }
    }

    pub fn mount(vm_cid: &str, disk_cid: &str) -> Self {
        Call::MountDisk {
            vm_cid: vm_cid.to_string(),
            disk_cid: disk_cid.to_string(),
        }
    }

    pub fn unmount(vm_cid: &str, disk_cid: &str) -> Self {
        Call::UnmountDisk {
            vm_cid: vm_cid.to_string(),
            disk_cid: disk_cid.to_string(),
        }
    }

    pub fn migrate(old: &str, new: &str) -> Self {
        Call::MigrateDisk {
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(self, Call::CreateDisk { .. })
    }

    pub fn is_attach(&self) -> bool {
        matches!(self, Call::AttachDisk { .. })
    }
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

pub struct FakeCloud {
    calls: CallLog,
    pub created_disk_cid: String,
    /// Failures returned by successive attach calls; empty means success.
    pub attach_failures: Mutex<VecDeque<CloudError>>,
    pub delete_disk_failures: Mutex<HashMap<String, CloudError>>,
    pub delete_snapshot_failures: Mutex<HashMap<String, CloudError>>,
    pub detach_failure: Mutex<Option<CloudError>>,
}

impl FakeCloud {
    pub async fn fail_attach(&self, err: CloudError) {
        self.attach_failures.lock().await.push_back(err);
    }

    pub async fn fail_delete_disk(&self, disk_cid: &str, err: CloudError) {
        self.delete_disk_failures
            .lock()
            .await
            .insert(disk_cid.to_string(), err);
    }

    pub async fn fail_delete_snapshot(&self, snapshot_cid: &str, err: CloudError) {
        self.delete_snapshot_failures
            .lock()
            .await
            .insert(snapshot_cid.to_string(), err);
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn create_disk(
        &self,
        size: u64,
        cloud_properties: &CloudProperties,
        vm_cid: &str,
    ) -> Result<String, CloudError> {
        self.calls.lock().await.push(Call::CreateDisk {
            size,
            cloud_properties: cloud_properties.clone(),
            vm_cid: vm_cid.to_string(),
        });
        Ok(self.created_disk_cid.clone())
    }

    async fn attach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError> {
        self.calls.lock().await.push(Call::attach(vm_cid, disk_cid));
        match self.attach_failures.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn detach_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), CloudError> {
        self.calls.lock().await.push(Call::detach(vm_cid, disk_cid));
        match self.detach_failure.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_disk(&self, disk_cid: &str) -> Result<(), CloudError> {
        self.calls
            .lock()
            .await
            .push(Call::DeleteDisk(disk_cid.to_string()));
        match self.delete_disk_failures.lock().await.get(disk_cid) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn delete_snapshot(&self, snapshot_cid: &str) -> Result<(), CloudError> {
        self.calls
            .lock()
            .await
            .push(Call::DeleteSnapshot(snapshot_cid.to_string()));
        match self.delete_snapshot_failures.lock().await.get(snapshot_cid) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct FakeAgent {
    calls: CallLog,
    pub disks: Mutex<Vec<String>>,
    pub mount_failure: Mutex<Option<AgentError>>,
    pub unmount_failure: Mutex<Option<AgentError>>,
    pub migrate_failure: Mutex<Option<AgentError>>,
}

impl FakeAgent {
    pub async fn report_disks(&self, disks: &[&str]) {
        *self.disks.lock().await = disks.iter().map(|d| d.to_string()).collect();
    }
}

#[async_trait]
impl AgentClient for FakeAgent {
    async fn list_disk(&self, _vm_cid: &str) -> Result<Vec<String>, AgentError> {
        self.calls.lock().await.push(Call::ListDisk);
        Ok(self.disks.lock().await.clone())
    }

    async fn mount_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), AgentError> {
        self.calls.lock().await.push(Call::mount(vm_cid, disk_cid));
        if let Some(err) = self.mount_failure.lock().await.take() {
            return Err(err);
        }
        let mut disks = self.disks.lock().await;
        if !disks.iter().any(|d| d == disk_cid) {
            disks.push(disk_cid.to_string());
        }
        Ok(())
    }

    async fn unmount_disk(&self, vm_cid: &str, disk_cid: &str) -> Result<(), AgentError> {
        self.calls.lock().await.push(Call::unmount(vm_cid, disk_cid));
        if let Some(err) = self.unmount_failure.lock().await.take() {
            return Err(err);
        }
        self.disks.lock().await.retain(|d| d != disk_cid);
        Ok(())
    }

    async fn migrate_disk(
        &self,
        _vm_cid: &str,
        old_disk_cid: &str,
        new_disk_cid: &str,
    ) -> Result<(), AgentError> {
        self.calls
            .lock()
            .await
            .push(Call::migrate(old_disk_cid, new_disk_cid));
        match self.migrate_failure.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct FakeRecreator {
    calls: CallLog,
    pub new_vm_cid: String,
    pub failure: Mutex<Option<RecreateError>>,
}

#[async_trait]
impl VmRecreator for FakeRecreator {
    async fn recreate_vm(
        &self,
        _plan: &InstancePlan,
        disk_cid: &str,
    ) -> Result<String, RecreateError> {
        self.calls.lock().await.push(Call::RecreateVm {
            disk_cid: disk_cid.to_string(),
        });
        match self.failure.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(self.new_vm_cid.clone()),
        }
    }
}

pub struct Harness {
    pub calls: CallLog,
    pub cloud: Arc<FakeCloud>,
    pub agent: Arc<FakeAgent>,
    pub recreator: Arc<FakeRecreator>,
    pub store: Arc<InMemoryDiskStore>,
}

impl Harness {
    pub fn new() -> Self {
        converge_common::telemetry::init_for_tests();
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            cloud: Arc::new(FakeCloud {
                calls: calls.clone(),
                created_disk_cid: NEW_DISK_CID.to_string(),
                attach_failures: Mutex::new(VecDeque::new()),
                delete_disk_failures: Mutex::new(HashMap::new()),
                delete_snapshot_failures: Mutex::new(HashMap::new()),
                detach_failure: Mutex::new(None),
            }),
            agent: Arc::new(FakeAgent {
                calls: calls.clone(),
                disks: Mutex::new(Vec::new()),
                mount_failure: Mutex::new(None),
                unmount_failure: Mutex::new(None),
                migrate_failure: Mutex::new(None),
            }),
            recreator: Arc::new(FakeRecreator {
                calls: calls.clone(),
                new_vm_cid: VM_CID.to_string(),
                failure: Mutex::new(None),
            }),
            store: Arc::new(InMemoryDiskStore::new()),
            calls,
        }
    }

    pub fn manager(&self) -> DiskManager {
        DiskManager::new(self.cloud.clone(), self.agent.clone(), self.store.clone())
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Insert a disk record owned by `instance_id`.
    pub async fn seed_disk(
        &self,
        instance_id: Uuid,
        disk_cid: &str,
        size: u64,
        active: bool,
    ) -> PersistentDisk {
        let mut disk = PersistentDisk::new(instance_id, disk_cid, size, props());
        disk.active = active;
        self.store
            .apply(Change::InsertDisk(disk.clone()))
            .await
            .expect("seed disk");
        disk
    }

    pub async fn seed_snapshot(&self, disk: &PersistentDisk, snapshot_cid: &str) -> Snapshot {
        let snapshot = Snapshot::new(disk.id, snapshot_cid);
        self.store
            .apply(Change::InsertSnapshot(snapshot.clone()))
            .await
            .expect("seed snapshot");
        snapshot
    }

    pub async fn disk_cids(&self, instance_id: Uuid) -> Vec<(String, bool)> {
        self.store
            .persistent_disks(instance_id)
            .await
            .expect("query disks")
            .into_iter()
            .map(|d| (d.disk_cid, d.active))
            .collect()
    }
}

pub fn props() -> CloudProperties {
    let mut props = CloudProperties::new();
    props.insert("cloud".to_string(), json!("properties"));
    props
}

pub fn plan(desired_size: Option<u64>) -> InstancePlan {
    InstancePlan {
        instance_id: Uuid::new_v4(),
        job_name: "job-name".to_string(),
        index: 1,
        deployment_name: "fake-deployment".to_string(),
        availability_zone: Some("z1".to_string()),
        vm_cid: VM_CID.to_string(),
        desired_disk: desired_size.map(|size| DiskSpec::new(size, props())),
        disk_currently_attached: true,
    }
}

/// Log sink for asserting on emitted tracing output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut inner) = self.0.lock() {
            inner.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Capture logs for the current thread until the guard drops.
pub fn capture_logs() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}
