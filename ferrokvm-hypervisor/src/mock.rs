//! Mock control plane for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ControlPlaneError, Result};
use crate::traits::ControlPlane;
use crate::types::*;

/// One recorded control-plane call.
///
/// The mock logs every primitive invocation so tests can assert the
/// exact sequence a coordinator issued, including that no mutation
/// happened before a validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallRecord {
    ResolveVm { name: String },
    ListDisks { vm: String },
    LiveDescriptor { vm: String },
    LookupSnapshot { vm: String, name: String },
    DefineSnapshot { vm: String, xml: String, flags: u32 },
    DeleteSnapshot { vm: String, snapshot: String, mode: u32 },
    RevertToSnapshot { vm: String, snapshot: String },
    StopVm { vm: String },
}

impl CallRecord {
    /// Whether this call mutates control-plane state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            CallRecord::DefineSnapshot { .. }
                | CallRecord::DeleteSnapshot { .. }
                | CallRecord::RevertToSnapshot { .. }
                | CallRecord::StopVm { .. }
        )
    }
}

struct MockVm {
    id: String,
    disks: Vec<DiskDescriptor>,
    live_xml: String,
    snapshots: Vec<SnapshotHandle>,
    running: bool,
}

/// In-memory control plane that records every call.
///
/// Simulates the hypervisor control plane without libvirt. Useful for:
/// - Unit and integration testing of the snapshot coordinator
/// - Development without libvirt installed
///
/// Failure injection:
/// - [`drop_snapshot_metadata`] simulates libvirt forgetting all
///   snapshots for a VM (power-off, migration).
/// - [`fail_define_snapshot`] makes every subsequent define call fail,
///   for exercising rebuild-failure paths.
///
/// [`drop_snapshot_metadata`]: MockControlPlane::drop_snapshot_metadata
/// [`fail_define_snapshot`]: MockControlPlane::fail_define_snapshot
pub struct MockControlPlane {
    vms: RwLock<HashMap<String, MockVm>>,
    calls: RwLock<Vec<CallRecord>>,
    define_failure: RwLock<Option<String>>,
}

impl MockControlPlane {
    /// Create an empty mock control plane.
    pub fn new() -> Self {
        info!("Creating mock control plane");
        Self {
            vms: RwLock::new(HashMap::new()),
            calls: RwLock::new(Vec::new()),
            define_failure: RwLock::new(None),
        }
    }

    /// Register a VM with the given attached disks.
    pub fn add_vm(&self, name: &str, disks: Vec<DiskDescriptor>) {
        let id = uuid::Uuid::new_v4().to_string();
        let live_xml = format!(
            "<domain type='kvm'><name>{}</name><uuid>{}</uuid></domain>",
            name, id
        );
        let mut vms = self.vms.write().expect("lock poisoned");
        vms.insert(
            name.to_string(),
            MockVm {
                id,
                disks,
                live_xml,
                snapshots: Vec::new(),
                running: true,
            },
        );
    }

    /// Seed snapshot metadata for a VM, as if a snapshot had been
    /// taken earlier.
    pub fn add_snapshot(&self, vm_name: &str, snapshot_name: &str) {
        let mut vms = self.vms.write().expect("lock poisoned");
        if let Some(vm) = vms.get_mut(vm_name) {
            vm.snapshots.push(SnapshotHandle {
                name: snapshot_name.to_string(),
                id: uuid::Uuid::new_v4().to_string(),
            });
        }
    }

    /// Forget all snapshot metadata for a VM. The underlying storage
    /// deltas are assumed to still exist; only the control plane's
    /// records are gone.
    pub fn drop_snapshot_metadata(&self, vm_name: &str) {
        let mut vms = self.vms.write().expect("lock poisoned");
        if let Some(vm) = vms.get_mut(vm_name) {
            vm.snapshots.clear();
        }
    }

    /// Make every subsequent define call fail with the given reason.
    pub fn fail_define_snapshot(&self, reason: &str) {
        *self.define_failure.write().expect("lock poisoned") = Some(reason.to_string());
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.read().expect("lock poisoned").clone()
    }

    /// Number of recorded calls that mutate control-plane state.
    pub fn mutation_count(&self) -> usize {
        self.calls().iter().filter(|c| c.is_mutation()).count()
    }

    /// Whether the VM is currently running.
    pub fn vm_running(&self, vm_name: &str) -> bool {
        self.vms
            .read()
            .expect("lock poisoned")
            .get(vm_name)
            .map(|vm| vm.running)
            .unwrap_or(false)
    }

    /// Snapshot names currently known for a VM.
    pub fn snapshot_names(&self, vm_name: &str) -> Vec<String> {
        self.vms
            .read()
            .expect("lock poisoned")
            .get(vm_name)
            .map(|vm| vm.snapshots.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: CallRecord) -> Result<()> {
        self.calls
            .write()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?
            .push(call);
        Ok(())
    }
}

impl Default for MockControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the text of the first `<name>` element from descriptor XML.
fn descriptor_name(xml: &str) -> Option<&str> {
    let start = xml.find("<name>")? + "<name>".len();
    let end = xml[start..].find("</name>")? + start;
    Some(&xml[start..end])
}

#[async_trait]
impl ControlPlane for MockControlPlane {
    async fn resolve_vm(&self, name: &str) -> Result<VmHandle> {
        self.record(CallRecord::ResolveVm {
            name: name.to_string(),
        })?;

        let vms = self
            .vms
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let vm = vms
            .get(name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(name.to_string()))?;

        Ok(VmHandle {
            name: name.to_string(),
            id: vm.id.clone(),
        })
    }

    async fn list_disks(&self, vm: &VmHandle) -> Result<Vec<DiskDescriptor>> {
        self.record(CallRecord::ListDisks {
            vm: vm.name.clone(),
        })?;

        let vms = self
            .vms
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        debug!(vm = %vm.name, count = entry.disks.len(), "Listed disks");
        Ok(entry.disks.clone())
    }

    async fn live_descriptor(&self, vm: &VmHandle) -> Result<String> {
        self.record(CallRecord::LiveDescriptor {
            vm: vm.name.clone(),
        })?;

        let vms = self
            .vms
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        Ok(entry.live_xml.clone())
    }

    async fn lookup_snapshot(&self, vm: &VmHandle, name: &str) -> Result<SnapshotHandle> {
        self.record(CallRecord::LookupSnapshot {
            vm: vm.name.clone(),
            name: name.to_string(),
        })?;

        let vms = self
            .vms
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        entry
            .snapshots
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| ControlPlaneError::SnapshotNotFound(name.to_string()))
    }

    async fn define_snapshot(
        &self,
        vm: &VmHandle,
        descriptor_xml: &str,
        flags: u32,
    ) -> Result<SnapshotHandle> {
        self.record(CallRecord::DefineSnapshot {
            vm: vm.name.clone(),
            xml: descriptor_xml.to_string(),
            flags,
        })?;

        if let Some(reason) = self
            .define_failure
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?
            .clone()
        {
            return Err(ControlPlaneError::SnapshotFailed(reason));
        }

        let name = descriptor_name(descriptor_xml).ok_or_else(|| {
            ControlPlaneError::SnapshotFailed("descriptor has no <name> element".to_string())
        })?;

        let mut vms = self
            .vms
            .write()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get_mut(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        let handle = SnapshotHandle {
            name: name.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
        };
        entry.snapshots.retain(|s| s.name != handle.name);
        entry.snapshots.push(handle.clone());

        debug!(vm = %vm.name, snapshot = %handle.name, flags, "Defined snapshot");
        Ok(handle)
    }

    async fn delete_snapshot(
        &self,
        vm: &VmHandle,
        snapshot: &SnapshotHandle,
        mode: u32,
    ) -> Result<()> {
        self.record(CallRecord::DeleteSnapshot {
            vm: vm.name.clone(),
            snapshot: snapshot.name.clone(),
            mode,
        })?;

        let mut vms = self
            .vms
            .write()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get_mut(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        let before = entry.snapshots.len();
        entry.snapshots.retain(|s| s.name != snapshot.name);
        if entry.snapshots.len() == before {
            return Err(ControlPlaneError::SnapshotFailed(format!(
                "no snapshot named {}",
                snapshot.name
            )));
        }

        Ok(())
    }

    async fn revert_to_snapshot(&self, vm: &VmHandle, snapshot: &SnapshotHandle) -> Result<()> {
        self.record(CallRecord::RevertToSnapshot {
            vm: vm.name.clone(),
            snapshot: snapshot.name.clone(),
        })?;

        let vms = self
            .vms
            .read()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        if !entry.snapshots.iter().any(|s| s.name == snapshot.name) {
            return Err(ControlPlaneError::SnapshotFailed(format!(
                "no snapshot named {}",
                snapshot.name
            )));
        }

        Ok(())
    }

    async fn stop_vm(&self, vm: &VmHandle) -> Result<()> {
        self.record(CallRecord::StopVm {
            vm: vm.name.clone(),
        })?;

        // Simulate the destroy taking a moment.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut vms = self
            .vms
            .write()
            .map_err(|_| ControlPlaneError::Internal("Lock poisoned".to_string()))?;

        let entry = vms
            .get_mut(&vm.name)
            .ok_or_else(|| ControlPlaneError::VmNotFound(vm.name.clone()))?;

        entry.running = false;
        Ok(())
    }
}
