//! Core control-plane abstraction trait.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::*;

/// Hypervisor control-plane primitives consumed by the snapshot
/// coordinator.
///
/// The control plane is the source of truth for "a snapshot exists",
/// but that truth can silently disappear: libvirt loses all snapshot
/// metadata when a domain is undefined, powered off and recreated, or
/// migrated to another host. Implementations report that condition as
/// [`ControlPlaneError::SnapshotNotFound`] so callers can repair the
/// metadata instead of failing.
///
/// Every call is a fresh read or a single mutation; implementations
/// must not cache disk lists or snapshot lookups across calls. The
/// control plane itself serializes operations against one VM's
/// snapshot metadata; no additional locking happens at this layer.
///
/// [`ControlPlaneError::SnapshotNotFound`]: crate::error::ControlPlaneError::SnapshotNotFound
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Resolve a VM by name.
    async fn resolve_vm(&self, name: &str) -> Result<VmHandle>;

    /// Enumerate the VM's attached disks, in definition order.
    async fn list_disks(&self, vm: &VmHandle) -> Result<Vec<DiskDescriptor>>;

    /// Fetch the VM's full live definition (domain XML).
    async fn live_descriptor(&self, vm: &VmHandle) -> Result<String>;

    /// Look up a snapshot by name.
    ///
    /// Returns `SnapshotNotFound` when the control plane has no
    /// metadata for the name.
    async fn lookup_snapshot(&self, vm: &VmHandle, name: &str) -> Result<SnapshotHandle>;

    /// Create or redefine a snapshot from a rendered descriptor.
    ///
    /// `flags` is the libvirt snapshot-create bitset: bit 0 makes the
    /// new snapshot current, bit 1 marks the call as a redefinition.
    /// Flags of 0 redefine metadata without touching the current
    /// snapshot pointer.
    async fn define_snapshot(
        &self,
        vm: &VmHandle,
        descriptor_xml: &str,
        flags: u32,
    ) -> Result<SnapshotHandle>;

    /// Delete a snapshot. Mode 0 merges its delta into its children,
    /// preserving descendant snapshot chains.
    async fn delete_snapshot(
        &self,
        vm: &VmHandle,
        snapshot: &SnapshotHandle,
        mode: u32,
    ) -> Result<()>;

    /// Revert the VM to a snapshot.
    async fn revert_to_snapshot(&self, vm: &VmHandle, snapshot: &SnapshotHandle) -> Result<()>;

    /// Hard power-off (destroy). Used after disk-only reverts, where
    /// the running memory image no longer matches the reverted disks.
    async fn stop_vm(&self, vm: &VmHandle) -> Result<()>;
}
