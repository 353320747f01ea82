//! Snapshot metadata recovery.
//!
//! The control plane loses all snapshot metadata for a VM when the
//! domain is powered off and undefined, or migrated to another host.
//! The storage deltas survive; only the records are gone. This module
//! re-derives an equivalent definition from the VM's live state and
//! redefines it, so delete and revert behave as if nothing was lost.

use ferrokvm_hypervisor::{ControlPlane, SnapshotHandle, SnapshotTarget, VmHandle};
use tracing::{debug, error};

use crate::error::{Result, SnapshotError};
use crate::gate;
use crate::xml::SnapshotXmlBuilder;

/// Obtain a handle for the named snapshot, rebuilding its metadata if
/// the control plane has lost it.
///
/// Lookup failures other than "not found" propagate untouched; only
/// missing metadata is a recoverable condition. The rebuild runs at
/// most once: the repair descriptor is built from a fresh disk list
/// (gated for unsupported backends) and the VM's live definition, and
/// defined with flags 0 so the current-snapshot pointer is left
/// alone. A failed rebuild is fatal for the whole operation.
pub async fn resolve_or_rebuild(
    plane: &dyn ControlPlane,
    vm: &VmHandle,
    target: &SnapshotTarget,
) -> Result<SnapshotHandle> {
    match plane.lookup_snapshot(vm, &target.name).await {
        Ok(handle) => Ok(handle),
        Err(e) if e.is_snapshot_not_found() => {
            debug!(
                vm = %vm.name,
                snapshot = %target.name,
                "Could not find snapshot metadata, trying to recreate it"
            );
            rebuild(plane, vm, target).await
        }
        Err(e) => Err(e.into()),
    }
}

async fn rebuild(
    plane: &dyn ControlPlane,
    vm: &VmHandle,
    target: &SnapshotTarget,
) -> Result<SnapshotHandle> {
    let disks = plane.list_disks(vm).await?;
    let admitted = gate::admit(disks)?;

    let live_xml = plane
        .live_descriptor(vm)
        .await
        .map_err(|e| SnapshotError::RecoveryFailed(e.to_string()))?;

    let builder = SnapshotXmlBuilder::repair(target, &admitted, &live_xml);
    let handle = plane
        .define_snapshot(vm, &builder.build(), builder.flags())
        .await
        .map_err(|e| {
            error!(vm = %vm.name, snapshot = %target.name, error = %e, "Unable to recreate snapshot definition");
            SnapshotError::RecoveryFailed(e.to_string())
        })?;

    debug!(vm = %vm.name, snapshot = %handle.name, "Snapshot metadata recreated");
    Ok(handle)
}
