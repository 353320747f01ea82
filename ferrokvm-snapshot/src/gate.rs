//! Capability gate for snapshot requests.

use ferrokvm_hypervisor::{DiskBackend, DiskDescriptor, DiskRole};
use tracing::warn;

use crate::error::{Result, SnapshotError};

/// Validate a VM's disk set for snapshotting.
///
/// Keeps only disk-role devices (CD-ROMs and floppies never
/// participate) and rejects the whole set if any of them sits on a
/// backend that internal snapshots cannot cover. All-or-nothing: a
/// snapshot is only crash-consistent if it covers every disk
/// atomically, so one unsupported disk voids the entire request
/// before any control-plane mutation is issued.
pub fn admit(disks: Vec<DiskDescriptor>) -> Result<Vec<DiskDescriptor>> {
    let mut admitted = Vec::with_capacity(disks.len());

    for disk in disks {
        if disk.role != DiskRole::Disk {
            continue;
        }

        if disk.backend == DiskBackend::NetworkBlockStore {
            warn!(label = %disk.label, "Disk on unsupported backend, rejecting snapshot request");
            return Err(SnapshotError::UnsupportedBackend {
                label: disk.label,
                backend: disk.backend,
            });
        }

        admitted.push(disk);
    }

    Ok(admitted)
}
