//! Snapshot lifecycle coordination.
//!
//! One coordinator function dispatches the three lifecycle operations
//! over a closed request enum. Every failure is captured at this
//! boundary and converted into a structured answer for the
//! orchestrating management server; nothing panics or escapes past
//! `handle`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use ferrokvm_hypervisor::{
    ControlPlane, ControlPlaneError, PowerState, SnapshotKind, SnapshotTarget, VmHandle, VolumeRef,
};

use crate::error::{Result, SnapshotError};
use crate::gate;
use crate::recovery;
use crate::xml::SnapshotXmlBuilder;

/// Delete mode that merges the snapshot delta into its children,
/// preserving descendant snapshot chains.
const DELETE_MERGE_CHILDREN: u32 = 0;

/// One snapshot lifecycle request from the orchestrator.
///
/// Closed set by design: new operations extend this enum and the
/// dispatch in [`SnapshotCoordinator::handle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum SnapshotRequest {
    Create {
        target: SnapshotTarget,
        volumes: Vec<VolumeRef>,
    },
    Delete {
        target: SnapshotTarget,
        volumes: Vec<VolumeRef>,
    },
    Revert {
        target: SnapshotTarget,
        volumes: Vec<VolumeRef>,
    },
}

/// Structured result reported back to the orchestrator.
///
/// All-or-nothing: `success` is never true after a partial operation,
/// and the volume list is always the caller's, echoed unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotAnswer {
    pub success: bool,
    /// Human-readable failure reason; `None` on success.
    pub reason: Option<String>,
    /// The created snapshot target (Create only).
    pub target: Option<SnapshotTarget>,
    /// Caller-supplied volume references, echoed back unchanged.
    pub volumes: Vec<VolumeRef>,
    /// Resulting VM power state (Revert only).
    pub power_state: Option<PowerState>,
}

impl SnapshotAnswer {
    fn ok_create(target: SnapshotTarget, volumes: Vec<VolumeRef>) -> Self {
        Self {
            success: true,
            reason: None,
            target: Some(target),
            volumes,
            power_state: None,
        }
    }

    fn ok_delete(volumes: Vec<VolumeRef>) -> Self {
        Self {
            success: true,
            reason: None,
            target: None,
            volumes,
            power_state: None,
        }
    }

    fn ok_revert(volumes: Vec<VolumeRef>, power_state: PowerState) -> Self {
        Self {
            success: true,
            reason: None,
            target: None,
            volumes,
            power_state: Some(power_state),
        }
    }

    fn failure(error: SnapshotError, volumes: Vec<VolumeRef>) -> Self {
        Self {
            success: false,
            reason: Some(error.to_string()),
            target: None,
            volumes,
            power_state: None,
        }
    }
}

/// Coordinates snapshot lifecycle operations against one control
/// plane.
///
/// Each operation runs synchronously end-to-end against a single VM;
/// the coordinator holds no state between requests and re-reads the
/// VM handle and disk list fresh on every call. Validation and
/// metadata recovery always complete before the first irreversible
/// control-plane call.
pub struct SnapshotCoordinator {
    plane: Arc<dyn ControlPlane>,
}

impl SnapshotCoordinator {
    /// Create a coordinator over the given control plane.
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }

    /// Execute one lifecycle request, converting any failure into a
    /// structured answer.
    #[instrument(skip(self, request), fields(vm = %vm_name))]
    pub async fn handle(&self, vm_name: &str, request: SnapshotRequest) -> SnapshotAnswer {
        match request {
            SnapshotRequest::Create { target, volumes } => {
                match self.create(vm_name, &target).await {
                    Ok(()) => SnapshotAnswer::ok_create(target, volumes),
                    Err(e) => SnapshotAnswer::failure(e, volumes),
                }
            }
            SnapshotRequest::Delete { target, volumes } => {
                match self.delete(vm_name, &target).await {
                    Ok(()) => SnapshotAnswer::ok_delete(volumes),
                    Err(e) => SnapshotAnswer::failure(e, volumes),
                }
            }
            SnapshotRequest::Revert { target, volumes } => {
                match self.revert(vm_name, &target).await {
                    Ok(state) => SnapshotAnswer::ok_revert(volumes, state),
                    Err(e) => SnapshotAnswer::failure(e, volumes),
                }
            }
        }
    }

    async fn resolve(&self, vm_name: &str, operation: &str) -> Result<VmHandle> {
        self.plane.resolve_vm(vm_name).await.map_err(|e| match e {
            ControlPlaneError::VmNotFound(reason) => SnapshotError::VmNotResolvable {
                operation: operation.to_string(),
                reason,
            },
            other => other.into(),
        })
    }

    #[instrument(skip(self, target), fields(snapshot = %target.name))]
    async fn create(&self, vm_name: &str, target: &SnapshotTarget) -> Result<()> {
        info!("Creating VM snapshot");

        let vm = self.resolve(vm_name, "create snapshot").await?;

        let disks = self.plane.list_disks(&vm).await?;
        let admitted = gate::admit(disks)?;

        let builder = SnapshotXmlBuilder::fresh(target, &admitted);
        self.plane
            .define_snapshot(&vm, &builder.build(), builder.flags())
            .await?;

        info!("VM snapshot created");
        Ok(())
    }

    #[instrument(skip(self, target), fields(snapshot = %target.name))]
    async fn delete(&self, vm_name: &str, target: &SnapshotTarget) -> Result<()> {
        info!("Deleting VM snapshot");

        // Without a resolvable VM there is no snapshot to delete.
        let vm = self.plane.resolve_vm(vm_name).await.map_err(|e| match e {
            ControlPlaneError::VmNotFound(_) => SnapshotError::SnapshotMissing(target.name.clone()),
            other => other.into(),
        })?;

        let snapshot = recovery::resolve_or_rebuild(self.plane.as_ref(), &vm, target).await?;

        self.plane
            .delete_snapshot(&vm, &snapshot, DELETE_MERGE_CHILDREN)
            .await?;

        info!("VM snapshot deleted");
        Ok(())
    }

    #[instrument(skip(self, target), fields(snapshot = %target.name))]
    async fn revert(&self, vm_name: &str, target: &SnapshotTarget) -> Result<PowerState> {
        info!("Reverting VM to snapshot");

        let vm = self.resolve(vm_name, "revert to snapshot").await?;

        let snapshot = recovery::resolve_or_rebuild(self.plane.as_ref(), &vm, target).await?;

        self.plane.revert_to_snapshot(&vm, &snapshot).await?;

        // A disk-only revert leaves the running memory image
        // inconsistent with the reverted disks; the VM must go down.
        let state = if target.kind != SnapshotKind::DiskAndMemory {
            self.plane.stop_vm(&vm).await?;
            PowerState::PowerOff
        } else {
            PowerState::PowerOn
        };

        info!(power_state = ?state, "Reverted VM to snapshot");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ferrokvm_hypervisor::{CallRecord, DiskBackend, DiskDescriptor, DiskRole, MockControlPlane};

    fn coordinator(plane: Arc<MockControlPlane>) -> SnapshotCoordinator {
        SnapshotCoordinator::new(plane)
    }

    fn volumes() -> Vec<VolumeRef> {
        vec![VolumeRef::new("vol-1"), VolumeRef::new("vol-2")]
    }

    fn define_calls(plane: &MockControlPlane) -> Vec<(String, u32)> {
        plane
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                CallRecord::DefineSnapshot { xml, flags, .. } => Some((xml, flags)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn create_on_web01_renders_vda_with_flags_1() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);

        let target = SnapshotTarget::new("snap1", SnapshotKind::DiskOnly);
        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Create {
                    target,
                    volumes: volumes(),
                },
            )
            .await;

        assert!(answer.success, "reason: {:?}", answer.reason);
        assert_eq!(answer.target.as_ref().unwrap().name, "snap1");
        assert_eq!(answer.volumes, volumes());

        let defines = define_calls(&plane);
        assert_eq!(defines.len(), 1);
        let (xml, flags) = &defines[0];
        assert_eq!(*flags, 1);
        assert!(xml.contains("<disk snapshot='internal' name='vda'/>"));
        assert!(!xml.contains("<creationTime>"));
        assert!(!xml.contains("<state>"));
    }

    #[tokio::test]
    async fn create_current_snapshot_sets_redefine_bit() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);

        let target = SnapshotTarget::new("snap1", SnapshotKind::DiskAndMemory).as_current();
        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Create {
                    target,
                    volumes: vec![],
                },
            )
            .await;

        assert!(answer.success);
        assert_eq!(define_calls(&plane)[0].1, 3);
    }

    #[tokio::test]
    async fn create_rejects_unsupported_backend_before_any_mutation() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm(
            "web01",
            vec![
                DiskDescriptor::disk("vda"),
                DiskDescriptor::disk("vdb").on_backend(DiskBackend::NetworkBlockStore),
            ],
        );

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Create {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: volumes(),
                },
            )
            .await;

        assert!(!answer.success);
        assert!(answer.reason.as_ref().unwrap().contains("network block store"));
        assert_eq!(answer.volumes, volumes());
        assert_eq!(plane.mutation_count(), 0);
    }

    #[tokio::test]
    async fn create_descriptor_keeps_classifier_order_and_drops_cdroms() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm(
            "web01",
            vec![
                DiskDescriptor::disk("vda"),
                DiskDescriptor {
                    label: "sda".to_string(),
                    role: DiskRole::Cdrom,
                    backend: DiskBackend::LocalOrShared,
                },
                DiskDescriptor::disk("vdb"),
            ],
        );

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Create {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: vec![],
                },
            )
            .await;

        assert!(answer.success);
        let (xml, _) = &define_calls(&plane)[0];
        assert!(xml.contains("name='vda'"));
        assert!(xml.contains("name='vdb'"));
        assert!(!xml.contains("name='sda'"));
        assert!(xml.find("name='vda'").unwrap() < xml.find("name='vdb'").unwrap());
    }

    #[tokio::test]
    async fn create_on_unknown_vm_fails() {
        let plane = Arc::new(MockControlPlane::new());

        let answer = coordinator(plane.clone())
            .handle(
                "ghost",
                SnapshotRequest::Create {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: vec![],
                },
            )
            .await;

        assert!(!answer.success);
        assert!(answer.reason.unwrap().contains("VM not found"));
        assert_eq!(plane.mutation_count(), 0);
    }

    #[tokio::test]
    async fn delete_with_intact_metadata_issues_merge_delete() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        plane.add_snapshot("web01", "snap1");

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Delete {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: volumes(),
                },
            )
            .await;

        assert!(answer.success, "reason: {:?}", answer.reason);
        assert_eq!(answer.volumes, volumes());
        assert!(define_calls(&plane).is_empty());
        assert!(plane.calls().iter().any(|c| matches!(
            c,
            CallRecord::DeleteSnapshot { snapshot, mode: 0, .. } if snapshot == "snap1"
        )));
        assert!(plane.snapshot_names("web01").is_empty());
    }

    #[tokio::test]
    async fn delete_rebuilds_lost_metadata_then_deletes() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        // Snapshot was taken earlier; the host then lost its metadata.
        plane.drop_snapshot_metadata("web01");

        let at = chrono::Utc.with_ymd_and_hms(2024, 5, 14, 9, 30, 0).unwrap();
        let target = SnapshotTarget::new("snap1", SnapshotKind::DiskOnly).with_creation_time(at);

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Delete {
                    target,
                    volumes: volumes(),
                },
            )
            .await;

        assert!(answer.success, "reason: {:?}", answer.reason);

        let defines = define_calls(&plane);
        assert_eq!(defines.len(), 1);
        let (xml, flags) = &defines[0];
        assert_eq!(*flags, 0);
        assert!(xml.contains(&format!("<creationTime>{}</creationTime>", at.timestamp())));

        // Rebuild completes before the destructive call.
        let calls = plane.calls();
        let define_idx = calls
            .iter()
            .position(|c| matches!(c, CallRecord::DefineSnapshot { .. }))
            .unwrap();
        let delete_idx = calls
            .iter()
            .position(|c| matches!(c, CallRecord::DeleteSnapshot { mode: 0, .. }))
            .unwrap();
        assert!(define_idx < delete_idx);
    }

    #[tokio::test]
    async fn delete_after_failed_rebuild_issues_no_delete() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        plane.fail_define_snapshot("metadata store unavailable");

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Delete {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: vec![],
                },
            )
            .await;

        assert!(!answer.success);
        assert!(answer
            .reason
            .unwrap()
            .contains("unable to recreate snapshot definition"));
        assert!(!plane
            .calls()
            .iter()
            .any(|c| matches!(c, CallRecord::DeleteSnapshot { .. })));
    }

    #[tokio::test]
    async fn delete_on_unknown_vm_reports_missing_snapshot() {
        let plane = Arc::new(MockControlPlane::new());

        let answer = coordinator(plane.clone())
            .handle(
                "ghost",
                SnapshotRequest::Delete {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: vec![],
                },
            )
            .await;

        assert!(!answer.success);
        assert!(answer.reason.unwrap().contains("does not exist"));
    }

    #[tokio::test]
    async fn disk_only_revert_powers_off_after_reverting() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        plane.add_snapshot("web01", "snap1");

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Revert {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: volumes(),
                },
            )
            .await;

        assert!(answer.success, "reason: {:?}", answer.reason);
        assert_eq!(answer.power_state, Some(PowerState::PowerOff));
        assert_eq!(answer.volumes, volumes());
        assert!(!plane.vm_running("web01"));

        let calls = plane.calls();
        let stops: Vec<usize> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, CallRecord::StopVm { .. }))
            .map(|(i, _)| i)
            .collect();
        let revert_idx = calls
            .iter()
            .position(|c| matches!(c, CallRecord::RevertToSnapshot { .. }))
            .unwrap();
        assert_eq!(stops.len(), 1);
        assert!(revert_idx < stops[0]);
    }

    #[tokio::test]
    async fn disk_and_memory_revert_resumes_running() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        plane.add_snapshot("web01", "snap1");

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Revert {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskAndMemory),
                    volumes: vec![],
                },
            )
            .await;

        assert!(answer.success);
        assert_eq!(answer.power_state, Some(PowerState::PowerOn));
        assert!(!plane
            .calls()
            .iter()
            .any(|c| matches!(c, CallRecord::StopVm { .. })));
        assert!(plane.vm_running("web01"));
    }

    #[tokio::test]
    async fn revert_recovers_lost_metadata_before_reverting() {
        let plane = Arc::new(MockControlPlane::new());
        plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
        plane.drop_snapshot_metadata("web01");

        let answer = coordinator(plane.clone())
            .handle(
                "web01",
                SnapshotRequest::Revert {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskAndMemory),
                    volumes: vec![],
                },
            )
            .await;

        assert!(answer.success, "reason: {:?}", answer.reason);
        assert_eq!(answer.power_state, Some(PowerState::PowerOn));

        let calls = plane.calls();
        let define_idx = calls
            .iter()
            .position(|c| matches!(c, CallRecord::DefineSnapshot { flags: 0, .. }))
            .unwrap();
        let revert_idx = calls
            .iter()
            .position(|c| matches!(c, CallRecord::RevertToSnapshot { .. }))
            .unwrap();
        assert!(define_idx < revert_idx);
    }

    #[tokio::test]
    async fn revert_on_unknown_vm_is_fatal() {
        let plane = Arc::new(MockControlPlane::new());

        let answer = coordinator(plane.clone())
            .handle(
                "ghost",
                SnapshotRequest::Revert {
                    target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
                    volumes: vec![],
                },
            )
            .await;

        assert!(!answer.success);
        assert!(answer
            .reason
            .unwrap()
            .contains("VM not found, cannot revert to snapshot"));
        assert_eq!(plane.mutation_count(), 0);
    }

    #[tokio::test]
    async fn answers_serialize_for_the_wire() {
        let answer = SnapshotAnswer::ok_revert(vec![VolumeRef::new("vol-1")], PowerState::PowerOff);
        let json = serde_json::to_value(&answer).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["power_state"], "power_off");
        assert_eq!(json["volumes"][0]["id"], "vol-1");
    }
}
