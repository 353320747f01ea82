//! Type definitions for VM snapshot targets, disks, and handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// SNAPSHOT TARGETS
// =============================================================================

/// What a snapshot captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// Disk state only. Reverting discards the running memory image,
    /// so the VM must be powered off afterwards.
    DiskOnly,
    /// Disk state plus guest memory. Reverting resumes the VM running.
    DiskAndMemory,
}

/// Identity of a requested snapshot operation.
///
/// Constructed by the orchestrator per request and immutable for the
/// duration of one lifecycle operation. The coordinator never persists
/// it; the control plane owns snapshot metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTarget {
    /// Snapshot name, unique within the VM's snapshot namespace.
    pub name: String,
    /// What the snapshot covers.
    pub kind: SnapshotKind,
    /// Original creation time. Only meaningful when re-establishing
    /// metadata for a snapshot that already exists on disk.
    pub creation_time: Option<DateTime<Utc>>,
    /// Whether this snapshot should become the VM's current snapshot.
    pub current: bool,
}

impl SnapshotTarget {
    /// Create a new snapshot target.
    pub fn new(name: impl Into<String>, kind: SnapshotKind) -> Self {
        Self {
            name: name.into(),
            kind,
            creation_time: None,
            current: false,
        }
    }

    /// Set the recorded creation time.
    pub fn with_creation_time(mut self, at: DateTime<Utc>) -> Self {
        self.creation_time = Some(at);
        self
    }

    /// Mark this snapshot as the VM's current snapshot.
    pub fn as_current(mut self) -> Self {
        self.current = true;
        self
    }
}

// =============================================================================
// DISKS
// =============================================================================

/// Device role of an attached disk definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskRole {
    /// Regular virtual disk. Only these participate in snapshots.
    Disk,
    Cdrom,
    Floppy,
}

/// Storage backend underlying a virtual disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskBackend {
    /// File-backed storage, local directory or shared filesystem.
    LocalOrShared,
    /// Network block store (RBD-style). Internal snapshots cannot
    /// cover these volumes.
    NetworkBlockStore,
}

impl DiskBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskBackend::LocalOrShared => "local/shared file",
            DiskBackend::NetworkBlockStore => "network block store",
        }
    }
}

/// One attached virtual disk, as enumerated from the VM definition.
///
/// Disk lists are a fresh read per lifecycle operation and are never
/// cached across operations; disks can be attached or detached between
/// calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDescriptor {
    /// Stable device label within the VM definition (e.g. "vda").
    pub label: String,
    /// Device role.
    pub role: DiskRole,
    /// Storage backend kind.
    pub backend: DiskBackend,
}

impl DiskDescriptor {
    /// Create a disk-role descriptor on file-backed storage.
    pub fn disk(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            role: DiskRole::Disk,
            backend: DiskBackend::LocalOrShared,
        }
    }

    /// Set the storage backend.
    pub fn on_backend(mut self, backend: DiskBackend) -> Self {
        self.backend = backend;
        self
    }
}

// =============================================================================
// VOLUMES AND POWER STATE
// =============================================================================

/// Opaque caller-supplied volume reference.
///
/// The coordinator echoes these back unchanged in answers; it never
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Volume identifier assigned by the orchestrator.
    pub id: String,
    /// Backing path, if the orchestrator tracks one.
    pub path: Option<String>,
}

impl VolumeRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: None,
        }
    }
}

/// VM power state after a revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    PowerOn,
    PowerOff,
}

// =============================================================================
// HANDLES
// =============================================================================

/// Handle to a resolved VM on the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmHandle {
    /// VM name, unique on this host.
    pub name: String,
    /// Backend-specific identifier (libvirt domain UUID, mock id).
    pub id: String,
}

/// Handle to a snapshot known to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHandle {
    /// Snapshot name within the VM's namespace.
    pub name: String,
    /// Backend-specific identifier.
    pub id: String,
}
