//! Error types for the control-plane abstraction layer.

use thiserror::Error;

/// Errors surfaced by control-plane primitives.
///
/// `VmNotFound` and `SnapshotNotFound` are distinct from the generic
/// failure variants because callers key recovery decisions off them:
/// a missing snapshot is an expected degradation (libvirt loses all
/// snapshot metadata when a domain is undefined or migrated away),
/// while a missing VM is fatal for any snapshot operation.
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Failed to connect to the hypervisor.
    #[error("Failed to connect to hypervisor: {0}")]
    ConnectionFailed(String),

    /// VM was not found.
    #[error("VM not found: {0}")]
    VmNotFound(String),

    /// Snapshot metadata was not found for the named snapshot.
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Snapshot operation failed.
    #[error("Snapshot operation failed: {0}")]
    SnapshotFailed(String),

    /// Failed to stop a VM.
    #[error("Failed to stop VM: {0}")]
    StopFailed(String),

    /// Failed to query domain state or definition.
    #[error("Failed to query: {0}")]
    QueryFailed(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// Whether this error means the named snapshot has no metadata on
    /// the control plane (as opposed to the call itself failing).
    pub fn is_snapshot_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::SnapshotNotFound(_))
    }
}

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, ControlPlaneError>;
