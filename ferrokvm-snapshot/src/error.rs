//! Error types for snapshot lifecycle operations.

use ferrokvm_hypervisor::{ControlPlaneError, DiskBackend};
use thiserror::Error;

/// Errors a lifecycle operation can fail with.
///
/// These never escape the coordinator as panics; [`handle`] converts
/// them into structured failure answers for the orchestrator.
///
/// [`handle`]: crate::SnapshotCoordinator::handle
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// A disk's storage backend cannot be covered by this snapshot
    /// mechanism. Raised before any control-plane mutation.
    #[error("no support for snapshotting {} backed disk '{label}'", backend.as_str())]
    UnsupportedBackend {
        label: String,
        backend: DiskBackend,
    },

    /// The target VM cannot be located. Fatal, no recovery attempted.
    #[error("VM not found, cannot {operation}: {reason}")]
    VmNotResolvable { operation: String, reason: String },

    /// No snapshot handle could be obtained for the named snapshot.
    #[error("snapshot '{0}' does not exist")]
    SnapshotMissing(String),

    /// The metadata rebuild call itself failed. Fatal; recovery is
    /// attempted exactly once per operation.
    #[error("unable to recreate snapshot definition: {0}")]
    RecoveryFailed(String),

    /// Any other control-plane failure. Fatal, never retried.
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

/// Result type alias for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;
