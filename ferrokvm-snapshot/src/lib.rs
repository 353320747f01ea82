//! # ferrokvm Snapshot
//!
//! VM snapshot lifecycle coordination for the node agent.
//!
//! The coordinator creates, deletes, and reverts VM snapshots against
//! a hypervisor control plane, and transparently repairs snapshot
//! metadata the control plane has lost (the control plane forgets all
//! snapshots for a VM when it is powered off, destroyed, or migrated
//! to another host; the storage deltas survive).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ferrokvm_hypervisor::{MockControlPlane, SnapshotKind, SnapshotTarget};
//! use ferrokvm_snapshot::{SnapshotCoordinator, SnapshotRequest};
//!
//! #[tokio::main]
//! async fn main() {
//!     let plane = Arc::new(MockControlPlane::new());
//!     let coordinator = SnapshotCoordinator::new(plane);
//!
//!     let answer = coordinator
//!         .handle("web01", SnapshotRequest::Create {
//!             target: SnapshotTarget::new("snap1", SnapshotKind::DiskOnly),
//!             volumes: vec![],
//!         })
//!         .await;
//!
//!     assert!(answer.success);
//! }
//! ```

pub mod coordinator;
pub mod error;
pub mod gate;
pub mod recovery;
pub mod xml;

pub use coordinator::{SnapshotAnswer, SnapshotCoordinator, SnapshotRequest};
pub use error::SnapshotError;
pub use xml::{creation_flags, SnapshotXmlBuilder, CREATE_CURRENT, REDEFINE_CURRENT};
