//! # ferrokvm Hypervisor
//!
//! Control-plane abstraction layer for the snapshot components of the
//! node agent.
//!
//! This crate provides a unified interface over the hypervisor control
//! plane the snapshot coordinator talks to:
//! - **Libvirt/QEMU** (primary) - the real backend, feature `libvirt`
//! - **Mock** - in-memory recording backend for tests and development
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │             ControlPlane Trait              │
//! │ (resolve_vm, lookup_snapshot, define, ...)  │
//! └──────────────────────┬──────────────────────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//! ┌────────────────────┐     ┌────────────────────┐
//! │ LibvirtControlPlane│     │  MockControlPlane  │
//! │   (via libvirt)    │     │  (in-memory fake)  │
//! └────────────────────┘     └────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ferrokvm_hypervisor::{ControlPlane, MockControlPlane, DiskDescriptor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let plane = MockControlPlane::new();
//!     plane.add_vm("web01", vec![DiskDescriptor::disk("vda")]);
//!
//!     let vm = plane.resolve_vm("web01").await.unwrap();
//!     let disks = plane.list_disks(&vm).await.unwrap();
//! }
//! ```

pub mod error;
pub mod libvirt;
pub mod mock;
pub mod traits;
pub mod types;

pub use error::ControlPlaneError;
pub use mock::{CallRecord, MockControlPlane};
pub use traits::ControlPlane;
pub use types::*;

// Re-export libvirt backend when available
#[cfg(feature = "libvirt")]
pub use libvirt::LibvirtControlPlane;
