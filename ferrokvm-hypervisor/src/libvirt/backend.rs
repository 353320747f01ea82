//! Libvirt backend implementation.

use async_trait::async_trait;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info, instrument, warn};
use virt::connect::Connect;
use virt::domain::Domain;

use crate::error::{ControlPlaneError, Result};
use crate::traits::ControlPlane;
use crate::types::*;

/// Libvirt/QEMU control plane.
///
/// Domain lookup, disk enumeration, and power control go through the
/// libvirt API. Snapshot primitives use `virsh` because the virt crate
/// v0.4 does not expose the domain snapshot API; the subprocess talks
/// to the same libvirtd, so metadata stays consistent.
pub struct LibvirtControlPlane {
    uri: String,
    connection: Connect,
}

impl LibvirtControlPlane {
    /// Connect to libvirt at the specified URI.
    ///
    /// Common URIs:
    /// - `qemu:///system` - System-wide QEMU/KVM
    /// - `qemu+ssh://user@host/system` - Remote via SSH
    pub async fn new(uri: &str) -> Result<Self> {
        info!(uri = %uri, "Connecting to libvirt");

        let connection = Connect::open(Some(uri))
            .map_err(|e| ControlPlaneError::ConnectionFailed(e.to_string()))?;

        info!("Connected to libvirt");

        Ok(Self {
            uri: uri.to_string(),
            connection,
        })
    }

    /// Connection URI this backend talks to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Look up a domain by name. Fresh lookup per call; domains can be
    /// undefined between operations.
    fn get_domain(&self, vm: &VmHandle) -> Result<Domain> {
        Domain::lookup_by_name(&self.connection, &vm.name)
            .map_err(|e| ControlPlaneError::VmNotFound(format!("{}: {}", vm.name, e)))
    }

    fn run_virsh(&self, args: &[&str], stdin_xml: Option<&str>) -> Result<String> {
        let mut cmd = Command::new("virsh");
        cmd.arg("-c").arg(&self.uri).args(args);

        let output = if let Some(xml) = stdin_xml {
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .and_then(|mut child| {
                    if let Some(ref mut stdin) = child.stdin {
                        stdin.write_all(xml.as_bytes())?;
                    }
                    child.wait_with_output()
                })
        } else {
            cmd.output()
        }
        .map_err(|e| ControlPlaneError::SnapshotFailed(format!("virsh command failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            if stderr.to_lowercase().contains("snapshot not found") {
                return Err(ControlPlaneError::SnapshotNotFound(stderr));
            }
            return Err(ControlPlaneError::SnapshotFailed(stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Parse `<disk>` device elements out of domain XML.
///
/// Simplified attribute scanning in lieu of a full XML parser; the
/// domain XML is generated by libvirt itself and uses single-quoted
/// attributes.
fn parse_disks(xml: &str) -> Vec<DiskDescriptor> {
    let mut disks = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find("<disk ") {
        let block_rest = &rest[start..];
        let end = match block_rest.find("</disk>") {
            Some(e) => e + "</disk>".len(),
            None => break,
        };
        let block = &block_rest[..end];
        rest = &block_rest[end..];

        let role = match attr_value(block, "device") {
            Some("disk") => DiskRole::Disk,
            Some("cdrom") => DiskRole::Cdrom,
            Some("floppy") => DiskRole::Floppy,
            other => {
                debug!(device = ?other, "Skipping disk element with unhandled device type");
                continue;
            }
        };

        let label = match target_dev(block) {
            Some(dev) => dev.to_string(),
            None => continue,
        };

        // Network-protocol sources (rbd and friends) cannot take
        // internal snapshots; everything file- or device-backed can.
        let backend = if block.contains("protocol='rbd'") {
            DiskBackend::NetworkBlockStore
        } else {
            DiskBackend::LocalOrShared
        };

        disks.push(DiskDescriptor {
            label,
            role,
            backend,
        });
    }

    disks
}

/// Value of a single-quoted attribute within an element block.
fn attr_value<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{}='", name);
    let start = block.find(&key)? + key.len();
    let end = block[start..].find('\'')? + start;
    Some(&block[start..end])
}

/// The `dev` attribute of the `<target>` element.
fn target_dev(block: &str) -> Option<&str> {
    let target = block.find("<target ")?;
    attr_value(&block[target..], "dev")
}

#[async_trait]
impl ControlPlane for LibvirtControlPlane {
    #[instrument(skip(self), fields(vm_name = %name))]
    async fn resolve_vm(&self, name: &str) -> Result<VmHandle> {
        let domain = Domain::lookup_by_name(&self.connection, name)
            .map_err(|e| ControlPlaneError::VmNotFound(format!("{}: {}", name, e)))?;

        let id = domain
            .get_uuid_string()
            .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;

        Ok(VmHandle {
            name: name.to_string(),
            id,
        })
    }

    #[instrument(skip(self), fields(vm = %vm.name))]
    async fn list_disks(&self, vm: &VmHandle) -> Result<Vec<DiskDescriptor>> {
        let domain = self.get_domain(vm)?;

        let xml = domain
            .get_xml_desc(0)
            .map_err(|e| ControlPlaneError::QueryFailed(e.to_string()))?;

        let disks = parse_disks(&xml);
        debug!(count = disks.len(), "Enumerated disks");
        Ok(disks)
    }

    #[instrument(skip(self), fields(vm = %vm.name))]
    async fn live_descriptor(&self, vm: &VmHandle) -> Result<String> {
        let domain = self.get_domain(vm)?;

        domain
            .get_xml_desc(0)
            .map_err(|e| ControlPlaneError::QueryFailed(e.to_string()))
    }

    #[instrument(skip(self), fields(vm = %vm.name, snapshot = %name))]
    async fn lookup_snapshot(&self, vm: &VmHandle, name: &str) -> Result<SnapshotHandle> {
        // Existence check through virsh; exit status distinguishes
        // missing metadata from other failures.
        self.run_virsh(&["snapshot-info", &vm.name, name], None)?;

        Ok(SnapshotHandle {
            name: name.to_string(),
            id: format!("{}/{}", vm.name, name),
        })
    }

    #[instrument(skip(self, descriptor_xml), fields(vm = %vm.name, flags))]
    async fn define_snapshot(
        &self,
        vm: &VmHandle,
        descriptor_xml: &str,
        flags: u32,
    ) -> Result<SnapshotHandle> {
        info!("Defining snapshot");

        // Map the create-flag bits onto virsh switches. Flags of 0 is
        // a metadata redefinition that must not move the current
        // snapshot pointer.
        let mut args = vec!["snapshot-create", vm.name.as_str(), "--xmldesc", "/dev/stdin"];
        if flags == 0 {
            args.push("--redefine");
        } else if flags & 2 != 0 {
            args.push("--redefine");
            args.push("--current");
        }

        self.run_virsh(&args, Some(descriptor_xml))?;

        let name = descriptor_xml
            .split("<name>")
            .nth(1)
            .and_then(|s| s.split("</name>").next())
            .unwrap_or_default()
            .to_string();

        info!(snapshot = %name, "Snapshot defined via virsh");

        Ok(SnapshotHandle {
            id: format!("{}/{}", vm.name, name),
            name,
        })
    }

    #[instrument(skip(self), fields(vm = %vm.name, snapshot = %snapshot.name, mode))]
    async fn delete_snapshot(
        &self,
        vm: &VmHandle,
        snapshot: &SnapshotHandle,
        mode: u32,
    ) -> Result<()> {
        info!("Deleting snapshot");

        if mode != 0 {
            warn!(mode, "Only merge-delete (mode 0) is supported; proceeding with merge");
        }

        // Default virsh deletion merges the snapshot delta into its
        // children, preserving descendant chains.
        self.run_virsh(&["snapshot-delete", &vm.name, &snapshot.name], None)?;

        info!("Snapshot deleted via virsh");
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm.name, snapshot = %snapshot.name))]
    async fn revert_to_snapshot(&self, vm: &VmHandle, snapshot: &SnapshotHandle) -> Result<()> {
        info!("Reverting to snapshot");

        self.run_virsh(&["snapshot-revert", &vm.name, &snapshot.name], None)?;

        info!("Reverted to snapshot via virsh");
        Ok(())
    }

    #[instrument(skip(self), fields(vm = %vm.name))]
    async fn stop_vm(&self, vm: &VmHandle) -> Result<()> {
        info!("Force stopping VM");

        let domain = self.get_domain(vm)?;

        domain
            .destroy()
            .map_err(|e| ControlPlaneError::StopFailed(e.to_string()))?;

        info!("VM force stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN_XML: &str = r#"<domain type='kvm'>
  <name>web01</name>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='/var/lib/libvirt/images/web01.qcow2'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='network' device='disk'>
      <driver name='qemu' type='raw'/>
      <source protocol='rbd' name='rbd/web01-data'/>
      <target dev='vdb' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
  </devices>
</domain>"#;

    #[test]
    fn parses_roles_and_backends() {
        let disks = parse_disks(DOMAIN_XML);
        assert_eq!(disks.len(), 3);

        assert_eq!(disks[0].label, "vda");
        assert_eq!(disks[0].role, DiskRole::Disk);
        assert_eq!(disks[0].backend, DiskBackend::LocalOrShared);

        assert_eq!(disks[1].label, "vdb");
        assert_eq!(disks[1].backend, DiskBackend::NetworkBlockStore);

        assert_eq!(disks[2].role, DiskRole::Cdrom);
    }

    #[test]
    fn preserves_definition_order() {
        let disks = parse_disks(DOMAIN_XML);
        let labels: Vec<_> = disks.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["vda", "vdb", "sda"]);
    }
}
