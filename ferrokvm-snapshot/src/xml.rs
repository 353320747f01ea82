//! XML generation for libvirt domain snapshot definitions.
//!
//! Renders the `<domainsnapshot>` document sent to the control plane
//! to create a snapshot or to re-establish metadata it has lost. The
//! two cases deliberately differ: a fresh create lets the control
//! plane compute creation time and state itself; a metadata repair
//! supplies them, plus the full live domain definition, because the
//! control plane no longer has any record to derive them from.

use ferrokvm_hypervisor::{DiskDescriptor, DiskRole, SnapshotKind, SnapshotTarget};

/// Make the newly created snapshot the VM's current snapshot.
pub const CREATE_CURRENT: u32 = 1;
/// Keep the snapshot current across a redefinition.
pub const REDEFINE_CURRENT: u32 = 2;

/// Compute the create-call flag bits.
///
/// Metadata repair always passes 0: a repair call must not move the
/// VM's current-snapshot pointer.
pub fn creation_flags(is_fresh_create: bool, current: bool) -> u32 {
    if !is_fresh_create {
        return 0;
    }
    let mut flags = CREATE_CURRENT;
    if current {
        flags |= REDEFINE_CURRENT;
    }
    flags
}

/// Builder for domain snapshot XML.
pub struct SnapshotXmlBuilder<'a> {
    target: &'a SnapshotTarget,
    disks: &'a [DiskDescriptor],
    is_fresh_create: bool,
    live_xml: Option<&'a str>,
}

impl<'a> SnapshotXmlBuilder<'a> {
    /// Builder for a first-time snapshot creation.
    pub fn fresh(target: &'a SnapshotTarget, disks: &'a [DiskDescriptor]) -> Self {
        Self {
            target,
            disks,
            is_fresh_create: true,
            live_xml: None,
        }
    }

    /// Builder for a metadata repair, embedding the VM's live
    /// definition so the control plane can reconstruct consistent
    /// records.
    pub fn repair(
        target: &'a SnapshotTarget,
        disks: &'a [DiskDescriptor],
        live_xml: &'a str,
    ) -> Self {
        Self {
            target,
            disks,
            is_fresh_create: false,
            live_xml: Some(live_xml),
        }
    }

    /// Flag bits matching this descriptor.
    pub fn flags(&self) -> u32 {
        creation_flags(self.is_fresh_create, self.target.current)
    }

    /// Render the snapshot descriptor XML.
    pub fn build(&self) -> String {
        let mut xml = String::new();

        xml.push_str("<domainsnapshot>");

        xml.push_str(&format!("<name>{}</name>", self.target.name));

        if !self.is_fresh_create {
            if let Some(at) = self.target.creation_time {
                xml.push_str(&format!("<creationTime>{}</creationTime>", at.timestamp()));
            }

            if self.target.kind == SnapshotKind::DiskAndMemory {
                xml.push_str("<state>running</state>");
            } else {
                xml.push_str("<state>stopped</state>");
            }
        }

        if self.target.kind == SnapshotKind::DiskAndMemory {
            xml.push_str("<memory snapshot='internal'/>");
        } else {
            xml.push_str("<memory snapshot='none'/>");
        }

        xml.push_str("<disks>");
        for disk in self.disks {
            if disk.role == DiskRole::Disk {
                xml.push_str(&format!(
                    "<disk snapshot='internal' name='{}'/>",
                    disk.label
                ));
            }
        }
        xml.push_str("</disks>");

        if !self.is_fresh_create {
            if let Some(live) = self.live_xml {
                xml.push_str(live);
            }
        }

        xml.push_str("</domainsnapshot>");

        xml
    }
}
