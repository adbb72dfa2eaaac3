// ── Domain descriptor types ─────────────────────────────────────────

/// Declarative description of a KVM domain, serialized with `to_xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDescriptor {
    pub name: String,
    pub memory_mib: u64,
    /// Statically placed vCPUs.
    pub vcpus: u32,
    pub os: OsConfig,
    pub disks: Vec<Disk>,
    pub interfaces: Vec<Interface>,
}

/// `<os><type arch="...">hvm</type></os>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsConfig {
    pub arch: String,
    pub os_type: String,
}

// ── Devices ─────────────────────────────────────────────────────────

/// File-backed disk device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub driver: DiskDriver,
    pub source_file: String,
    pub target: DiskTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskDriver {
    pub name: String,
    pub format: DiskFormat,
}

/// On-disk image format, written as the driver `type` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskFormat {
    Raw,
    Qcow2,
}

impl DiskFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Qcow2 => "qcow2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTarget {
    pub dev: String,
    pub bus: String,
}

/// Interface attached to a named libvirt virtual network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub network: String,
    pub model: String,
}
