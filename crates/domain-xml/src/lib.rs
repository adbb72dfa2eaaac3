//! Typed libvirt domain descriptors.
//!
//! Covers the subset needed to boot a transient runner: memory, vCPUs,
//! OS type, file-backed disks and network interfaces. `DomainDescriptor::to_xml`
//! renders the document accepted by `virDomainCreateXML`.

mod types;

use std::fmt::Write;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid domain descriptor: {0}")]
    Invalid(String),

    #[error("failed to render domain xml: {0}")]
    Format(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl DomainDescriptor {
    /// A hardware-accelerated `hvm` domain with no devices attached.
    pub fn kvm(name: impl Into<String>, memory_mb: u64, vcpus: u32, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            memory_mib: memory_mb,
            vcpus,
            os: OsConfig {
                arch: arch.into(),
                os_type: "hvm".into(),
            },
            disks: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn with_disk(mut self, disk: Disk) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Invalid("domain name is empty".into()));
        }
        if self.memory_mib == 0 {
            return Err(Error::Invalid(format!("domain {}: memory must be positive", self.name)));
        }
        if self.vcpus == 0 {
            return Err(Error::Invalid(format!("domain {}: vcpu count must be positive", self.name)));
        }
        if self.os.arch.is_empty() {
            return Err(Error::Invalid(format!("domain {}: architecture is empty", self.name)));
        }
        Ok(())
    }

    /// Render the descriptor as a libvirt domain XML document.
    pub fn to_xml(&self) -> Result<String> {
        self.validate()?;

        let mut out = String::new();
        writeln!(out, r#"<domain type="kvm">"#)?;
        writeln!(out, "  <name>{}</name>", escape(&self.name))?;
        writeln!(out, r#"  <memory unit="MiB">{}</memory>"#, self.memory_mib)?;
        writeln!(out, r#"  <vcpu placement="static">{}</vcpu>"#, self.vcpus)?;
        writeln!(out, "  <os>")?;
        writeln!(
            out,
            r#"    <type arch="{}">{}</type>"#,
            escape(&self.os.arch),
            escape(&self.os.os_type)
        )?;
        writeln!(out, "  </os>")?;

        writeln!(out, "  <devices>")?;
        for disk in &self.disks {
            writeln!(out, r#"    <disk type="file" device="disk">"#)?;
            writeln!(
                out,
                r#"      <driver name="{}" type="{}"/>"#,
                escape(&disk.driver.name),
                disk.driver.format.as_str()
            )?;
            writeln!(out, r#"      <source file="{}"/>"#, escape(&disk.source_file))?;
            writeln!(
                out,
                r#"      <target dev="{}" bus="{}"/>"#,
                escape(&disk.target.dev),
                escape(&disk.target.bus)
            )?;
            writeln!(out, "    </disk>")?;
        }
        for iface in &self.interfaces {
            writeln!(out, r#"    <interface type="network">"#)?;
            writeln!(out, r#"      <source network="{}"/>"#, escape(&iface.network))?;
            writeln!(out, r#"      <model type="{}"/>"#, escape(&iface.model))?;
            writeln!(out, "    </interface>")?;
        }
        writeln!(out, "  </devices>")?;
        writeln!(out, "</domain>")?;

        Ok(out)
    }
}

/// Escape a value for use in XML text or a double-quoted attribute.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> DomainDescriptor {
        DomainDescriptor::kvm("runner-1", 1024, 2, "x86_64")
            .with_disk(Disk {
                driver: DiskDriver {
                    name: "qemu".into(),
                    format: DiskFormat::Qcow2,
                },
                source_file: "/vm/runner-1_run.qcow2".into(),
                target: DiskTarget {
                    dev: "sda".into(),
                    bus: "sata".into(),
                },
            })
            .with_interface(Interface {
                network: "default".into(),
                model: "virtio".into(),
            })
    }

    #[test]
    fn renders_runner_domain() {
        let xml = runner().to_xml().unwrap();

        assert!(xml.starts_with(r#"<domain type="kvm">"#));
        assert!(xml.contains("<name>runner-1</name>"));
        assert!(xml.contains(r#"<memory unit="MiB">1024</memory>"#));
        assert!(xml.contains(r#"<vcpu placement="static">2</vcpu>"#));
        assert!(xml.contains(r#"<type arch="x86_64">hvm</type>"#));
        assert!(xml.contains(r#"<driver name="qemu" type="qcow2"/>"#));
        assert!(xml.contains(r#"<source file="/vm/runner-1_run.qcow2"/>"#));
        assert!(xml.contains(r#"<target dev="sda" bus="sata"/>"#));
        assert!(xml.contains(r#"<source network="default"/>"#));
        assert!(xml.contains(r#"<model type="virtio"/>"#));
        assert!(xml.trim_end().ends_with("</domain>"));
    }

    #[test]
    fn escapes_text_and_attributes() {
        let mut desc = runner();
        desc.name = "a<b>&c".into();
        desc.disks[0].source_file = r#"/vm/"quoted".img"#.into();

        let xml = desc.to_xml().unwrap();
        assert!(xml.contains("<name>a&lt;b&gt;&amp;c</name>"));
        assert!(xml.contains(r#"<source file="/vm/&quot;quoted&quot;.img"/>"#));
    }

    #[test]
    fn rejects_invalid_descriptors() {
        let mut desc = runner();
        desc.name = "  ".into();
        assert!(matches!(desc.to_xml(), Err(Error::Invalid(_))));

        let mut desc = runner();
        desc.memory_mib = 0;
        assert!(matches!(desc.to_xml(), Err(Error::Invalid(_))));

        let mut desc = runner();
        desc.vcpus = 0;
        assert!(matches!(desc.to_xml(), Err(Error::Invalid(_))));
    }

    #[test]
    fn devices_section_present_without_devices() {
        let xml = DomainDescriptor::kvm("bare", 512, 1, "aarch64").to_xml().unwrap();
        assert!(xml.contains("  <devices>\n  </devices>\n"));
        assert!(!xml.contains("<disk"));
    }
}
