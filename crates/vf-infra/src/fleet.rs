use std::collections::HashMap;
use std::path::PathBuf;

use domain_xml::{Disk, DiskDriver, DiskTarget, DomainDescriptor, Interface};

use crate::disk::{StagedDisk, runtime_disk_path};
use crate::types::MachineSpec;
use crate::{Error, Result};

/// Fleet used when no fleet file is configured.
pub fn default_fleet() -> Vec<MachineSpec> {
    vec![
        MachineSpec::new("runner-1", "/vm/runner-1.qcow2"),
        MachineSpec::new("runner-2", "/vm/runner-2.qcow2"),
    ]
}

/// Check fleet-wide invariants before anything touches the hypervisor.
///
/// Names must be unique and non-empty, resources positive, and no runtime
/// disk may coincide with another machine's runtime disk or any golden image.
pub fn validate_fleet(machines: &[MachineSpec]) -> Result<()> {
    let mut names: HashMap<&str, usize> = HashMap::new();
    let mut runtimes: HashMap<PathBuf, &str> = HashMap::new();

    for (i, m) in machines.iter().enumerate() {
        if m.name.trim().is_empty() {
            return Err(Error::InvalidFleet(format!("machine #{i} has an empty name")));
        }
        if let Some(prev) = names.insert(m.name.as_str(), i) {
            return Err(Error::InvalidFleet(format!(
                "duplicate machine name {:?} (entries #{prev} and #{i})",
                m.name
            )));
        }
        if m.memory_mb == 0 || m.vcpus == 0 {
            return Err(Error::InvalidFleet(format!(
                "machine {:?} needs positive memory_mb and vcpus",
                m.name
            )));
        }
        if m.golden_disk.to_str().is_none() {
            return Err(Error::InvalidFleet(format!(
                "machine {:?} has a non UTF-8 golden_disk path",
                m.name
            )));
        }

        let runtime = runtime_disk_path(&m.golden_disk);
        if let Some(other) = runtimes.insert(runtime.clone(), m.name.as_str()) {
            return Err(Error::InvalidFleet(format!(
                "machines {other:?} and {:?} share runtime disk {}",
                m.name,
                runtime.display()
            )));
        }
    }

    for m in machines {
        if let Some(owner) = runtimes.get(&m.golden_disk) {
            return Err(Error::InvalidFleet(format!(
                "runtime disk of {owner:?} would overwrite golden image {} of {:?}",
                m.golden_disk.display(),
                m.name
            )));
        }
    }

    Ok(())
}

/// Descriptor for booting `spec` as a transient KVM domain from `disk`.
pub fn transient_descriptor(spec: &MachineSpec, disk: &StagedDisk) -> DomainDescriptor {
    DomainDescriptor::kvm(&spec.name, spec.memory_mb, spec.vcpus, &spec.architecture)
        .with_disk(Disk {
            driver: DiskDriver {
                name: "qemu".into(),
                format: disk.format,
            },
            source_file: disk.path.to_string_lossy().into_owned(),
            target: DiskTarget {
                dev: "sda".into(),
                bus: "sata".into(),
            },
        })
        .with_interface(Interface {
            network: spec.network.clone(),
            model: "virtio".into(),
        })
}
