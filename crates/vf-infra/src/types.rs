use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Desired state of a single runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub name: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Read-only source image. Never handed to the hypervisor directly.
    pub golden_disk: PathBuf,
    #[serde(default = "default_network")]
    pub network: String,
}

fn default_memory_mb() -> u64 {
    1024
}

fn default_vcpus() -> u32 {
    1
}

fn default_architecture() -> String {
    "x86_64".into()
}

fn default_network() -> String {
    "default".into()
}

impl MachineSpec {
    /// A runner with 1 GiB of memory and one vCPU on the `default` network.
    pub fn new(name: impl Into<String>, golden_disk: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            memory_mb: default_memory_mb(),
            vcpus: default_vcpus(),
            architecture: default_architecture(),
            golden_disk: golden_disk.into(),
            network: default_network(),
        }
    }
}

/// Snapshot of a domain as reported by the hypervisor at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub uuid: String,
    pub state: DomainState,
    /// DHCP lease addresses across all interfaces, in interface order.
    pub addresses: Vec<String>,
}

/// Hypervisor-reported run state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainState {
    #[default]
    None,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    Crashed,
    Suspended,
    Off,
}

impl DomainState {
    /// Map a libvirt `virDomainState` code. Unmapped codes fall back to `None`.
    pub fn from_raw(code: u32) -> Self {
        match code {
            1 => Self::Running,
            2 => Self::Blocked,
            3 => Self::Paused,
            4 => Self::ShuttingDown,
            5 => Self::Off,
            6 => Self::Crashed,
            7 => Self::Suspended,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Paused => "paused",
            Self::ShuttingDown => "shutting_down",
            Self::Crashed => "crashed",
            Self::Suspended => "suspended",
            Self::Off => "off",
        }
    }

    /// Whether the domain still holds a live instance under its name.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::None | Self::Off)
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_libvirt_codes() {
        let expected = [
            (0, DomainState::None),
            (1, DomainState::Running),
            (2, DomainState::Blocked),
            (3, DomainState::Paused),
            (4, DomainState::ShuttingDown),
            (5, DomainState::Off),
            (6, DomainState::Crashed),
            (7, DomainState::Suspended),
        ];
        for (code, state) in expected {
            assert_eq!(DomainState::from_raw(code), state, "code {code}");
        }
    }

    #[test]
    fn unmapped_codes_fall_back_to_none() {
        assert_eq!(DomainState::from_raw(8), DomainState::None);
        assert_eq!(DomainState::from_raw(u32::MAX), DomainState::None);
    }

    #[test]
    fn only_none_and_off_are_inactive() {
        assert!(!DomainState::None.is_active());
        assert!(!DomainState::Off.is_active());
        assert!(DomainState::Running.is_active());
        assert!(DomainState::Paused.is_active());
        assert!(DomainState::Crashed.is_active());
    }

    #[test]
    fn machine_spec_defaults_apply_when_deserializing() {
        let spec: MachineSpec = serde_json::from_str(
            r#"{"name": "runner-1", "golden_disk": "/vm/runner-1.qcow2"}"#,
        )
        .unwrap();
        assert_eq!(spec, MachineSpec::new("runner-1", "/vm/runner-1.qcow2"));
    }
}
