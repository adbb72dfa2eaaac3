use std::env;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use vf_infra::fleet::default_fleet;
use vf_infra::types::MachineSpec;

use crate::error::AppError;

const DEFAULT_LIBVIRT_URI: &str = "qemu:///system";

#[cfg(feature = "libvirt")]
const BACKEND_NOTE: &str = "Hypervisor backend: libvirt.";

#[cfg(not(feature = "libvirt"))]
const BACKEND_NOTE: &str = "Hypervisor backend: none. This binary was built without the `libvirt` \
feature, so every run fails to connect and exits 1. Rebuild with `--features libvirt`.";

#[derive(Parser, Debug, Default)]
#[command(name = "virt-fleet")]
#[command(about = "Start any missing runner VMs on the local hypervisor", long_about = None)]
#[command(after_help = BACKEND_NOTE)]
pub struct Cli {
    /// Debug logging with source locations
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// TOML file listing the desired machines. Falls back to `VF_FLEET_FILE`,
    /// then to the built-in runner-1/runner-2 fleet.
    #[arg(short = 'c', long = "fleet")]
    pub fleet_file: Option<PathBuf>,

    /// libvirt connection URI. Falls back to `LIBVIRT_URI`.
    #[arg(long = "uri")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub libvirt_uri: String,
    pub fleet_file: Option<PathBuf>,
    pub verbose: bool,
}

impl AppConfig {
    /// Merge CLI flags over `.env` and process environment.
    pub fn from_env(cli: Cli) -> Self {
        dotenvy::dotenv().ok();
        Self::resolve(cli, |key| env::var(key).ok())
    }

    fn resolve(cli: Cli, var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            libvirt_uri: cli
                .uri
                .or_else(|| var("LIBVIRT_URI"))
                .unwrap_or_else(|| DEFAULT_LIBVIRT_URI.into()),
            fleet_file: cli.fleet_file.or_else(|| var("VF_FLEET_FILE").map(PathBuf::from)),
            verbose: cli.verbose,
        }
    }

    /// Desired machines, from the fleet file when one is configured.
    pub fn machines(&self) -> Result<Vec<MachineSpec>, AppError> {
        match &self.fleet_file {
            Some(path) => load_fleet_file(path),
            None => Ok(default_fleet()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FleetFile {
    #[serde(rename = "machine", default)]
    machines: Vec<MachineSpec>,
}

pub fn parse_fleet(text: &str) -> Result<Vec<MachineSpec>, toml::de::Error> {
    toml::from_str::<FleetFile>(text).map(|f| f.machines)
}

fn load_fleet_file(path: &Path) -> Result<Vec<MachineSpec>, AppError> {
    let text = std::fs::read_to_string(path).map_err(|source| AppError::FleetRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_fleet(&text).map_err(|source| AppError::FleetParse {
        path: path.to_path_buf(),
        source,
    })
}
