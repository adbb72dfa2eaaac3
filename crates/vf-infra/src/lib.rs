pub mod disk;
pub mod fleet;
#[cfg(feature = "libvirt")]
pub mod libvirt;
pub mod memory;
pub mod snapshot;
pub mod types;

use std::path::PathBuf;

use async_trait::async_trait;
use domain_xml::DomainDescriptor;
use types::Domain;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("hypervisor connection failed: {0}")]
    Connection(String),

    #[error("hypervisor query failed: {0}")]
    Query(String),

    #[error("domain not found: {0}")]
    NotFound(String),

    #[error("failed to create domain {name}: {reason}")]
    Create { name: String, reason: String },

    #[error("failed to destroy domain {name}: {reason}")]
    Destroy { name: String, reason: String },

    #[error("failed to stage {} from {}: {}", .runtime.display(), .golden.display(), .source)]
    DiskStage {
        golden: PathBuf,
        runtime: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Descriptor(#[from] domain_xml::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("invalid fleet: {0}")]
    InvalidFleet(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure to turn a native domain handle into a `Domain` record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("identity lookup failed for domain {}: {}", .name.as_deref().unwrap_or("<unknown>"), .reason)]
    IdentityLookupFailed { name: Option<String>, reason: String },

    #[error("network query failed for domain {name}: {reason}")]
    NetworkQueryFailed { name: String, reason: String },
}

impl SnapshotError {
    /// Domain name, if it was read before the failure.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::IdentityLookupFailed { name, .. } => name.as_deref(),
            Self::NetworkQueryFailed { name, .. } => Some(name),
        }
    }
}

/// Result of mapping one domain handle.
pub type Snapshot = std::result::Result<Domain, SnapshotError>;

/// Narrow interface to the virtualization host.
///
/// Implementations hold one connection for their lifetime and release it on
/// drop. Every domain handle they acquire is released before returning.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// All domains, active and inactive. A domain whose snapshot fails is
    /// reported as an `Err` entry rather than failing the whole listing.
    async fn list_domains(&self) -> Result<Vec<Snapshot>>;

    /// Look up a single domain. `Ok(None)` when no domain has this name.
    async fn get_domain(&self, name: &str) -> Result<Option<Domain>>;

    /// Start a transient domain. It has no persistent definition and is
    /// undefined by the hypervisor as soon as it stops.
    ///
    /// The outer error means the domain was not created; the inner one means
    /// it was created but could not be read back.
    async fn create_transient(&self, descriptor: &DomainDescriptor) -> Result<Snapshot>;

    /// Power off a domain immediately.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Connection URI, for logging.
    fn uri(&self) -> &str;
}

/// Open a connection to the hypervisor at `uri`.
#[cfg(feature = "libvirt")]
pub fn connect(uri: &str) -> Result<Box<dyn Hypervisor>> {
    let hv = libvirt::LibvirtHypervisor::connect(uri)?;
    tracing::info!(uri, "connected to hypervisor");
    Ok(Box::new(hv))
}

/// Open a connection to the hypervisor at `uri`.
#[cfg(not(feature = "libvirt"))]
pub fn connect(uri: &str) -> Result<Box<dyn Hypervisor>> {
    Err(Error::Unsupported(format!(
        "cannot connect to {uri}: built without the `libvirt` feature"
    )))
}
