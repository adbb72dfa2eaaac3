use std::collections::HashMap;

use tracing::{debug, error, info, warn};
use vf_infra::fleet::transient_descriptor;
use vf_infra::types::{DomainState, MachineSpec};
use vf_infra::{Error, Hypervisor, disk};

/// A machine that could not be brought up this run.
#[derive(Debug)]
pub struct Failure {
    pub machine: String,
    pub error: Error,
}

/// Outcome of one pass over the desired fleet.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub failures: Vec<Failure>,
}

impl ReconcileReport {
    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Started {
    Created,
    AlreadyRunning,
}

/// Start every desired machine that is not already running.
///
/// Machines are handled one after another; a failure for one machine is
/// recorded and the next one is still attempted. Only a failure to list the
/// hypervisor's domains aborts the run.
pub async fn reconcile(hv: &dyn Hypervisor, desired: &[MachineSpec]) -> Result<ReconcileReport, Error> {
    let observed = observe(hv).await?;
    debug!(domains = ?observed, "current domains");

    let mut report = ReconcileReport::default();
    for spec in desired {
        let state = observed.get(spec.name.as_str()).copied();
        if state == Some(DomainState::Running) {
            debug!(name = %spec.name, "machine is already started, skipping");
            report.skipped.push(spec.name.clone());
            continue;
        }

        match start_machine(hv, spec, state).await {
            Ok(Started::Created) => report.created.push(spec.name.clone()),
            Ok(Started::AlreadyRunning) => report.skipped.push(spec.name.clone()),
            Err(e) => {
                error!(name = %spec.name, error = %e, "failed to create machine");
                report.failures.push(Failure {
                    machine: spec.name.clone(),
                    error: e,
                });
            }
        }
    }

    Ok(report)
}

/// Name -> state of every domain on the host.
///
/// Domains that cannot be read are skipped; if their name is known they are
/// kept as `DomainState::None`.
async fn observe(hv: &dyn Hypervisor) -> Result<HashMap<String, DomainState>, Error> {
    let mut states = HashMap::new();
    for entry in hv.list_domains().await? {
        match entry {
            Ok(domain) => {
                states.insert(domain.name, domain.state);
            }
            Err(e) => {
                warn!(error = %e, "failed to read domain, treating as unknown");
                if let Some(name) = e.name() {
                    states.insert(name.to_string(), DomainState::None);
                }
            }
        }
    }
    Ok(states)
}

async fn start_machine(
    hv: &dyn Hypervisor,
    spec: &MachineSpec,
    observed: Option<DomainState>,
) -> Result<Started, Error> {
    // A live domain still holds the name; clear it before creating a fresh one.
    if observed.is_some_and(|s| s.is_active()) {
        let current = match hv.get_domain(&spec.name).await {
            Ok(domain) => domain.map(|d| d.state),
            Err(Error::Snapshot(e)) => {
                warn!(name = %spec.name, error = %e, "failed to re-read domain, using listed state");
                observed
            }
            Err(e) => return Err(e),
        };

        match current {
            Some(DomainState::Running) => {
                debug!(name = %spec.name, "machine started since listing, skipping");
                return Ok(Started::AlreadyRunning);
            }
            Some(state) if state.is_active() => {
                info!(name = %spec.name, state = %state, "destroying stale domain");
                match hv.destroy(&spec.name).await {
                    Ok(()) | Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            _ => {}
        }
    }

    let staged = disk::stage(&spec.golden_disk).await?;
    let descriptor = transient_descriptor(spec, &staged);

    info!(name = %spec.name, disk = %staged.path.display(), "starting machine");
    match hv.create_transient(&descriptor).await? {
        Ok(domain) => info!(
            name = %domain.name,
            uuid = %domain.uuid,
            state = %domain.state,
            addresses = ?domain.addresses,
            "created machine"
        ),
        Err(e) => warn!(name = %spec.name, error = %e, "created machine but could not read it back"),
    }

    Ok(Started::Created)
}
