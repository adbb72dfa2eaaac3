use std::fmt;

use crate::SnapshotError;
use crate::types::{Domain, DomainState};

/// Read side of a native domain handle.
///
/// Implementors own whatever native resource backs the handle and release it
/// on drop; `snapshot` only borrows.
pub trait DomainHandle {
    type Error: fmt::Display;

    fn name(&self) -> Result<String, Self::Error>;

    fn uuid(&self) -> Result<String, Self::Error>;

    /// Raw `virDomainState` code.
    fn raw_state(&self) -> Result<u32, Self::Error>;

    /// Lease addresses grouped by interface.
    fn interface_addresses(&self) -> Result<Vec<Vec<String>>, Self::Error>;
}

/// Translate a native handle into a `Domain` record.
///
/// Identity and address queries must succeed. The run state is best-effort:
/// a failed or unmapped state read yields `DomainState::None`.
pub fn snapshot<H: DomainHandle>(handle: &H) -> Result<Domain, SnapshotError> {
    let name = handle
        .name()
        .map_err(|e| SnapshotError::IdentityLookupFailed {
            name: None,
            reason: format!("name: {e}"),
        })?;

    let uuid = handle
        .uuid()
        .map_err(|e| SnapshotError::IdentityLookupFailed {
            name: Some(name.clone()),
            reason: format!("uuid: {e}"),
        })?;

    let state = match handle.raw_state() {
        Ok(code) => DomainState::from_raw(code),
        Err(e) => {
            tracing::debug!(name = %name, error = %e, "state query failed, reporting none");
            DomainState::None
        }
    };

    let addresses = handle
        .interface_addresses()
        .map_err(|e| SnapshotError::NetworkQueryFailed {
            name: name.clone(),
            reason: e.to_string(),
        })?
        .into_iter()
        .flatten()
        .collect();

    Ok(Domain {
        name,
        uuid,
        state,
        addresses,
    })
}
