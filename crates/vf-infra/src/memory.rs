use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain_xml::DomainDescriptor;
use tracing::info;

use crate::snapshot::{DomainHandle, snapshot};
use crate::types::{Domain, DomainState};
use crate::{Error, Hypervisor, Result, Snapshot};

/// In-process hypervisor holding domains in a map.
///
/// Records every create and destroy call and can be told to fail specific
/// operations per domain name.
pub struct MemoryHypervisor {
    uri: String,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    domains: BTreeMap<String, MemoryDomain>,
    create_attempts: Vec<DomainDescriptor>,
    destroyed: Vec<String>,
    fail_create: HashSet<String>,
    fail_destroy: HashSet<String>,
    fail_snapshot: HashSet<String>,
    fail_listing: bool,
    on_lookup: HashMap<String, LookupChange>,
}

/// Change applied to a domain the next time it is looked up by name,
/// standing in for an actor that touches the host between two queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupChange {
    SetState(DomainState),
    Remove,
    BreakSnapshot,
}

/// A domain record, read through the same mapper as native handles.
#[derive(Debug, Clone)]
pub struct MemoryDomain {
    name: String,
    uuid: String,
    state: DomainState,
    addresses: Vec<String>,
    broken: bool,
    persistent: bool,
}

impl DomainHandle for MemoryDomain {
    type Error = String;

    fn name(&self) -> std::result::Result<String, String> {
        Ok(self.name.clone())
    }

    fn uuid(&self) -> std::result::Result<String, String> {
        Ok(self.uuid.clone())
    }

    fn raw_state(&self) -> std::result::Result<u32, String> {
        Ok(match self.state {
            DomainState::None => 0,
            DomainState::Running => 1,
            DomainState::Blocked => 2,
            DomainState::Paused => 3,
            DomainState::ShuttingDown => 4,
            DomainState::Off => 5,
            DomainState::Crashed => 6,
            DomainState::Suspended => 7,
        })
    }

    fn interface_addresses(&self) -> std::result::Result<Vec<Vec<String>>, String> {
        if self.broken {
            return Err("guest agent unavailable".into());
        }
        Ok(vec![self.addresses.clone()])
    }
}

impl Default for MemoryHypervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHypervisor {
    pub fn new() -> Self {
        Self {
            uri: "memory:///".into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a transient domain in the given state.
    pub fn with_domain(self, name: &str, state: DomainState) -> Self {
        self.insert(name, state, false);
        self
    }

    /// Add (or replace) a domain with a persistent definition. Destroying it
    /// leaves it defined and `Off`.
    pub fn with_persistent_domain(self, name: &str, state: DomainState) -> Self {
        self.insert(name, state, true);
        self
    }

    fn insert(&self, name: &str, state: DomainState, persistent: bool) {
        self.lock().domains.insert(
            name.to_string(),
            MemoryDomain {
                name: name.to_string(),
                uuid: uuid::Uuid::new_v4().to_string(),
                state,
                addresses: Vec::new(),
                broken: false,
                persistent,
            },
        );
    }

    /// Change the state of an existing domain, as an external actor would.
    pub fn set_state(&self, name: &str, state: DomainState) {
        if let Some(d) = self.lock().domains.get_mut(name) {
            d.state = state;
        }
    }

    pub fn fail_create(&self, name: &str) {
        self.lock().fail_create.insert(name.to_string());
    }

    pub fn fail_destroy(&self, name: &str) {
        self.lock().fail_destroy.insert(name.to_string());
    }

    /// Make address queries for `name` fail, so its snapshot errors.
    pub fn fail_snapshot(&self, name: &str) {
        let mut inner = self.lock();
        inner.fail_snapshot.insert(name.to_string());
        if let Some(d) = inner.domains.get_mut(name) {
            d.broken = true;
        }
    }

    /// Apply `change` to `name` right before its next `get_domain`.
    pub fn on_next_lookup(&self, name: &str, change: LookupChange) {
        self.lock().on_lookup.insert(name.to_string(), change);
    }

    pub fn fail_listing(&self) {
        self.lock().fail_listing = true;
    }

    /// Every descriptor passed to `create_transient`, successful or not.
    pub fn create_attempts(&self) -> Vec<DomainDescriptor> {
        self.lock().create_attempts.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.lock().destroyed.clone()
    }

    pub fn state_of(&self, name: &str) -> Option<DomainState> {
        self.lock().domains.get(name).map(|d| d.state)
    }
}

#[async_trait]
impl Hypervisor for MemoryHypervisor {
    async fn list_domains(&self) -> Result<Vec<Snapshot>> {
        let inner = self.lock();
        if inner.fail_listing {
            return Err(Error::Query("failed to list domains".into()));
        }
        Ok(inner.domains.values().map(snapshot).collect())
    }

    async fn get_domain(&self, name: &str) -> Result<Option<Domain>> {
        let mut inner = self.lock();
        if let Some(change) = inner.on_lookup.remove(name) {
            match change {
                LookupChange::SetState(state) => {
                    if let Some(d) = inner.domains.get_mut(name) {
                        d.state = state;
                    }
                }
                LookupChange::Remove => {
                    inner.domains.remove(name);
                }
                LookupChange::BreakSnapshot => {
                    if let Some(d) = inner.domains.get_mut(name) {
                        d.broken = true;
                    }
                }
            }
        }

        match inner.domains.get(name) {
            Some(d) => Ok(Some(snapshot(d)?)),
            None => Ok(None),
        }
    }

    async fn create_transient(&self, descriptor: &DomainDescriptor) -> Result<Snapshot> {
        descriptor.to_xml()?;

        let mut inner = self.lock();
        inner.create_attempts.push(descriptor.clone());

        let name = descriptor.name.clone();
        if inner.fail_create.contains(&name) {
            return Err(Error::Create {
                name,
                reason: "rejected by hypervisor".into(),
            });
        }
        // Any existing domain holds the name, inactive persistent ones included.
        if let Some(existing) = inner.domains.get(&name) {
            return Err(Error::Create {
                reason: format!("domain '{name}' already exists with uuid {}", existing.uuid),
                name,
            });
        }

        let domain = MemoryDomain {
            name: name.clone(),
            uuid: uuid::Uuid::new_v4().to_string(),
            state: DomainState::Running,
            addresses: Vec::new(),
            broken: inner.fail_snapshot.contains(&name),
            persistent: false,
        };
        let snap = snapshot(&domain);
        inner.domains.insert(name.clone(), domain);

        info!(name = %name, "memory: domain created");
        Ok(snap)
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_destroy.contains(name) {
            return Err(Error::Destroy {
                name: name.to_string(),
                reason: "rejected by hypervisor".into(),
            });
        }
        let Some(domain) = inner.domains.get_mut(name) else {
            return Err(Error::NotFound(name.to_string()));
        };
        if !domain.state.is_active() {
            return Err(Error::Destroy {
                name: name.to_string(),
                reason: "domain is not running".into(),
            });
        }
        // Transient domains are undefined once stopped.
        if domain.persistent {
            domain.state = DomainState::Off;
        } else {
            inner.domains.remove(name);
        }
        inner.destroyed.push(name.to_string());

        info!(name, "memory: domain destroyed");
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> DomainDescriptor {
        DomainDescriptor::kvm(name, 1024, 1, "x86_64")
    }

    #[tokio::test]
    async fn create_then_list() {
        let hv = MemoryHypervisor::new().with_domain("old", DomainState::Off);

        let created = hv.create_transient(&descriptor("runner-1")).await.unwrap().unwrap();
        assert_eq!(created.state, DomainState::Running);

        let listed: Vec<Domain> = hv
            .list_domains()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|d| d.name == "old" && d.state == DomainState::Off));
        assert_eq!(hv.create_attempts().len(), 1);
    }

    #[tokio::test]
    async fn rejects_creating_over_any_existing_domain() {
        for state in [DomainState::Paused, DomainState::Off, DomainState::None] {
            let hv = MemoryHypervisor::new().with_domain("runner-1", state);
            let before = hv.get_domain("runner-1").await.unwrap().unwrap();

            let err = hv.create_transient(&descriptor("runner-1")).await.unwrap_err();

            assert!(matches!(err, Error::Create { .. }), "state {state}");
            assert!(err.to_string().contains("already exists"));
            let after = hv.get_domain("runner-1").await.unwrap().unwrap();
            assert_eq!(after.uuid, before.uuid);
            assert_eq!(after.state, state);
        }
    }

    #[tokio::test]
    async fn lookup_changes_apply_once() {
        let hv = MemoryHypervisor::new()
            .with_domain("a", DomainState::Paused)
            .with_domain("b", DomainState::Paused)
            .with_domain("c", DomainState::Paused);
        hv.on_next_lookup("a", LookupChange::SetState(DomainState::Running));
        hv.on_next_lookup("b", LookupChange::Remove);
        hv.on_next_lookup("c", LookupChange::BreakSnapshot);

        assert_eq!(hv.get_domain("a").await.unwrap().unwrap().state, DomainState::Running);
        assert!(hv.get_domain("b").await.unwrap().is_none());
        assert!(matches!(hv.get_domain("c").await, Err(Error::Snapshot(_))));

        hv.set_state("a", DomainState::Paused);
        assert_eq!(hv.get_domain("a").await.unwrap().unwrap().state, DomainState::Paused);
    }

    #[tokio::test]
    async fn destroy_removes_domain() {
        let hv = MemoryHypervisor::new().with_domain("runner-1", DomainState::Running);

        hv.destroy("runner-1").await.unwrap();

        assert!(hv.get_domain("runner-1").await.unwrap().is_none());
        assert_eq!(hv.destroyed(), vec!["runner-1"]);
        assert!(matches!(hv.destroy("runner-1").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn destroy_keeps_persistent_definitions() {
        let hv = MemoryHypervisor::new().with_persistent_domain("runner-1", DomainState::Paused);

        hv.destroy("runner-1").await.unwrap();

        assert_eq!(hv.state_of("runner-1"), Some(DomainState::Off));
        let err = hv.destroy("runner-1").await.unwrap_err();
        assert!(matches!(err, Error::Destroy { .. }));
        assert!(hv.create_transient(&descriptor("runner-1")).await.is_err());
    }

    #[tokio::test]
    async fn broken_snapshots_surface_per_domain() {
        let hv = MemoryHypervisor::new()
            .with_domain("a", DomainState::Running)
            .with_domain("b", DomainState::Running);
        hv.fail_snapshot("b");

        let listed = hv.list_domains().await.unwrap();
        assert!(listed[0].is_ok());
        assert_eq!(listed[1].as_ref().unwrap_err().name(), Some("b"));
        assert!(matches!(hv.get_domain("b").await, Err(Error::Snapshot(_))));
    }
}
