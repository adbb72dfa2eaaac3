use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain_xml::DomainDescriptor;
use tracing::{debug, info, warn};
use virt::connect::Connect;
use virt::domain::Domain as VirDomain;
use virt::error::ErrorNumber;
use virt::sys;

use crate::snapshot::{DomainHandle, snapshot};
use crate::types::Domain;
use crate::{Error, Hypervisor, Result, Snapshot};

/// libvirt backend over a single connection.
///
/// Calls block the current thread; the reconciler drives them one at a time.
/// The connection is closed when the backend is dropped, and every
/// `virt::domain::Domain` it obtains is freed when it goes out of scope.
pub struct LibvirtHypervisor {
    uri: String,
    conn: Mutex<Connect>,
}

impl LibvirtHypervisor {
    pub fn connect(uri: &str) -> Result<Self> {
        let conn = Connect::open(Some(uri)).map_err(|e| Error::Connection(format!("{uri}: {e}")))?;
        Ok(Self {
            uri: uri.to_string(),
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connect> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(conn: &Connect, name: &str) -> Result<Option<VirDomain>> {
        match VirDomain::lookup_by_name(conn, name) {
            Ok(dom) => Ok(Some(dom)),
            Err(e) if e.code() == ErrorNumber::NoDomain => Ok(None),
            Err(e) => Err(Error::Query(format!("lookup {name}: {e}"))),
        }
    }
}

impl DomainHandle for VirDomain {
    type Error = virt::error::Error;

    fn name(&self) -> std::result::Result<String, Self::Error> {
        self.get_name()
    }

    fn uuid(&self) -> std::result::Result<String, Self::Error> {
        self.get_uuid_string()
    }

    fn raw_state(&self) -> std::result::Result<u32, Self::Error> {
        self.get_state().map(|(state, _reason)| state as u32)
    }

    fn interface_addresses(&self) -> std::result::Result<Vec<Vec<String>>, Self::Error> {
        let ifaces = VirDomain::interface_addresses(self, sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_LEASE, 0)?;
        Ok(ifaces
            .into_iter()
            .map(|iface| iface.addrs.into_iter().map(|a| a.addr).collect())
            .collect())
    }
}

#[async_trait]
impl Hypervisor for LibvirtHypervisor {
    async fn list_domains(&self) -> Result<Vec<Snapshot>> {
        let conn = self.conn();
        let flags = sys::VIR_CONNECT_LIST_DOMAINS_ACTIVE | sys::VIR_CONNECT_LIST_DOMAINS_INACTIVE;
        let domains = conn
            .list_all_domains(flags)
            .map_err(|e| Error::Query(format!("list domains: {e}")))?;

        debug!(count = domains.len(), "libvirt: listed domains");
        Ok(domains.iter().map(snapshot).collect())
    }

    async fn get_domain(&self, name: &str) -> Result<Option<Domain>> {
        let conn = self.conn();
        match Self::lookup(&conn, name)? {
            Some(dom) => Ok(Some(snapshot(&dom)?)),
            None => Ok(None),
        }
    }

    async fn create_transient(&self, descriptor: &DomainDescriptor) -> Result<Snapshot> {
        let xml = descriptor.to_xml()?;
        debug!(name = %descriptor.name, xml = %xml, "libvirt: creating transient domain");

        let conn = self.conn();
        let dom = VirDomain::create_xml(&conn, &xml, sys::VIR_DOMAIN_NONE).map_err(|e| Error::Create {
            name: descriptor.name.clone(),
            reason: e.to_string(),
        })?;

        info!(name = %descriptor.name, "libvirt: transient domain started");
        Ok(snapshot(&dom))
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        let conn = self.conn();
        let dom = Self::lookup(&conn, name)?.ok_or_else(|| Error::NotFound(name.to_string()))?;

        dom.destroy().map_err(|e| Error::Destroy {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        info!(name, "libvirt: domain destroyed");
        Ok(())
    }

    fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for LibvirtHypervisor {
    fn drop(&mut self) {
        let conn = self.conn.get_mut().unwrap_or_else(PoisonError::into_inner);
        match conn.close() {
            Ok(_) => debug!(uri = %self.uri, "libvirt: connection closed"),
            Err(e) => warn!(uri = %self.uri, error = %e, "libvirt: failed to close connection"),
        }
    }
}
