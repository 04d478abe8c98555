//! In-memory domain → container registry.
//!
//! Two indices are kept under a single readers-writer lock:
//!
//! * the forward index maps a fully qualified, lower-case domain to the
//!   container currently owning it;
//! * the reverse index maps a container ID to the set of domains it owns,
//!   so a stop event can drop everything the container registered.
//!
//! Every mutation updates both indices while holding the write lock, so a
//! reader never observes one without the other.  Domain collisions are
//! resolved last-writer-wins; the displaced owner loses the domain from
//! its reverse entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::domain::{normalize_domain, DomainPolicy};
use crate::error::RegistryError;
use crate::types::{ContainerInfo, ContainerMetadata};

/// Thread-safe registry handle.  Clones share the same indices.
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    policy: Arc<DomainPolicy>,
    inner: Arc<RwLock<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// domain -> owning container
    by_domain: HashMap<String, Arc<ContainerInfo>>,
    /// container_id -> domains it owns
    by_container: HashMap<String, HashSet<String>>,
}

impl RegistryInner {
    fn remove_container(&mut self, container_id: &str) -> usize {
        let Some(domains) = self.by_container.remove(container_id) else {
            return 0;
        };
        let mut removed = 0;
        for domain in domains {
            let owned = self
                .by_domain
                .get(&domain)
                .is_some_and(|info| info.container_id() == container_id);
            if owned {
                self.by_domain.remove(&domain);
                removed += 1;
            }
        }
        removed
    }
}

impl DomainRegistry {
    pub fn new(policy: DomainPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }

    /// Registers `container` under every domain derived for it.
    ///
    /// A container that is already registered has its previous domain set
    /// replaced wholesale.  On error nothing is changed.
    pub fn add(&self, container: &ContainerMetadata) -> Result<Vec<String>, RegistryError> {
        let address = container.address.ok_or_else(|| RegistryError::NoAddress {
            container_id: container.id.clone(),
        })?;
        let domains = self.policy.derive(container);
        if domains.is_empty() {
            return Err(RegistryError::NoDomainDerived {
                container_id: container.id.clone(),
            });
        }

        let info = Arc::new(ContainerInfo::new(
            container.id.clone(),
            container.hostname.clone(),
            address,
        ));

        let mut inner = self.inner.write();
        inner.remove_container(&container.id);

        for domain in &domains {
            let previous = inner.by_domain.insert(domain.clone(), Arc::clone(&info));
            if let Some(previous) = previous {
                let previous_id = previous.container_id();
                if previous_id != container.id {
                    debug!(
                        "Domain {} moves from container {} to {}",
                        domain, previous_id, container.id
                    );
                    let now_empty = match inner.by_container.get_mut(previous_id) {
                        Some(owned) => {
                            owned.remove(domain);
                            owned.is_empty()
                        }
                        None => false,
                    };
                    if now_empty {
                        inner.by_container.remove(previous_id);
                    }
                }
            }
        }
        inner
            .by_container
            .insert(container.id.clone(), domains.iter().cloned().collect());

        debug!(
            "Registered container {} ({}) as {:?}",
            container.id, address, domains
        );
        Ok(domains)
    }

    /// Drops every domain owned by `container_id`.  Unknown IDs are ignored.
    pub fn remove(&self, container_id: &str) {
        let removed = self.inner.write().remove_container(container_id);
        if removed > 0 {
            debug!("Removed {} domain(s) of container {}", removed, container_id);
        }
    }

    /// Drops every container whose ID is not in `live`.  Returns the IDs removed.
    pub fn retain(&self, live: &HashSet<String>) -> Vec<String> {
        let mut inner = self.inner.write();
        let stale: Vec<String> = inner
            .by_container
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            inner.remove_container(id);
        }
        stale
    }

    /// Exact, case-insensitive lookup.  The trailing dot is optional.
    pub fn lookup_by_domain(&self, domain: &str) -> Option<Arc<ContainerInfo>> {
        let domain = normalize_domain(domain);
        self.inner.read().by_domain.get(&domain).cloned()
    }

    /// Domains currently owned by `container_id`, sorted.
    pub fn domains_of(&self, container_id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut domains: Vec<String> = inner
            .by_container
            .get(container_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        domains.sort();
        domains
    }

    /// Number of registered domains.
    pub fn len(&self) -> usize {
        self.inner.read().by_domain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_domain.is_empty()
    }
}
