//! Data structures used throughout the discovery daemon.
//!
//! [`ContainerMetadata`] is what the container runtime hands us; it is
//! the single shape every runtime adapter converts into.  The registry
//! stores [`ContainerInfo`] records, which are never mutated after
//! construction: an address change is modelled as a remove followed by
//! a fresh add.

use std::net::IpAddr;

/// A network a container is attached to, together with the aliases the
/// container carries on that network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub name: String,
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    pub fn new(name: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            name: name.into(),
            aliases,
        }
    }
}

/// Everything the registry needs to know about a container, as reported
/// by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub id: String,
    pub hostname: String,
    /// Resolved address, `None` while the container has no network
    /// address (e.g. not started on any network yet).
    pub address: Option<IpAddr>,
    pub networks: Vec<NetworkAttachment>,
}

/// Identity and address of a registered container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    container_id: String,
    hostname: String,
    address: IpAddr,
}

impl ContainerInfo {
    pub fn new(container_id: impl Into<String>, hostname: impl Into<String>, address: IpAddr) -> Self {
        Self {
            container_id: container_id.into(),
            hostname: hostname.into(),
            address,
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }
}

/// What happened to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEventKind {
    /// The container was started.
    Started,
    /// The container was connected to or disconnected from a network;
    /// its addresses and aliases must be re-read.
    NetworkChanged,
    /// The container stopped, died or was destroyed.
    Stopped,
}

/// A lifecycle event emitted by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub container_id: String,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleEventKind, container_id: impl Into<String>) -> Self {
        Self {
            kind,
            container_id: container_id.into(),
        }
    }
}
