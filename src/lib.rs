//! Docker discovery: resolve domain names to container addresses.
//!
//! A [`Synchronizer`] watches the container runtime and keeps a
//! [`DomainRegistry`] up to date; the DNS front end (or any other host)
//! answers queries with [`DomainRegistry::lookup_by_domain`].
//!
//! Each container is reachable as `<hostname>.<base domain>` and, for
//! networks on the alias allowlist, under each of its aliases on that
//! network:
//!
//! ```text
//! nginx  (hostname)                      -> nginx.docker.local.
//! alias myproject.loc on allowlisted net -> myproject.loc.
//! ```

pub mod config;
pub mod dns_server;
pub mod domain;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod synchronizer;
pub mod types;

pub use config::Config;
pub use domain::{normalize_domain, DomainPolicy};
pub use error::{RegistryError, RuntimeError};
pub use registry::DomainRegistry;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use synchronizer::{Backoff, SyncState, Synchronizer};
pub use types::{ContainerInfo, ContainerMetadata, LifecycleEvent, LifecycleEventKind, NetworkAttachment};
