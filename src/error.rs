//! Error types for docker-discovery.

use thiserror::Error;

/// Reasons a container could not be registered.  Both are non-fatal:
/// the caller logs them and moves on to the next container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The container has no resolvable network address yet.
    #[error("container {container_id} has no network address")]
    NoAddress { container_id: String },

    /// Neither a hostname nor an allowlisted network alias yielded a domain.
    #[error("no domain could be derived for container {container_id}")]
    NoDomainDerived { container_id: String },
}

/// Failures talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Transport-level failure (daemon down, socket closed, stream broken).
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime answered, but refused a request about one container
    /// (e.g. corrupted container state).  Other containers are unaffected.
    #[error("container {container_id} rejected by runtime: {reason}")]
    Rejected { container_id: String, reason: String },

    /// The runtime does not know the container (it went away).
    #[error("container {container_id} not found")]
    NotFound { container_id: String },
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        RuntimeError::Unavailable(err.to_string())
    }
}
