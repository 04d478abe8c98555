use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::RuntimeError;
use crate::types::{ContainerMetadata, LifecycleEvent};

pub mod docker;
pub use docker::DockerRuntime;

/// Stream of lifecycle events.  It ends, or yields an error, when the
/// connection to the runtime is lost.
pub type EventStream = BoxStream<'static, Result<LifecycleEvent, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All currently running containers.
    async fn list_running_containers(&self) -> Result<Vec<ContainerMetadata>, RuntimeError>;

    /// Full metadata of one container.  Returns [`RuntimeError::NotFound`]
    /// when the container no longer exists.
    async fn fetch_container_metadata(&self, id: &str) -> Result<ContainerMetadata, RuntimeError>;

    /// Subscribe to the live event feed.
    async fn subscribe_events(&self) -> Result<EventStream, RuntimeError>;
}
