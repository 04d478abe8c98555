//! Keeps the [`DomainRegistry`] in step with the container runtime.
//!
//! The synchronizer is a small state machine driven by one task:
//!
//! ```text
//!   Bootstrapping ──ok──▶ Streaming ──stream error/close──▶ Reconnecting
//!         ▲  │                                                   │
//!         │  └──────────── runtime unavailable ─────────────────▶│
//!         └──────────────────────── backoff ─────────────────────┘
//! ```
//!
//! Every (re)connect performs a full enumeration of running containers,
//! since events missed while disconnected cannot be replayed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::registry::DomainRegistry;
use crate::runtime::ContainerRuntime;
use crate::types::{LifecycleEvent, LifecycleEventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Bootstrapping,
    Streaming,
    Reconnecting,
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

/// Why the event feed stopped being consumed.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    /// The feed failed.  `healthy` is set when it delivered events or
    /// stayed up for at least the backoff cap before failing.
    Broken { healthy: bool },
}

pub struct Synchronizer {
    runtime: Arc<dyn ContainerRuntime>,
    registry: DomainRegistry,
    backoff: Backoff,
    state_tx: watch::Sender<SyncState>,
}

impl Synchronizer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, registry: DomainRegistry, backoff: Backoff) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Bootstrapping);
        Self {
            runtime,
            registry,
            backoff,
            state_tx,
        }
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Runs until `shutdown` is cancelled.  Never returns on its own.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut state = SyncState::Bootstrapping;
        loop {
            self.state_tx.send_replace(state);
            let next = match state {
                SyncState::Bootstrapping => {
                    let result = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        result = self.bootstrap() => Some(result),
                    };
                    match result {
                        Some(Ok(())) => Some(SyncState::Streaming),
                        Some(Err(e)) => {
                            error!("Failed to enumerate containers: {}", e);
                            Some(SyncState::Reconnecting)
                        }
                        None => None,
                    }
                }
                SyncState::Streaming => match self.stream(&shutdown).await {
                    StreamEnd::Shutdown => None,
                    StreamEnd::Broken { healthy } => {
                        // Only a feed that actually worked ends the failure streak.
                        if healthy {
                            self.backoff.reset();
                        }
                        Some(SyncState::Reconnecting)
                    }
                },
                SyncState::Reconnecting => {
                    let delay = self.backoff.next_delay();
                    warn!("Reconnecting to container runtime in {:?}...", delay);
                    tokio::select! {
                        _ = shutdown.cancelled() => None,
                        _ = sleep(delay) => Some(SyncState::Bootstrapping),
                    }
                }
            };

            match next {
                Some(next) => state = next,
                None => {
                    info!("Synchronizer shutting down");
                    return;
                }
            }
        }
    }

    /// Registers every running container and prunes entries of containers
    /// that are gone.  Per-container failures are logged and skipped.
    async fn bootstrap(&self) -> Result<(), RuntimeError> {
        let containers = self.runtime.list_running_containers().await?;

        let mut live = HashSet::new();
        for container in &containers {
            match self.registry.add(container) {
                Ok(domains) => {
                    debug!("Container {} registered as {:?}", container.id, domains);
                    live.insert(container.id.clone());
                }
                Err(e) => warn!("Skipping container: {}", e),
            }
        }

        let stale = self.registry.retain(&live);
        info!(
            "Initial scan found {} containers, registered {}, pruned {}",
            containers.len(),
            live.len(),
            stale.len()
        );
        Ok(())
    }

    /// Consumes the event feed until it breaks or `shutdown` fires.
    async fn stream(&self, shutdown: &CancellationToken) -> StreamEnd {
        let mut events = tokio::select! {
            _ = shutdown.cancelled() => return StreamEnd::Shutdown,
            subscribed = self.runtime.subscribe_events() => match subscribed {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to subscribe to container events: {}", e);
                    return StreamEnd::Broken { healthy: false };
                }
            },
        };

        info!("Listening for container events...");
        let subscribed_at = Instant::now();
        let mut delivered = false;
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    delivered = true;
                    self.apply(event).await;
                    continue;
                }
                Some(Err(e)) => error!("Error in container event stream: {}", e),
                None => warn!("Container event stream ended"),
            }
            let healthy = delivered || subscribed_at.elapsed() >= self.backoff.max();
            return StreamEnd::Broken { healthy };
        }
    }

    async fn apply(&self, event: LifecycleEvent) {
        debug!("Container event: {:?} for {}", event.kind, event.container_id);
        match event.kind {
            LifecycleEventKind::Stopped => {
                info!("Container stopped: {}", event.container_id);
                self.registry.remove(&event.container_id);
            }
            LifecycleEventKind::Started | LifecycleEventKind::NetworkChanged => {
                self.refresh(&event.container_id).await;
            }
        }
    }

    /// Re-reads a container and replaces its registry entries.
    async fn refresh(&self, id: &str) {
        match self.runtime.fetch_container_metadata(id).await {
            Ok(container) => match self.registry.add(&container) {
                Ok(domains) => info!("Container {} -> {:?}", id, domains),
                Err(e) => {
                    debug!("Container {} not resolvable: {}", id, e);
                    self.registry.remove(id);
                }
            },
            Err(RuntimeError::NotFound { .. }) => {
                debug!("Container {} is gone", id);
                self.registry.remove(id);
            }
            Err(e) => warn!("Failed to inspect container {}: {}", id, e),
        }
    }
}
