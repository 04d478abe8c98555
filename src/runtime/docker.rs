use super::{ContainerRuntime, EventStream};
use crate::error::RuntimeError;
use crate::types::{ContainerMetadata, LifecycleEvent, LifecycleEventKind, NetworkAttachment};
use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures_util::future;
use futures_util::stream::StreamExt;
use log::{debug, warn};
use std::net::IpAddr;

/// Seconds before a request to the Docker daemon times out.
const REQUEST_TIMEOUT: u64 = 120;

/// How many `container:<id>` hops to follow when a container shares
/// another container's network namespace.
const MAX_NETWORK_MODE_HOPS: usize = 4;

pub struct DockerRuntime {
    docker: Docker,
}

/// How to reach the daemon for a configured endpoint.
#[derive(Debug, PartialEq, Eq)]
enum Endpoint<'a> {
    /// Unix socket path.
    Unix(&'a str),
    /// HTTP address; `tcp://` is rewritten to `http://`.
    Http(String),
    LocalDefaults,
}

fn parse_endpoint(endpoint: &str) -> Endpoint<'_> {
    if let Some(path) = endpoint.strip_prefix("unix://") {
        Endpoint::Unix(path)
    } else if let Some(addr) = endpoint.strip_prefix("tcp://") {
        Endpoint::Http(format!("http://{}", addr))
    } else if endpoint.starts_with("http://") {
        Endpoint::Http(endpoint.to_string())
    } else {
        Endpoint::LocalDefaults
    }
}

/// True when `err` means the daemon could not be talked to at all, as
/// opposed to the daemon answering with an error about one container.
fn is_transport(err: &bollard::errors::Error) -> bool {
    !matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { .. }
            | bollard::errors::Error::JsonDataError { .. }
            | bollard::errors::Error::JsonSerdeError { .. }
    )
}

impl DockerRuntime {
    /// Creates a client for `endpoint`.  No request is made until the
    /// first call, so this succeeds even while the daemon is down.
    pub fn connect(endpoint: &str) -> Result<Self, RuntimeError> {
        let docker = match parse_endpoint(endpoint) {
            Endpoint::Unix(path) => {
                Docker::connect_with_unix(path, REQUEST_TIMEOUT, API_DEFAULT_VERSION)?
            }
            Endpoint::Http(addr) => {
                Docker::connect_with_http(&addr, REQUEST_TIMEOUT, API_DEFAULT_VERSION)?
            }
            // Connect to the local Docker daemon using default settings.
            Endpoint::LocalDefaults => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker })
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspectResponse, RuntimeError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::NotFound {
                    container_id: id.to_string(),
                },
                other if is_transport(&other) => other.into(),
                other => RuntimeError::Rejected {
                    container_id: id.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Resolves the address of `detail`, following `container:<id>`
    /// network modes to the container that owns the namespace.
    async fn resolve_address(&self, detail: &ContainerInspectResponse) -> Option<IpAddr> {
        if let Some(ip) = direct_address(detail) {
            return Some(ip);
        }

        let mut mode = network_mode(detail);
        for _ in 0..MAX_NETWORK_MODE_HOPS {
            let Some(other) = mode
                .as_deref()
                .and_then(|m| m.strip_prefix("container:"))
                .map(str::to_string)
            else {
                break;
            };
            match self.inspect(&other).await {
                Ok(owner) => {
                    if let Some(ip) = direct_address(&owner) {
                        return Some(ip);
                    }
                    if let Some(ip) = network_mode_address(&owner) {
                        return Some(ip);
                    }
                    mode = network_mode(&owner);
                }
                Err(e) => {
                    warn!("Failed to inspect network namespace owner {}: {}", other, e);
                    return None;
                }
            }
        }

        network_mode_address(detail).or_else(|| first_network_address(detail))
    }

    async fn to_metadata(&self, detail: ContainerInspectResponse) -> ContainerMetadata {
        let address = self.resolve_address(&detail).await;
        let hostname = detail
            .config
            .as_ref()
            .and_then(|c| c.hostname.clone())
            .unwrap_or_default();
        let networks = detail
            .network_settings
            .as_ref()
            .and_then(|s| s.networks.as_ref())
            .map(|networks| {
                networks
                    .iter()
                    .map(|(name, endpoint)| {
                        let aliases = endpoint.aliases.clone().unwrap_or_default();
                        NetworkAttachment::new(name.clone(), aliases)
                    })
                    .collect()
            })
            .unwrap_or_default();

        ContainerMetadata {
            id: detail.id.unwrap_or_default(),
            hostname,
            address,
            networks,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running_containers(&self) -> Result<Vec<ContainerMetadata>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        let mut result = Vec::with_capacity(containers.len());
        for c in containers {
            let Some(id) = c.id else { continue };
            match self.inspect(&id).await {
                Ok(detail) => result.push(self.to_metadata(detail).await),
                Err(RuntimeError::NotFound { .. }) => {
                    debug!("Container {} disappeared during enumeration", id);
                }
                Err(e @ RuntimeError::Rejected { .. }) => {
                    warn!("Skipping container during enumeration: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    async fn fetch_container_metadata(&self, id: &str) -> Result<ContainerMetadata, RuntimeError> {
        let detail = self.inspect(id).await?;
        Ok(self.to_metadata(detail).await)
    }

    async fn subscribe_events(&self) -> Result<EventStream, RuntimeError> {
        let opts = EventsOptions::<String> {
            filters: [
                ("type", ["container", "network"].as_slice()),
                (
                    "event",
                    ["start", "die", "stop", "destroy", "connect", "disconnect"].as_slice(),
                ),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        };

        let stream = self.docker.events(Some(opts)).filter_map(|msg| {
            future::ready(match msg {
                Ok(event) => classify_event(event).map(Ok),
                Err(e) => Some(Err(RuntimeError::from(e))),
            })
        });
        Ok(stream.boxed())
    }
}

/// Maps a Docker event onto a lifecycle event, or `None` if it does not
/// affect name resolution.
fn classify_event(event: EventMessage) -> Option<LifecycleEvent> {
    let action = event.action.unwrap_or_default();
    let actor = event.actor?;

    match event.typ {
        Some(EventMessageTypeEnum::CONTAINER) => {
            let kind = match action.as_str() {
                "start" => LifecycleEventKind::Started,
                "die" | "stop" | "destroy" => LifecycleEventKind::Stopped,
                _ => return None,
            };
            let id = actor.id.filter(|id| !id.is_empty())?;
            Some(LifecycleEvent::new(kind, id))
        }
        Some(EventMessageTypeEnum::NETWORK) => {
            if action != "connect" && action != "disconnect" {
                return None;
            }
            // For network events the actor is the network; the container
            // is carried in the attributes.
            let id = actor
                .attributes
                .and_then(|a| a.get("container").cloned())
                .filter(|id| !id.is_empty())?;
            Some(LifecycleEvent::new(LifecycleEventKind::NetworkChanged, id))
        }
        _ => None,
    }
}

fn parse_ip(ipv4: Option<&String>, ipv6: Option<&String>) -> Option<IpAddr> {
    [ipv4, ipv6]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .find_map(|s| s.parse().ok())
}

/// Address on the default bridge, as reported at the top of the
/// network settings.
fn direct_address(detail: &ContainerInspectResponse) -> Option<IpAddr> {
    let settings = detail.network_settings.as_ref()?;
    parse_ip(settings.ip_address.as_ref(), settings.global_ipv6_address.as_ref())
}

fn network_mode(detail: &ContainerInspectResponse) -> Option<String> {
    detail.host_config.as_ref()?.network_mode.clone()
}

/// Address on the network named by the container's network mode.
fn network_mode_address(detail: &ContainerInspectResponse) -> Option<IpAddr> {
    let mode = network_mode(detail)?;
    let networks = detail.network_settings.as_ref()?.networks.as_ref()?;
    let net = networks.get(&mode)?;
    parse_ip(net.ip_address.as_ref(), net.global_ipv6_address.as_ref())
}

/// First attached network that has an address, by network name order.
fn first_network_address(detail: &ContainerInspectResponse) -> Option<IpAddr> {
    let networks = detail.network_settings.as_ref()?.networks.as_ref()?;
    let mut names: Vec<&String> = networks.keys().collect();
    names.sort();
    names.into_iter().find_map(|name| {
        let net = &networks[name];
        parse_ip(net.ip_address.as_ref(), net.global_ipv6_address.as_ref())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{EndpointSettings, EventActor, HostConfig, NetworkSettings};
    use std::collections::HashMap;

    fn event(typ: EventMessageTypeEnum, action: &str, id: &str, attrs: &[(&str, &str)]) -> EventMessage {
        EventMessage {
            typ: Some(typ),
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some(id.to_string()),
                attributes: Some(
                    attrs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
            }),
            ..Default::default()
        }
    }

    fn detail(ip: Option<&str>, mode: &str, networks: &[(&str, &str)]) -> ContainerInspectResponse {
        let networks: HashMap<String, EndpointSettings> = networks
            .iter()
            .map(|(name, ip)| {
                (
                    name.to_string(),
                    EndpointSettings {
                        ip_address: Some(ip.to_string()),
                        ..Default::default()
                    },
                )
            })
            .collect();
        ContainerInspectResponse {
            id: Some("c1".into()),
            host_config: Some(HostConfig {
                network_mode: Some(mode.to_string()),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ip_address: ip.map(str::to_string),
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_container_events() {
        let started = classify_event(event(EventMessageTypeEnum::CONTAINER, "start", "c1", &[]));
        assert_eq!(started, Some(LifecycleEvent::new(LifecycleEventKind::Started, "c1")));

        for action in ["die", "stop", "destroy"] {
            let stopped = classify_event(event(EventMessageTypeEnum::CONTAINER, action, "c1", &[]));
            assert_eq!(stopped, Some(LifecycleEvent::new(LifecycleEventKind::Stopped, "c1")));
        }

        assert_eq!(
            classify_event(event(EventMessageTypeEnum::CONTAINER, "pause", "c1", &[])),
            None
        );
    }

    #[test]
    fn classifies_network_events_by_container_attribute() {
        let connected = classify_event(event(
            EventMessageTypeEnum::NETWORK,
            "connect",
            "net-id",
            &[("container", "c1"), ("name", "backend")],
        ));
        assert_eq!(
            connected,
            Some(LifecycleEvent::new(LifecycleEventKind::NetworkChanged, "c1"))
        );

        assert_eq!(
            classify_event(event(EventMessageTypeEnum::NETWORK, "connect", "net-id", &[])),
            None
        );
        assert_eq!(
            classify_event(event(EventMessageTypeEnum::IMAGE, "start", "img", &[])),
            None
        );
    }

    #[test]
    fn endpoint_schemes() {
        assert_eq!(
            parse_endpoint("unix:///var/run/docker.sock.backup"),
            Endpoint::Unix("/var/run/docker.sock.backup")
        );
        assert_eq!(
            parse_endpoint("tcp://10.0.0.5:2375"),
            Endpoint::Http("http://10.0.0.5:2375".into())
        );
        assert_eq!(
            parse_endpoint("http://localhost:2375"),
            Endpoint::Http("http://localhost:2375".into())
        );
        assert_eq!(parse_endpoint("npipe:////./pipe/docker_engine"), Endpoint::LocalDefaults);
    }

    #[test]
    fn server_errors_are_not_transport_failures() {
        for status_code in [404, 409, 500] {
            let err = bollard::errors::Error::DockerResponseServerError {
                status_code,
                message: "broken container state".into(),
            };
            assert!(!is_transport(&err), "status {} treated as transport", status_code);
        }
        assert!(is_transport(&bollard::errors::Error::RequestTimeoutError));
    }

    #[test]
    fn prefers_default_bridge_address() {
        let d = detail(Some("172.17.0.2"), "default", &[("bridge", "172.17.0.2")]);
        assert_eq!(direct_address(&d), Some("172.17.0.2".parse().unwrap()));
    }

    #[test]
    fn falls_back_to_network_mode_then_first_network() {
        let d = detail(Some(""), "backend", &[("frontend", "10.1.0.2"), ("backend", "10.2.0.2")]);
        assert_eq!(direct_address(&d), None);
        assert_eq!(network_mode_address(&d), Some("10.2.0.2".parse().unwrap()));

        let d = detail(None, "host", &[("zeta", "10.9.0.2"), ("alpha", "10.1.0.2")]);
        assert_eq!(network_mode_address(&d), None);
        assert_eq!(first_network_address(&d), Some("10.1.0.2".parse().unwrap()));
    }

    #[test]
    fn ipv6_used_when_no_ipv4() {
        let mut d = detail(None, "default", &[]);
        if let Some(settings) = d.network_settings.as_mut() {
            settings.global_ipv6_address = Some("fd00::2".into());
        }
        assert_eq!(direct_address(&d), Some("fd00::2".parse().unwrap()));
    }
}
