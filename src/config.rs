use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::domain::{normalize_domain, DomainPolicy};
use crate::synchronizer::Backoff;

pub const DEFAULT_ENDPOINT: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_DOMAIN: &str = "docker.local.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Docker endpoint, e.g. `unix:///var/run/docker.sock` or `tcp://host:2375`.
    pub endpoint: String,
    /// Base domain appended to container hostnames.
    pub domain: String,
    /// Networks whose aliases are served as standalone domains.
    pub network_aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    pub dns_bind: SocketAddr,
    /// TTL of answers for container records, in seconds.
    pub ttl: u32,
    pub reconnect_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.into(),
            domain: DEFAULT_DOMAIN.into(),
            network_aliases: Vec::new(),
            bind_ip: None,
            dns_bind: SocketAddr::from(([0, 0, 0, 0], 53)),
            ttl: 3600,
            reconnect_delay_ms: 2_000,
            reconnect_max_delay_ms: 30_000,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("docker-discovery.toml"))
                .merge(Json::file("docker-discovery.json"))
                .merge(Env::prefixed("DOCKER_DISCOVERY_")),
        )
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        config.domain = normalize_domain(&config.domain);
        if config.domain.is_empty() {
            anyhow::bail!("Invalid domain: base domain must not be empty");
        }
        if config.endpoint.trim().is_empty() {
            anyhow::bail!("Invalid endpoint: must not be empty");
        }
        if config.reconnect_delay_ms == 0 {
            anyhow::bail!("Invalid reconnect_delay_ms: must be positive");
        }
        if config.reconnect_delay_ms > config.reconnect_max_delay_ms {
            anyhow::bail!(
                "Invalid reconnect_delay_ms: {} exceeds reconnect_max_delay_ms {}",
                config.reconnect_delay_ms,
                config.reconnect_max_delay_ms
            );
        }

        // If bind_ip is set, override the IP part of dns_bind
        if let Some(ref ip) = config.bind_ip {
            let ip: IpAddr = ip
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
            config.dns_bind = SocketAddr::new(ip, config.dns_bind.port());
        }

        Ok(config)
    }

    pub fn domain_policy(&self) -> DomainPolicy {
        DomainPolicy::new(&self.domain, self.network_aliases.clone())
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.reconnect_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        )
    }
}
