//! docker-discovery daemon entry point.

use std::sync::Arc;

use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use docker_discovery::dns_server::run_dns_server;
use docker_discovery::{Config, DockerRuntime, DomainRegistry, Synchronizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting docker-discovery with config: {:?}", cfg);

    // Shared registry
    let registry = DomainRegistry::new(cfg.domain_policy());

    // Container Runtime (Docker)
    let runtime = DockerRuntime::connect(&cfg.endpoint)
        .map_err(|e| anyhow::anyhow!("Invalid endpoint {}: {}", cfg.endpoint, e))?;
    let synchronizer = Synchronizer::new(Arc::new(runtime), registry.clone(), cfg.backoff());
    let shutdown = CancellationToken::new();
    let sync_handle = tokio::spawn(synchronizer.run(shutdown.clone()));

    // DNS Server
    let dns_bind = cfg.dns_bind;
    let ttl = cfg.ttl;
    let dns_handle = tokio::spawn(async move {
        if let Err(e) = run_dns_server(dns_bind, registry, ttl).await {
            error!("DNS server failed: {}", e);
        }
    });

    // Graceful Shutdown
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    shutdown.cancel();
    if let Err(e) = sync_handle.await {
        error!("Synchronizer task failed: {}", e);
    }
    dns_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
