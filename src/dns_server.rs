//! DNS server subsystem.
//!
//! A thin [hickory-dns](https://crates.io/crates/hickory-server) front
//! end over the [`DomainRegistry`]:
//!
//! * **Registered names**: answered locally with an A or AAAA record
//!   carrying the container's address.
//! * **Everything else**: forwarded to upstream resolvers using the
//!   `hickory-resolver` crate.

use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, ResponseCode};
use hickory_server::proto::rr::rdata::{A, AAAA};
use hickory_server::proto::rr::{Name, RData, Record, RecordType};
use hickory_server::server::{
    Request, RequestHandler, ResponseHandler, ResponseInfo, ServerFuture,
};
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Duration;

use crate::registry::DomainRegistry;

/// Timeout for idle TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);

/// TTL used for forwarded answers.
const FORWARD_TTL: u32 = 60;

/// Start the DNS server.
pub async fn run_dns_server(
    bind_addr: SocketAddr,
    registry: DomainRegistry,
    ttl: u32,
) -> anyhow::Result<()> {
    info!("DNS server starting on {}", bind_addr);

    // Create a system resolver for forwarding names we do not own.
    let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
        error!(
            "Failed to load system resolv.conf: {}. Falling back to Google DNS.",
            e
        );
        TokioAsyncResolver::tokio(ResolverConfig::google(), ResolverOpts::default())
    });

    let handler = DiscoveryDns {
        registry,
        resolver,
        ttl,
    };
    let mut server = ServerFuture::new(handler);

    // Register UDP listener.
    let udp = UdpSocket::bind(bind_addr).await?;
    server.register_socket(udp);

    // Register TCP listener.
    let tcp = TcpListener::bind(bind_addr).await?;
    server.register_listener(tcp, TCP_TIMEOUT);

    // Run the server until future resolves.
    server.block_until_done().await?;
    Ok(())
}

/// Result of answering a query from the registry.
#[derive(Debug, PartialEq)]
enum LocalAnswer {
    /// The name belongs to a container and the type matches its address.
    Address(IpAddr),
    /// The name belongs to a container but the type has no data.
    NoData,
}

/// Matches an address against the query type.
fn answer_for(address: IpAddr, qtype: RecordType) -> LocalAnswer {
    match (address, qtype) {
        (IpAddr::V4(_), RecordType::A | RecordType::ANY)
        | (IpAddr::V6(_), RecordType::AAAA | RecordType::ANY) => LocalAnswer::Address(address),
        _ => LocalAnswer::NoData,
    }
}

fn address_record(name: Name, ttl: u32, address: IpAddr) -> Record {
    let rdata = match address {
        IpAddr::V4(ipv4) => RData::A(A(ipv4)),
        IpAddr::V6(ipv6) => RData::AAAA(AAAA(ipv6)),
    };
    Record::from_rdata(name, ttl, rdata)
}

struct DiscoveryDns {
    registry: DomainRegistry,
    resolver: TokioAsyncResolver,
    ttl: u32,
}

impl DiscoveryDns {
    fn local_answer(&self, qname: &str, qtype: RecordType) -> Option<LocalAnswer> {
        self.registry
            .lookup_by_domain(qname)
            .map(|info| answer_for(info.address(), qtype))
    }

    async fn forward(&self, name: &Name, qname: &str, qtype: RecordType) -> (ResponseCode, Vec<Record>) {
        match self.resolver.lookup_ip(qname).await {
            Ok(lookup) => {
                let records = lookup
                    .iter()
                    .filter(|addr| answer_for(*addr, qtype) != LocalAnswer::NoData)
                    .map(|addr| address_record(name.clone(), FORWARD_TTL, addr))
                    .collect();
                (ResponseCode::NoError, records)
            }
            Err(e) => {
                warn!("Resolver lookup failed for {}: {}", qname, e);
                (ResponseCode::ServFail, Vec::new())
            }
        }
    }
}

async fn send<R: ResponseHandler>(
    request: &Request,
    mut response_handle: R,
    mut header: Header,
    code: ResponseCode,
    records: &[Record],
) -> ResponseInfo {
    header.set_response_code(code);
    let builder = MessageResponseBuilder::from_message_request(request);
    let response = builder.build(
        header,
        records.iter(),
        std::iter::empty(),
        std::iter::empty(),
        std::iter::empty(),
    );
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!("Failed to send DNS response: {}", e);
            header.set_response_code(ResponseCode::ServFail);
            header.into()
        }
    }
}

#[async_trait]
impl RequestHandler for DiscoveryDns {
    async fn handle_request<R>(&self, request: &Request, response_handle: R) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        let query = request.query();
        let name: Name = query.name().clone().into();
        let qname = name.to_string();
        let qtype = query.query_type();

        let mut header = Header::response_from_request(request.header());
        header.set_recursion_available(true);

        match self.local_answer(&qname, qtype) {
            Some(LocalAnswer::Address(address)) => {
                debug!("Answering {} {} with {}", qname, qtype, address);
                header.set_authoritative(true);
                let record = address_record(name, self.ttl, address);
                send(request, response_handle, header, ResponseCode::NoError, &[record]).await
            }
            Some(LocalAnswer::NoData) => {
                header.set_authoritative(true);
                send(request, response_handle, header, ResponseCode::NoError, &[]).await
            }
            None => {
                let (code, records) = self.forward(&name, &qname, qtype).await;
                send(request, response_handle, header, code, &records).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainPolicy;
    use crate::types::ContainerMetadata;

    #[test]
    fn answer_matches_address_family() {
        let v4: IpAddr = "192.11.0.1".parse().unwrap();
        let v6: IpAddr = "fd00::1".parse().unwrap();

        assert_eq!(answer_for(v4, RecordType::A), LocalAnswer::Address(v4));
        assert_eq!(answer_for(v4, RecordType::ANY), LocalAnswer::Address(v4));
        assert_eq!(answer_for(v4, RecordType::AAAA), LocalAnswer::NoData);
        assert_eq!(answer_for(v6, RecordType::AAAA), LocalAnswer::Address(v6));
        assert_eq!(answer_for(v6, RecordType::A), LocalAnswer::NoData);
        assert_eq!(answer_for(v4, RecordType::MX), LocalAnswer::NoData);
    }

    #[test]
    fn address_record_carries_ttl_and_rdata() {
        let name = Name::from_ascii("nginx.example.org.").unwrap();
        let record = address_record(name.clone(), 3600, "192.11.0.1".parse().unwrap());

        assert_eq!(record.name(), &name);
        assert_eq!(record.ttl(), 3600);
        assert_eq!(record.record_type(), RecordType::A);
    }

    #[tokio::test]
    async fn local_answers_come_from_registry() {
        let registry = DomainRegistry::new(DomainPolicy::new("example.org.", Vec::new()));
        registry
            .add(&ContainerMetadata {
                id: "c1".into(),
                hostname: "nginx".into(),
                address: Some("192.11.0.1".parse().unwrap()),
                networks: Vec::new(),
            })
            .unwrap();
        let handler = DiscoveryDns {
            registry,
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            ttl: 3600,
        };

        assert_eq!(
            handler.local_answer("Nginx.Example.org.", RecordType::A),
            Some(LocalAnswer::Address("192.11.0.1".parse().unwrap()))
        );
        assert_eq!(
            handler.local_answer("nginx.example.org.", RecordType::AAAA),
            Some(LocalAnswer::NoData)
        );
        assert_eq!(handler.local_answer("wrong.example.org.", RecordType::A), None);
    }
}
