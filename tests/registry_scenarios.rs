use std::net::IpAddr;

use docker_discovery::{ContainerMetadata, DomainPolicy, DomainRegistry, NetworkAttachment};

fn nginx(networks: Vec<NetworkAttachment>) -> ContainerMetadata {
    ContainerMetadata {
        id: "container-1".into(),
        hostname: "nginx".into(),
        address: Some("192.11.0.1".parse().unwrap()),
        networks,
    }
}

#[test]
fn hostname_resolves_under_base_domain() {
    let registry = DomainRegistry::new(DomainPolicy::new("example.org.", Vec::new()));
    registry.add(&nginx(Vec::new())).unwrap();

    let info = registry.lookup_by_domain("nginx.example.org.").unwrap();
    assert_eq!(info.address(), "192.11.0.1".parse::<IpAddr>().unwrap());
    assert!(registry.lookup_by_domain("wrong.example.org.").is_none());
}

#[test]
fn allowlisted_network_alias_is_standalone_domain() {
    let registry = DomainRegistry::new(DomainPolicy::new(
        "home.example.org.",
        vec!["my_project_network_name".into()],
    ));
    let networks = vec![NetworkAttachment::new(
        "my_project_network_name",
        vec!["myproject.loc".into()],
    )];
    registry.add(&nginx(networks)).unwrap();

    let info = registry.lookup_by_domain("myproject.loc.").unwrap();
    assert_eq!(info.container_id(), "container-1");
    assert_eq!(info.address(), "192.11.0.1".parse::<IpAddr>().unwrap());

    assert!(registry.lookup_by_domain("wrong.loc.").is_none());
    assert!(registry.lookup_by_domain("nginx.home.example.org.").is_some());
    assert!(registry.lookup_by_domain("wrong.home.example.org.").is_none());
    assert!(registry
        .lookup_by_domain("myproject.loc.home.example.org.")
        .is_none());
}

#[test]
fn lookup_is_case_and_dot_insensitive() {
    let registry = DomainRegistry::new(DomainPolicy::new("example.org.", Vec::new()));
    registry.add(&nginx(Vec::new())).unwrap();

    for query in ["NGINX.EXAMPLE.ORG.", "nginx.example.org", "Nginx.Example.Org"] {
        let info = registry.lookup_by_domain(query).unwrap();
        assert_eq!(info.container_id(), "container-1");
    }
}

#[test]
fn removing_displaced_owner_keeps_new_owner() {
    let registry = DomainRegistry::new(DomainPolicy::new("example.org.", Vec::new()));
    let a = nginx(Vec::new());
    let mut b = nginx(Vec::new());
    b.id = "container-2".into();
    b.address = Some("192.11.0.2".parse().unwrap());

    registry.add(&a).unwrap();
    registry.add(&b).unwrap();
    registry.remove("container-1");

    let info = registry.lookup_by_domain("nginx.example.org.").unwrap();
    assert_eq!(info.container_id(), "container-2");
    assert_eq!(info.address(), "192.11.0.2".parse::<IpAddr>().unwrap());

    registry.remove("container-2");
    registry.remove("container-2");
    assert!(registry.is_empty());
}
