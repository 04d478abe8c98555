//! Domain name derivation.
//!
//! A container is reachable under `<hostname>.<base domain>` and, for
//! every network on the alias allowlist, under each of its aliases on
//! that network.  Aliases are taken as already fully qualified and are
//! never suffixed with the base domain.

use crate::types::ContainerMetadata;

/// Lower-cases `name` and makes it fully qualified (one trailing dot).
/// A name with no labels (blank, or only dots) normalizes to the empty
/// string, so the root is never a valid key.
pub fn normalize_domain(name: &str) -> String {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() {
        return String::new();
    }
    let mut normalized = name.to_ascii_lowercase();
    normalized.push('.');
    normalized
}

/// Settings that decide which domains a container gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPolicy {
    base_domain: String,
    alias_networks: Vec<String>,
}

impl DomainPolicy {
    pub fn new(base_domain: &str, alias_networks: Vec<String>) -> Self {
        Self {
            base_domain: normalize_domain(base_domain),
            alias_networks,
        }
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub fn alias_networks(&self) -> &[String] {
        &self.alias_networks
    }

    /// Computes the normalized, de-duplicated set of domains for `container`,
    /// primary domain first.
    pub fn derive(&self, container: &ContainerMetadata) -> Vec<String> {
        let mut domains = Vec::new();

        let hostname = container.hostname.trim().trim_end_matches('.');
        if !hostname.is_empty() {
            push_unique(
                &mut domains,
                normalize_domain(&format!("{}.{}", hostname, self.base_domain)),
            );
        }

        if self.alias_networks.is_empty() {
            return domains;
        }

        for network in &container.networks {
            if !self.alias_networks.iter().any(|n| n == &network.name) {
                continue;
            }
            for alias in &network.aliases {
                let alias = normalize_domain(alias);
                if !alias.is_empty() {
                    push_unique(&mut domains, alias);
                }
            }
        }

        domains
    }
}

fn push_unique(domains: &mut Vec<String>, domain: String) {
    if !domains.contains(&domain) {
        domains.push(domain);
    }
}
