//! Logical network services and the providers that implement them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A logical network capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Service {
    Dhcp,
    Dns,
    Firewall,
    Lb,
    StaticNat,
    SourceNat,
    PortForwarding,
    Vpn,
    UserData,
    NetworkAcl,
    Gateway,
    SecurityGroup,
    Connectivity,
}

impl Service {
    /// Lb is the only service that may resolve to several providers.
    pub fn allows_multiple_providers(self) -> bool {
        self == Service::Lb
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Name of a network element provider, e.g. `VirtualRouter`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderName(String);

impl ProviderName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Capability keys advertised by elements per service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    DhcpAccrossMultipleSubnets,
    SupportedProtocols,
    SupportedLbAlgorithms,
    SupportedSourceNatTypes,
    LbSchemes,
}

/// Service to capability map an element advertises.
pub type Capabilities = HashMap<Service, HashMap<Capability, String>>;

/// True if `capability` of `service` is advertised with the value `true`.
pub fn capability_enabled(caps: &Capabilities, service: Service, capability: Capability) -> bool {
    caps.get(&service)
        .and_then(|c| c.get(&capability))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Per-network association of services to providers.
///
/// Fixed when the network is set up. Every service maps to exactly one
/// provider, except Lb.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProviderMap(BTreeMap<Service, Vec<ProviderName>>);

impl ServiceProviderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. The first provider for a service wins; Lb accumulates.
    /// Returns false if the mapping was ignored.
    pub fn insert(&mut self, service: Service, provider: ProviderName) -> bool {
        let providers = self.0.entry(service).or_default();
        if providers.contains(&provider) {
            return false;
        }
        if !providers.is_empty() && !service.allows_multiple_providers() {
            return false;
        }
        providers.push(provider);
        true
    }

    pub fn providers(&self, service: Service) -> &[ProviderName] {
        self.0.get(&service).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn supports(&self, service: Service) -> bool {
        !self.providers(service).is_empty()
    }

    pub fn provider_supports(&self, service: Service, provider: &ProviderName) -> bool {
        self.providers(service).contains(provider)
    }

    /// Deduplicated set of providers across all services.
    pub fn distinct_providers(&self) -> BTreeSet<&ProviderName> {
        self.0.values().flatten().collect()
    }

    pub fn services(&self) -> impl Iterator<Item = Service> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Service, &[ProviderName])> + '_ {
        self.0.iter().map(|(s, p)| (*s, p.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Service, ProviderName)> for ServiceProviderMap {
    fn from_iter<I: IntoIterator<Item = (Service, ProviderName)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (service, provider) in iter {
            map.insert(service, provider);
        }
        map
    }
}
