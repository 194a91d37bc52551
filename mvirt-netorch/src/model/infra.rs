//! Zones, physical networks, VMs and address records the orchestrator reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::ids::{AccountId, DomainId, NetworkId, NicId, PhysicalNetworkId, VmId, ZoneId};
use super::network::TrafficType;
use super::service::{ProviderName, Service};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneNetworkType {
    Basic,
    Advanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    pub network_type: ZoneNetworkType,
}

impl Zone {
    pub fn is_basic(&self) -> bool {
        self.network_type == ZoneNetworkType::Basic
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub domain_id: DomainId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HypervisorType {
    Kvm,
    XenServer,
    VMware,
    Simulator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmType {
    User,
    DomainRouter,
    ConsoleProxy,
    SecondaryStorageVm,
    InternalLbVm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Migrating,
    Destroyed,
    Expunging,
    Error,
}

impl VmState {
    /// States in which the VM's NICs are being changed by another operation.
    pub fn is_transitional(self) -> bool {
        matches!(self, VmState::Starting | VmState::Stopping | VmState::Migrating)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: VmId,
    pub name: String,
    pub vm_type: VmType,
    pub state: VmState,
    pub hypervisor: HypervisorType,
    pub account_id: AccountId,
    pub zone_id: ZoneId,
    pub removed: Option<DateTime<Utc>>,
}

impl VmInstance {
    pub fn is_expunged(&self) -> bool {
        self.state == VmState::Expunging && self.removed.is_some()
    }
}

/// A provider's registration on a physical network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub enabled: bool,
    pub services: BTreeSet<Service>,
}

/// Hypervisor labels for one traffic type on a physical network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLabel {
    pub traffic_type: TrafficType,
    pub labels: HashMap<HypervisorType, String>,
    pub vlan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalNetwork {
    pub id: PhysicalNetworkId,
    pub zone_id: ZoneId,
    pub name: String,
    pub providers: HashMap<ProviderName, ProviderInstance>,
    pub traffic: Vec<TrafficLabel>,
}

impl PhysicalNetwork {
    pub fn is_provider_enabled(&self, provider: &ProviderName) -> bool {
        self.providers.get(provider).is_some_and(|p| p.enabled)
    }

    pub fn provider_supports(&self, provider: &ProviderName, service: Service) -> bool {
        self.providers
            .get(provider)
            .is_some_and(|p| p.enabled && p.services.contains(&service))
    }

    /// Network label for a traffic type on a hypervisor.
    pub fn traffic_tag(&self, traffic_type: TrafficType, hypervisor: HypervisorType) -> Option<String> {
        self.traffic
            .iter()
            .find(|t| t.traffic_type == traffic_type)
            .and_then(|t| t.labels.get(&hypervisor).cloned())
    }

    pub fn traffic_vlan(&self, traffic_type: TrafficType) -> Option<String> {
        self.traffic
            .iter()
            .find(|t| t.traffic_type == traffic_type)
            .and_then(|t| t.vlan.clone())
    }
}

/// A public address, possibly associated with a guest network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIp {
    pub id: u64,
    pub address: String,
    pub netmask: String,
    pub gateway: String,
    pub mac_address: Option<String>,
    pub vlan_tag: String,
    /// Public network the address is carved from.
    pub network_id: NetworkId,
    pub associated_network_id: Option<NetworkId>,
    pub source_nat: bool,
    pub allocated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpAliasState {
    Active,
    Revoked,
}

/// Extra router address serving DHCP for one subnet of a shared network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpAlias {
    pub id: u64,
    pub network_id: NetworkId,
    pub nic_id: Option<NicId>,
    pub ip4_address: String,
    pub gateway: String,
    pub state: IpAliasState,
}

/// Public address range attached to a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VlanRange {
    pub id: u64,
    pub network_id: NetworkId,
    pub vlan_tag: String,
    pub gateway: String,
    pub netmask: String,
}
