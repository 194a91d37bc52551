//! Data model shared by the orchestrator, the store and providers.

mod context;
mod ids;
mod infra;
mod network;
mod nic;
mod offering;
mod service;

pub use context::{DeployDestination, DeploymentPlan, ReservationContext, VmProfile};
pub use ids::{
    AccountId, DomainId, HostId, NetworkId, NicId, OfferingId, PhysicalNetworkId, VmId, VpcId,
    ZoneId,
};
pub use infra::{
    Account, HypervisorType, IpAlias, IpAliasState, PhysicalNetwork, ProviderInstance, PublicIp,
    TrafficLabel, VlanRange, VmInstance, VmState, VmType, Zone, ZoneNetworkType,
};
pub use network::{
    AclType, BroadcastDomainType, DesignOutcome, DomainNetworkMap, GuestType, Network,
    NetworkDesign, NetworkEvent, NetworkOps, NetworkState, TrafficType, vlan_uri,
};
pub use nic::{Nic, NicEvent, NicProfile, NicState, ReservationStrategy, SecondaryIp};
pub use offering::{NetworkOffering, OfferingDetail};
pub use service::{
    Capabilities, Capability, ProviderName, Service, ServiceProviderMap, capability_enabled,
};
