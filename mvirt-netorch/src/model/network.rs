//! Network records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ids::{AccountId, DomainId, NetworkId, OfferingId, PhysicalNetworkId, VpcId, ZoneId};

/// Lifecycle state of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkState {
    /// Designed, not implemented.
    Allocated,
    /// Stable state for shared networks that only carry rule services.
    Setup,
    Implementing,
    Implemented,
    Shutdown,
    /// Terminal.
    Destroy,
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkEvent {
    ImplementNetwork,
    OperationSucceeded,
    OperationFailed,
    DestroyNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuestType {
    Isolated,
    Shared,
    L2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrafficType {
    Guest,
    Public,
    Management,
    Control,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AclType {
    Account,
    Domain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastDomainType {
    Native,
    Vlan,
    Vxlan,
    Lswitch,
    Pvlan,
    UnDecided,
}

impl BroadcastDomainType {
    /// Types whose broadcast URI fully identifies the segment.
    pub fn is_self_identifying(self) -> bool {
        matches!(
            self,
            BroadcastDomainType::Vlan | BroadcastDomainType::Lswitch | BroadcastDomainType::Vxlan
        )
    }
}

/// Build a `vlan://` URI from a tag. Tags that already carry a scheme are
/// returned unchanged.
pub fn vlan_uri(tag: &str) -> String {
    if tag.contains("://") {
        tag.to_string()
    } else {
        format!("vlan://{}", tag)
    }
}

/// A logical network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    pub uuid: Uuid,
    pub name: String,
    pub state: NetworkState,
    pub guest_type: Option<GuestType>,
    pub traffic_type: TrafficType,
    pub broadcast_domain_type: BroadcastDomainType,
    pub mode: Option<String>,
    pub offering_id: OfferingId,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub zone_id: ZoneId,
    pub acl_type: Option<AclType>,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub ip6_cidr: Option<String>,
    pub ip6_gateway: Option<String>,
    /// Opaque segment identifier, e.g. `vlan://100`.
    pub broadcast_uri: Option<String>,
    pub physical_network_id: Option<PhysicalNetworkId>,
    pub vpc_id: Option<VpcId>,
    /// Correlates one implement episode.
    pub reservation_id: Option<String>,
    pub restart_required: bool,
    pub display_network: bool,
    /// First network produced by the same design pass.
    pub related: Option<NetworkId>,
    /// Name of the guru that designed the network.
    pub guru_name: String,
    pub network_domain: Option<String>,
    pub created: DateTime<Utc>,
    pub removed: Option<DateTime<Utc>>,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ntwk[{}|{:?}|{}]", self.id, self.traffic_type, self.name)
    }
}

impl Network {
    pub fn is_guest(&self) -> bool {
        self.traffic_type == TrafficType::Guest
    }
}

/// Network-level fields a guru produces during design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDesign {
    pub name: Option<String>,
    /// Allocated, or Setup for networks that need no implement step.
    pub state: NetworkState,
    pub traffic_type: TrafficType,
    pub broadcast_domain_type: BroadcastDomainType,
    pub mode: Option<String>,
    pub cidr: Option<String>,
    pub gateway: Option<String>,
    pub ip6_cidr: Option<String>,
    pub ip6_gateway: Option<String>,
    pub broadcast_uri: Option<String>,
    pub physical_network_id: Option<PhysicalNetworkId>,
}

/// What a guru answers to a design request.
#[derive(Debug, Clone)]
pub enum DesignOutcome {
    /// The network already exists; reuse it.
    Existing(Network),
    /// Persist a new network from this design.
    New(NetworkDesign),
}

/// Bulk counters kept next to each network row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOps {
    pub active_nics: i64,
    pub check_for_gc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainNetworkMap {
    pub network_id: NetworkId,
    pub domain_id: DomainId,
    pub subdomain_access: bool,
}
