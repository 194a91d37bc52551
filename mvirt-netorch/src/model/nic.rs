//! NIC records and the profiles exchanged with providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{NetworkId, NicId, VmId};
use super::infra::VmType;
use super::network::{BroadcastDomainType, TrafficType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NicState {
    Allocated,
    Reserving,
    Reserved,
    Releasing,
    Deallocating,
}

impl fmt::Display for NicState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NicEvent {
    ReservationRequested,
    ReleaseRequested,
    OperationSucceeded,
    OperationFailed,
    DeallocateRequested,
}

/// When address reservation happens relative to VM start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStrategy {
    /// Reserved on every VM start, released on stop.
    Start,
    /// Provisioned once at allocation, released on removal.
    Create,
    /// Synthetic reservation that stays Reserved.
    PlaceHolder,
}

/// A persisted network interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nic {
    pub id: NicId,
    /// None for placeholder NICs.
    pub vm_id: Option<VmId>,
    pub vm_type: Option<VmType>,
    pub network_id: NetworkId,
    pub device_id: u32,
    pub state: NicState,
    pub reservation_strategy: ReservationStrategy,
    pub reserver_name: Option<String>,
    pub reservation_id: Option<String>,
    pub ip4_address: Option<String>,
    pub ip4_netmask: Option<String>,
    pub ip4_gateway: Option<String>,
    pub ip6_address: Option<String>,
    pub ip6_gateway: Option<String>,
    pub ip6_cidr: Option<String>,
    pub mac_address: Option<String>,
    pub broadcast_uri: Option<String>,
    pub isolation_uri: Option<String>,
    pub mode: Option<String>,
    pub default_nic: bool,
    pub created: DateTime<Utc>,
}

impl fmt::Display for Nic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nic[{}-{}-{}]", self.id, self.network_id, self.device_id)
    }
}

/// Working copy of a NIC handed to gurus and elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicProfile {
    pub id: Option<NicId>,
    pub network_id: NetworkId,
    pub vm_id: Option<VmId>,
    pub device_id: Option<u32>,
    pub default_nic: bool,
    pub ip4_address: Option<String>,
    pub ip4_netmask: Option<String>,
    pub ip4_gateway: Option<String>,
    pub ip6_address: Option<String>,
    pub ip6_gateway: Option<String>,
    pub ip6_cidr: Option<String>,
    pub mac_address: Option<String>,
    pub broadcast_uri: Option<String>,
    pub isolation_uri: Option<String>,
    pub broadcast_type: Option<BroadcastDomainType>,
    pub traffic_type: Option<TrafficType>,
    pub mode: Option<String>,
    pub reservation_strategy: Option<ReservationStrategy>,
    pub reservation_id: Option<String>,
    /// Throttling rate in Mbps.
    pub network_rate: Option<u32>,
    pub security_group_enabled: bool,
    /// Hypervisor network label.
    pub name: Option<String>,
}

impl fmt::Display for NicProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "NicProfile[{}-{}]", id, self.network_id),
            None => write!(f, "NicProfile[new-{}]", self.network_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIp {
    pub id: u64,
    pub nic_id: NicId,
    pub network_id: NetworkId,
    pub vm_id: VmId,
    pub address: String,
}
