//! Call context passed through lifecycle operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{AccountId, HostId, NicId, PhysicalNetworkId, VmId, ZoneId};
use super::infra::{HypervisorType, VmType};
use super::nic::NicProfile;

/// Where new networks should be designed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub zone_id: ZoneId,
    pub pod_id: Option<u64>,
    pub physical_network_id: Option<PhysicalNetworkId>,
}

impl DeploymentPlan {
    pub fn zone(zone_id: ZoneId) -> Self {
        Self {
            zone_id,
            pod_id: None,
            physical_network_id: None,
        }
    }
}

/// Placement chosen for a VM or a network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployDestination {
    pub zone_id: ZoneId,
    pub pod_id: Option<u64>,
    pub cluster_id: Option<u64>,
    pub host_id: Option<HostId>,
}

impl DeployDestination {
    /// Zone-only destination used when re-implementing outside a VM start.
    pub fn zone(zone_id: ZoneId) -> Self {
        Self {
            zone_id,
            pod_id: None,
            cluster_id: None,
            host_id: None,
        }
    }
}

/// Identity of one lifecycle episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationContext {
    pub reservation_id: String,
    pub caller: AccountId,
}

impl ReservationContext {
    pub fn new(caller: AccountId) -> Self {
        Self {
            reservation_id: Uuid::new_v4().to_string(),
            caller,
        }
    }

    pub fn with_reservation_id(reservation_id: impl Into<String>, caller: AccountId) -> Self {
        Self {
            reservation_id: reservation_id.into(),
            caller,
        }
    }

    /// Context for background work with no user caller.
    pub fn system() -> Self {
        Self::new(AccountId::SYSTEM)
    }
}

/// VM as seen by NIC operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmProfile {
    pub id: VmId,
    pub name: String,
    pub vm_type: VmType,
    pub hypervisor: HypervisorType,
    pub owner: AccountId,
    /// NIC profiles collected by prepare operations.
    pub nics: Vec<NicProfile>,
}

impl VmProfile {
    pub fn new(id: VmId, vm_type: VmType, hypervisor: HypervisorType, owner: AccountId) -> Self {
        Self {
            id,
            name: format!("i-{}", id.0),
            vm_type,
            hypervisor,
            owner,
            nics: Vec::new(),
        }
    }

    pub fn add_nic(&mut self, nic: NicProfile) {
        self.nics.push(nic);
    }

    pub fn nic(&self, id: NicId) -> Option<&NicProfile> {
        self.nics.iter().find(|n| n.id == Some(id))
    }
}
