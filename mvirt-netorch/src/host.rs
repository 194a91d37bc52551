//! Host connect validation.
//!
//! When a hypervisor host connects, the network labels it must expose are
//! derived from the zone's physical networks and checked by the agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::AuditLogger;
use crate::error::{OrchestratorError, Result};
use crate::model::{HostId, HypervisorType, PhysicalNetworkId, TrafficType, Zone, ZoneId};
use crate::store::ResourceStore;

/// What a connecting routing host reports about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupInfo {
    pub host_id: HostId,
    pub name: String,
    /// Zone name, or its numeric id as a string.
    pub zone: String,
    pub pod_id: Option<u64>,
    pub hypervisor: HypervisorType,
}

/// Labels one physical network needs on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalNetworkSetupInfo {
    pub physical_network_id: PhysicalNetworkId,
    pub guest_network_name: Option<String>,
    pub private_network_name: Option<String>,
    pub public_network_name: Option<String>,
    pub storage_network_name: Option<String>,
    pub mgmt_vlan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckNetworkAnswer {
    pub result: bool,
    pub details: String,
    pub need_reconnect: bool,
}

/// Transport to host agents.
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Send a CheckNetwork request. None if the agent did not answer.
    async fn check_network(
        &self,
        host: HostId,
        networks: Vec<PhysicalNetworkSetupInfo>,
    ) -> Option<CheckNetworkAnswer>;
}

pub struct HostNetworkValidator {
    store: Arc<dyn ResourceStore>,
    agent: Arc<dyn AgentChannel>,
    audit: AuditLogger,
}

impl HostNetworkValidator {
    pub fn new(store: Arc<dyn ResourceStore>, agent: Arc<dyn AgentChannel>, audit: AuditLogger) -> Self {
        Self { store, agent, audit }
    }

    /// Check that the host's network labels match the zone's physical
    /// networks.
    pub async fn process_connect(&self, host: &StartupInfo) -> Result<()> {
        let zone = self.resolve_zone(host)?;
        let networks = self.setup_info(zone.id, host.hypervisor);

        let Some(answer) = self.agent.check_network(host.host_id, networks).await else {
            warn!(host_id = %host.host_id, "No answer to CheckNetwork from agent");
            return Err(OrchestratorError::Connection {
                reconnect: true,
                message: format!(
                    "unable to get an answer to the CheckNetwork request from agent {}",
                    host.host_id
                ),
            });
        };

        if !answer.result {
            warn!(host_id = %host.host_id, details = %answer.details, "Agent network setup is incorrect");
            self.audit
                .host_network_alert(&host.name, zone.id, &answer.details);
            return Err(OrchestratorError::Connection {
                reconnect: true,
                message: format!(
                    "Incorrect Network setup on agent, reinitialize agent after network names are setup, details: {}",
                    answer.details
                ),
            });
        }

        if answer.need_reconnect {
            return Err(OrchestratorError::Connection {
                reconnect: false,
                message: "reinitialize agent after network setup".to_string(),
            });
        }

        debug!(host_id = %host.host_id, zone_id = %zone.id, "Network setup is correct on agent");
        Ok(())
    }

    fn resolve_zone(&self, host: &StartupInfo) -> Result<Zone> {
        self.store
            .zone_by_name(&host.zone)
            .or_else(|| {
                host.zone
                    .parse::<u64>()
                    .ok()
                    .and_then(|id| self.store.zone(ZoneId(id)))
            })
            .ok_or_else(|| {
                OrchestratorError::InvalidParameter(format!(
                    "host {} sent incorrect zone: {}",
                    host.name, host.zone
                ))
            })
    }

    fn setup_info(&self, zone: ZoneId, hypervisor: HypervisorType) -> Vec<PhysicalNetworkSetupInfo> {
        self.store
            .physical_networks_in_zone(zone)
            .into_iter()
            .map(|pnet| PhysicalNetworkSetupInfo {
                physical_network_id: pnet.id,
                guest_network_name: pnet.traffic_tag(TrafficType::Guest, hypervisor),
                private_network_name: pnet.traffic_tag(TrafficType::Management, hypervisor),
                public_network_name: pnet.traffic_tag(TrafficType::Public, hypervisor),
                storage_network_name: pnet.traffic_tag(TrafficType::Storage, hypervisor),
                mgmt_vlan: pnet.traffic_vlan(TrafficType::Management),
            })
            .collect()
    }
}
