//! Audit trail for network lifecycle milestones.
//!
//! Entries go to the `audit` tracing target so the node's log shipper can
//! route them separately from diagnostics.

use tracing::{error, info};

use crate::model::{Network, NetworkId, Nic, NicId, VmId, ZoneId};

#[derive(Debug, Clone)]
pub struct AuditLogger {
    component: String,
    enabled: bool,
}

impl AuditLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            enabled: true,
        }
    }

    pub fn new_noop() -> Self {
        Self {
            component: String::new(),
            enabled: false,
        }
    }

    fn log(&self, message: String, objects: Vec<String>) {
        if !self.enabled {
            return;
        }
        info!(target: "audit", component = %self.component, objects = ?objects, "{}", message);
    }

    // Network events
    pub fn network_created(&self, network: &Network) {
        self.log(
            format!("Network created: {} ({})", network.name, network.id),
            vec![network.id.to_string(), network.uuid.to_string()],
        );
    }

    pub fn network_implemented(&self, network: &Network) {
        self.log(
            format!(
                "Network implemented: {} broadcast={}",
                network.id,
                network.broadcast_uri.as_deref().unwrap_or("-")
            ),
            vec![network.id.to_string()],
        );
    }

    pub fn network_shutdown(&self, network_id: NetworkId, success: bool) {
        let outcome = if success { "shut down" } else { "failed to shut down" };
        self.log(format!("Network {}: {}", outcome, network_id), vec![network_id.to_string()]);
    }

    pub fn network_destroyed(&self, network_id: NetworkId, release_resource_count: bool) {
        self.log(
            format!(
                "Network destroyed: {} (resource count released: {})",
                network_id, release_resource_count
            ),
            vec![network_id.to_string()],
        );
    }

    pub fn network_gc(&self, network_id: NetworkId) {
        self.log(
            format!("Network {} shut down by garbage collector", network_id),
            vec![network_id.to_string()],
        );
    }

    // NIC events
    pub fn nic_allocated(&self, nic: &Nic) {
        self.log(
            format!("NIC allocated: {} device {}", nic.id, nic.device_id),
            vec![nic.id.to_string(), nic.network_id.to_string()],
        );
    }

    pub fn nic_released(&self, nic_id: NicId, vm_id: VmId) {
        self.log(
            format!("NIC released: {} of {}", nic_id, vm_id),
            vec![nic_id.to_string(), vm_id.to_string()],
        );
    }

    pub fn nic_removed(&self, nic_id: NicId, network_id: NetworkId) {
        self.log(
            format!("NIC removed: {}", nic_id),
            vec![nic_id.to_string(), network_id.to_string()],
        );
    }

    /// Host network setup does not match the zone's physical networks.
    pub fn host_network_alert(&self, host: &str, zone_id: ZoneId, details: &str) {
        if !self.enabled {
            return;
        }
        error!(
            target: "audit",
            component = %self.component,
            host,
            zone_id = %zone_id,
            "Incorrect network setup on agent: {}",
            details
        );
    }
}
