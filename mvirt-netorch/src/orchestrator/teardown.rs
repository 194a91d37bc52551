//! Shutdown and destroy.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::NetworkOrchestrator;
use crate::allocator::apply_profile_to_network;
use crate::dispatch::{in_scope_elements, record_outcome};
use crate::error::{OrchestratorError, Result};
use crate::event::Event;
use crate::fsm::{Transition, transition};
use crate::model::{
    AccountId, AclType, GuestType, Network, NetworkEvent, NetworkId, NetworkState,
    ReservationContext, VmType,
};
use crate::rules::RuleKind;
use crate::store::{LockGuard, LockKey, with_transaction};

impl NetworkOrchestrator {
    /// Shut a network down.
    ///
    /// Returns true if the network ends up allocated (or was already), false
    /// if it is in no state to be shut down, the lock could not be taken, or
    /// an element failed.
    pub async fn shutdown_network(
        &self,
        id: NetworkId,
        ctx: &ReservationContext,
        cleanup: bool,
    ) -> Result<bool> {
        let network = self.load_network(id)?;
        match network.state {
            NetworkState::Allocated => {
                debug!(network_id = %id, "Network is already shut down");
                return Ok(true);
            }
            NetworkState::Implemented | NetworkState::Shutdown => {}
            state => {
                debug!(network_id = %id, state = %state, "Network is not implemented");
                return Ok(false);
            }
        }

        let Some(guard) = self
            .store
            .acquire(LockKey::Network(id), self.config.network_lock_timeout())
            .await
        else {
            debug!(network_id = %id, "Unable to acquire network lock for shutdown");
            return Ok(false);
        };

        self.shutdown_locked(&guard, id, ctx, cleanup).await
    }

    /// Shutdown body. The caller holds the network lock.
    pub(crate) async fn shutdown_locked(
        &self,
        _guard: &LockGuard,
        id: NetworkId,
        ctx: &ReservationContext,
        cleanup: bool,
    ) -> Result<bool> {
        let mut network = self.load_network(id)?;
        match network.state {
            NetworkState::Allocated => return Ok(true),
            NetworkState::Implemented | NetworkState::Shutdown => {}
            _ => return Ok(false),
        }

        let services_backed = self.is_services_backed(&network)?;
        if services_backed {
            network.state = NetworkState::Shutdown;
            self.save_network(&network)?;
        } else {
            self.transit_network_or(&mut network, NetworkEvent::DestroyNetwork, NetworkState::Shutdown)?;
        }

        let mut success = self
            .shutdown_elements_and_resources(&network, ctx, cleanup)
            .await;

        if success {
            let offering = self.load_offering(network.offering_id)?;
            let guru = self.guru_for(&network)?;
            let mut profile = network.clone();
            match guru.shutdown(&mut profile, &offering).await {
                Ok(()) => {
                    apply_profile_to_network(&mut network, &profile);
                    network.state = if services_backed {
                        NetworkState::Setup
                    } else {
                        match transition(network.state, NetworkEvent::OperationSucceeded) {
                            Transition::Transitioned(state) => state,
                            Transition::Rejected { .. } => NetworkState::Allocated,
                        }
                    };
                    network.restart_required = false;
                    self.save_network_with(&network, |tx| {
                        tx.clear_check_for_gc(id);
                        Ok(())
                    })?;
                    info!(network_id = %id, state = %network.state, "Network shut down");
                }
                Err(e) => {
                    warn!(network_id = %id, guru = %guru.name(), error = %e, "Guru failed to shut down network");
                    success = false;
                }
            }
        }

        if !success {
            self.transit_network_or(
                &mut network,
                NetworkEvent::OperationFailed,
                NetworkState::Implemented,
            )?;
        }

        self.audit.network_shutdown(id, success);
        Ok(success)
    }

    /// Shut down rules (when some element asks for it) and every in-scope
    /// element. Every element is invoked; the result is the conjunction.
    pub(crate) async fn shutdown_elements_and_resources(
        &self,
        network: &Network,
        ctx: &ReservationContext,
        cleanup: bool,
    ) -> bool {
        let services = self.store.network_services(network.id);
        let elements = in_scope_elements(&self.registry, &services);

        if elements.iter().any(|e| e.cleanup_needed_on_shutdown())
            && !self.shutdown_network_resources(network, ctx.caller).await
        {
            warn!(network_id = %network.id, "Failed to clean up network resources during shutdown");
        }

        let mut success = true;
        for element in &elements {
            debug!(network_id = %network.id, provider = %element.provider(), "Shutting down network element");
            let result = element.shutdown(network, ctx, cleanup).await;
            success &= record_outcome(element.as_ref(), network, "shutdown", result);
        }
        success
    }

    async fn shutdown_network_resources(&self, network: &Network, caller: AccountId) -> bool {
        let mut success = true;
        for kind in RuleKind::SHUTDOWN_ORDER {
            match self.rules.shutdown(network, kind, caller).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(network_id = %network.id, rule = %kind, "Failed to shut down rules");
                    success = false;
                }
                Err(e) => {
                    warn!(network_id = %network.id, rule = %kind, error = %e, "Failed to shut down rules");
                    success = false;
                }
            }
        }
        success
    }

    /// Destroy a network and remove its row.
    ///
    /// Returns false when user VMs still use the network, when it has active
    /// NICs and `forced` is not set, or when any teardown step fails.
    pub async fn destroy_network(
        &self,
        id: NetworkId,
        ctx: &ReservationContext,
        forced: bool,
    ) -> Result<bool> {
        if self.store.network(id).is_none() {
            debug!(network_id = %id, "Unable to find network to destroy");
            return Ok(false);
        }

        let guard = self
            .store
            .acquire(LockKey::Network(id), self.config.network_lock_timeout())
            .await
            .ok_or_else(|| {
                OrchestratorError::ConcurrentOperation(format!(
                    "unable to acquire lock on network {}",
                    id
                ))
            })?;
        let Some(network) = self.store.network(id) else {
            debug!(network_id = %id, "Network was removed while waiting for its lock");
            return Ok(false);
        };

        let nics = self.store.nics_for_network(id);
        for nic in &nics {
            let Some(vm) = nic.vm_id.and_then(|vm_id| self.store.vm(vm_id)) else {
                continue;
            };
            if vm.vm_type == VmType::User && !vm.is_expunged() {
                warn!(
                    network_id = %id,
                    vm_id = %vm.id,
                    vm_state = ?vm.state,
                    "Cannot destroy network, not all user VMs are expunged"
                );
                return Ok(false);
            }
        }

        if self.load_zone(network.zone_id)?.is_basic() {
            for nic in &nics {
                let Some(vm) = nic.vm_id.and_then(|vm_id| self.store.vm(vm_id)) else {
                    continue;
                };
                if matches!(vm.vm_type, VmType::ConsoleProxy | VmType::SecondaryStorageVm)
                    && vm.removed.is_none()
                {
                    warn!(network_id = %id, vm_id = %vm.id, "Cannot destroy network in use by system VM");
                    return Ok(false);
                }
            }
        }

        // Reset last, a refused destroy keeps the counter.
        let active_nics = self.store.network_ops(id).active_nics;
        if active_nics > 0 {
            if !forced {
                warn!(network_id = %id, active_nics, "Cannot destroy network with active nics");
                return Ok(false);
            }
            warn!(network_id = %id, active_nics, "Forcing destroy, resetting stale active nic count");
            with_transaction(self.store.as_ref(), |tx| {
                tx.change_active_nics(id, -active_nics)?;
                Ok(())
            })?;
        }

        match self.shutdown_locked(&guard, id, ctx, false).await {
            Ok(true) => {}
            Ok(false) => warn!(network_id = %id, "Failed to shut down network before destroy"),
            Err(e) => warn!(network_id = %id, error = %e, "Failed to shut down network before destroy"),
        }

        let mut network = self.load_network(id)?;
        if !matches!(network.state, NetworkState::Allocated | NetworkState::Setup) && !forced {
            debug!(network_id = %id, state = %network.state, "Network is not in a state to be destroyed");
            return Ok(false);
        }

        if !self.cleanup_network_resources(&network, ctx.caller).await {
            warn!(network_id = %id, "Unable to destroy network, failed to clean up network resources");
            return Ok(false);
        }

        let services = self.store.network_services(id);
        let mut success = true;
        for element in in_scope_elements(&self.registry, &services) {
            debug!(network_id = %id, provider = %element.provider(), "Destroying network element");
            let result = element.destroy(&network, ctx).await;
            success &= record_outcome(element.as_ref(), &network, "destroy", result);
        }
        if !success {
            return Ok(false);
        }

        let offering = self.load_offering(network.offering_id)?;
        let guru = self.guru_for(&network)?;
        match guru.trash(&network, &offering).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(network_id = %id, guru = %guru.name(), "Guru failed to trash network");
                return Ok(false);
            }
            Err(e) => {
                warn!(network_id = %id, guru = %guru.name(), error = %e, "Guru failed to trash network");
                return Ok(false);
            }
        }

        let private_ips = self.store.private_ip_count(id);
        if private_ips > 0 {
            warn!(network_id = %id, private_ips, "Failed to delete vlans, private gateway ips are still allocated");
            return Ok(false);
        }

        network.state = match transition(network.state, NetworkEvent::DestroyNetwork) {
            Transition::Transitioned(state) => state,
            Transition::Rejected { from, .. } => {
                debug!(network_id = %id, from = %from, "Forcing destroy state");
                NetworkState::Destroy
            }
        };
        let removed = Utc::now();
        self.save_network_with(&network, |tx| {
            let vlans = tx.delete_vlans(id);
            debug!(network_id = %id, vlans, "Deleted vlan ranges");
            tx.remove_network(id, removed)?;
            tx.remove_domain_map(id);
            tx.remove_account_maps(id);
            Ok(())
        })?;

        let release_resource_count = network.guest_type == Some(GuestType::Isolated)
            && !offering.system_only
            && network.acl_type == Some(AclType::Account);

        info!(network_id = %id, release_resource_count, "Network destroyed");
        self.publish(Event::NetworkRemoved {
            id,
            release_resource_count,
        });
        self.audit.network_destroyed(id, release_resource_count);
        Ok(true)
    }

    /// Revoke every persisted rule family, release the network's addresses
    /// and push the resulting IP associations.
    async fn cleanup_network_resources(&self, network: &Network, caller: AccountId) -> bool {
        let mut success = true;
        for kind in RuleKind::DESTROY_ORDER {
            match self.rules.revoke(network, kind, caller).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(network_id = %network.id, rule = %kind, "Failed to revoke rules");
                    success = false;
                }
                Err(e) => {
                    warn!(network_id = %network.id, rule = %kind, error = %e, "Failed to revoke rules");
                    success = false;
                }
            }
        }

        match self.rules.release_network_ips(network, caller).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(network_id = %network.id, "Failed to release network ip addresses");
                success = false;
            }
            Err(e) => {
                warn!(network_id = %network.id, error = %e, "Failed to release network ip addresses");
                success = false;
            }
        }

        match self.load_offering(network.offering_id) {
            Ok(offering) => match self
                .rules
                .apply(network, &offering, RuleKind::IpAssociations, caller)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(network_id = %network.id, "Failed to apply ip associations");
                    success = false;
                }
                Err(e) => {
                    warn!(network_id = %network.id, error = %e, "Failed to apply ip associations");
                    success = false;
                }
            },
            Err(e) => {
                warn!(network_id = %network.id, error = %e, "Failed to apply ip associations");
                success = false;
            }
        }

        success
    }
}
