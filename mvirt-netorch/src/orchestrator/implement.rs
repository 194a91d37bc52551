//! Implement, start and restart.

use tracing::{debug, error, info, warn};

use super::NetworkOrchestrator;
use crate::dispatch::{ensure_enabled, in_scope_elements, with_aggregated_execution};
use crate::error::{OrchestratorError, Result};
use crate::fsm::transition;
use crate::model::{
    AccountId, DeployDestination, GuestType, Network, NetworkEvent, NetworkId, NetworkOffering,
    NetworkState, ReservationContext, Service, TrafficType,
};
use crate::rules::RuleKind;
use crate::store::{LockGuard, LockKey};

impl NetworkOrchestrator {
    /// Bring a network to its implemented state.
    ///
    /// Returns the network as-is when it is already implemented, before and
    /// after taking the network lock. On failure the network is rolled back
    /// to shutdown and the error is returned.
    pub async fn implement_network(
        &self,
        id: NetworkId,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<Network> {
        let network = self.load_network(id)?;
        if self.is_network_implemented(&network)? {
            debug!(network_id = %id, "Network is already implemented");
            return Ok(network);
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

        let network = self.load_network(id)?;
        if self.is_network_implemented(&network)? {
            debug!(network_id = %id, "Network was implemented while waiting for the lock");
            return Ok(network);
        }

        match self.implement_locked(network, dest, ctx).await {
            Ok(network) => Ok(network),
            Err(e) => {
                warn!(network_id = %id, error = %e, "Failed to implement network, cleaning up");
                self.rollback_implement(&guard, id, ctx).await;
                Err(e)
            }
        }
    }

    async fn implement_locked(
        &self,
        mut network: Network,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<Network> {
        let offering = self.load_offering(network.offering_id)?;
        let guru = self.guru_for(&network)?;
        let services_backed = self.is_services_backed(&network)?;

        network.reservation_id = Some(ctx.reservation_id.clone());
        network.state = if services_backed {
            NetworkState::Implementing
        } else {
            transition(network.state, NetworkEvent::ImplementNetwork).into_result()?
        };
        self.save_network(&network)?;

        debug!(network_id = %network.id, guru = %guru.name(), "Asking guru to implement network");
        let implemented = guru.implement(&network, &offering, dest, ctx).await?;
        network.cidr = implemented.cidr;
        network.gateway = implemented.gateway;
        network.broadcast_uri = implemented.broadcast_uri;
        network.mode = implemented.mode;
        network.physical_network_id = implemented.physical_network_id;
        self.save_network(&network)?;

        self.implement_elements_and_resources(dest, &network, &offering, ctx)
            .await?;

        network.state = if services_backed {
            NetworkState::Implemented
        } else {
            transition(network.state, NetworkEvent::OperationSucceeded).into_result()?
        };
        network.restart_required = false;
        self.save_network(&network)?;

        info!(
            network_id = %network.id,
            broadcast_uri = network.broadcast_uri.as_deref().unwrap_or("-"),
            "Network implemented"
        );
        self.audit.network_implemented(&network);
        Ok(network)
    }

    /// Move a half-implemented network to Shutdown and tear it down. Errors
    /// are logged; the caller reports the original failure.
    async fn rollback_implement(&self, guard: &LockGuard, id: NetworkId, ctx: &ReservationContext) {
        let marked = self.load_network(id).and_then(|mut network| {
            if self.is_services_backed(&network)? {
                network.state = NetworkState::Shutdown;
                self.save_network(&network)
            } else {
                self.transit_network_or(
                    &mut network,
                    NetworkEvent::OperationFailed,
                    NetworkState::Shutdown,
                )
            }
        });
        if let Err(e) = marked {
            error!(network_id = %id, error = %e, "Failed to mark network as shut down");
        }

        match self.shutdown_locked(guard, id, ctx, false).await {
            Ok(true) => debug!(network_id = %id, "Network cleaned up after failed implement"),
            Ok(false) => warn!(network_id = %id, "Failed to shut down network after failed implement"),
            Err(e) => error!(network_id = %id, error = %e, "Failed to shut down network after failed implement"),
        }
    }

    /// Source NAT, every in-scope element, then the network rules inside the
    /// aggregated execution envelope.
    pub(crate) async fn implement_elements_and_resources(
        &self,
        dest: &DeployDestination,
        network: &Network,
        offering: &NetworkOffering,
        ctx: &ReservationContext,
    ) -> Result<()> {
        let services = self.store.network_services(network.id);
        let zone = self.load_zone(network.zone_id)?;
        let isolated_or_advanced_shared = match network.guest_type {
            Some(GuestType::Isolated) => true,
            Some(GuestType::Shared) => !zone.is_basic(),
            _ => false,
        };

        if !offering.shared_source_nat
            && services.supports(Service::SourceNat)
            && isolated_or_advanced_shared
        {
            debug!(network_id = %network.id, "Ensuring source NAT address");
            self.rules.ensure_source_nat(network, ctx).await?;
        }

        let elements = in_scope_elements(&self.registry, &services);
        for element in &elements {
            ensure_enabled(self.store.as_ref(), element.as_ref(), network)?;
            debug!(network_id = %network.id, provider = %element.provider(), "Implementing network element");
            if !element.implement(network, offering, dest, ctx).await? {
                return Err(OrchestratorError::ResourceUnavailable(format!(
                    "failed to implement provider {} for network {}",
                    element.provider(),
                    network.id
                )));
            }
        }

        let applied = with_aggregated_execution(
            &elements,
            network,
            dest,
            self.reprogram_network_rules(network, offering, ctx.caller),
        )
        .await?;
        if !applied {
            return Err(OrchestratorError::ResourceUnavailable(format!(
                "failed to apply network rules for network {} on implement",
                network.id
            )));
        }
        Ok(())
    }

    /// Re-apply every rule family in order. Returns false if any family
    /// failed to apply; the remaining families are still attempted.
    pub async fn reprogram_network_rules(
        &self,
        network: &Network,
        offering: &NetworkOffering,
        caller: AccountId,
    ) -> Result<bool> {
        let services = self.store.network_services(network.id);
        let zone = self.load_zone(network.zone_id)?;
        let default_egress = services.supports(Service::Firewall)
            && network.traffic_type == TrafficType::Guest
            && match network.guest_type {
                Some(GuestType::Isolated) => true,
                Some(GuestType::Shared) => !zone.is_basic(),
                _ => false,
            };

        let mut success = true;
        for kind in RuleKind::REPROGRAM_ORDER {
            if kind == RuleKind::DefaultEgress && !default_egress {
                continue;
            }
            if !self.rules.apply(network, offering, kind, caller).await? {
                warn!(network_id = %network.id, rule = %kind, "Failed to reapply rules");
                success = false;
            }
        }
        Ok(success)
    }

    /// Implement a network by id on behalf of an API caller.
    pub async fn start_network(
        &self,
        id: NetworkId,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<Network> {
        if self.store.network(id).is_none() {
            return Err(OrchestratorError::InvalidParameter(format!(
                "network {} does not exist",
                id
            )));
        }
        self.implement_network(id, dest, ctx).await
    }

    /// Re-implement a network's elements and rules in place.
    ///
    /// With `cleanup` the elements are shut down first. If that fails the
    /// network is flagged restart-required and false is returned.
    pub async fn restart_network(&self, id: NetworkId, caller: AccountId, cleanup: bool) -> Result<bool> {
        let _guard = self
            .store
            .acquire(LockKey::Network(id), self.config.network_lock_timeout())
            .await
            .ok_or_else(|| {
                OrchestratorError::ConcurrentOperation(format!(
                    "unable to acquire lock on network {}",
                    id
                ))
            })?;

        let mut network = self.load_network(id)?;
        let ctx = ReservationContext::new(caller);

        if cleanup {
            if !self.shutdown_elements_and_resources(&network, &ctx, true).await {
                warn!(network_id = %id, "Failed to shut down network elements during restart");
                network.restart_required = true;
                self.save_network(&network)?;
                return Ok(false);
            }
        } else {
            debug!(network_id = %id, "Skipping element shutdown, cleanup not requested");
        }

        let offering = self.load_offering(network.offering_id)?;
        let dest = DeployDestination::zone(network.zone_id);
        if let Err(e) = self
            .implement_elements_and_resources(&dest, &network, &offering, &ctx)
            .await
        {
            warn!(network_id = %id, error = %e, "Failed to re-implement network during restart");
            return Ok(false);
        }

        network.restart_required = false;
        self.save_network(&network)?;
        info!(network_id = %id, cleanup, "Network restarted");
        Ok(true)
    }
}
