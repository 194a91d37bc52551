//! Network lifecycle controller.
//!
//! Drives networks through setup, implement, shutdown and destroy, and
//! NICs through allocation, reservation, release and removal. Work is
//! dispatched to the registered gurus and elements; the per-network lock
//! serializes implement, shutdown and destroy episodes.

mod implement;
mod nic;
mod teardown;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AuditLogger;
use crate::config::OrchestratorConfig;
use crate::element::NetworkElement;
use crate::error::{OrchestratorError, Result};
use crate::event::Event;
use crate::fsm::{Transition, transition};
use crate::guru::NetworkGuru;
use crate::model::{
    Account, AclType, DeploymentPlan, DesignOutcome, DomainId, DomainNetworkMap, GuestType,
    HypervisorType, Network, NetworkDesign, NetworkEvent, NetworkId, NetworkOffering, NetworkState,
    Nic, NicId, OfferingDetail, OfferingId, PhysicalNetworkId, ProviderName, Service,
    ServiceProviderMap, TrafficType, VmType, VpcId, Zone, ZoneId,
};
use crate::registry::ProviderRegistry;
use crate::rules::RulesManager;
use crate::store::{LockKey, ResourceStore, StoreError, Tx, with_transaction};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Load balancer scheme used to pick among several Lb providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LbScheme {
    Public,
    Internal,
}

/// Input to [`NetworkOrchestrator::setup_network`].
#[derive(Debug, Clone)]
pub struct NetworkSetup {
    pub owner: Account,
    pub offering: NetworkOffering,
    pub plan: DeploymentPlan,
    pub name: Option<String>,
    /// Template handed to gurus, e.g. a network with a fixed VLAN.
    pub predefined: Option<Network>,
    /// Fail instead of returning an existing network for the same
    /// owner, offering and zone.
    pub error_if_already_setup: bool,
    pub domain_id: Option<DomainId>,
    pub acl_type: Option<AclType>,
    pub subdomain_access: Option<bool>,
    pub vpc_id: Option<VpcId>,
    pub network_domain: Option<String>,
    pub display_network: bool,
}

impl NetworkSetup {
    pub fn new(owner: Account, offering: NetworkOffering, plan: DeploymentPlan) -> Self {
        Self {
            owner,
            offering,
            plan,
            name: None,
            predefined: None,
            error_if_already_setup: false,
            domain_id: None,
            acl_type: None,
            subdomain_access: None,
            vpc_id: None,
            network_domain: None,
            display_network: true,
        }
    }

    /// Whether the caller's template is specific enough to skip the lookup
    /// of an existing network.
    fn needs_existing_lookup(&self) -> bool {
        match &self.predefined {
            None => true,
            Some(p) => {
                self.offering.traffic_type != TrafficType::Guest
                    && p.cidr.is_none()
                    && p.broadcast_uri.is_none()
                    && !p.broadcast_domain_type.is_self_identifying()
            }
        }
    }
}

pub struct NetworkOrchestrator {
    store: Arc<dyn ResourceStore>,
    registry: Arc<ProviderRegistry>,
    rules: Arc<dyn RulesManager>,
    config: OrchestratorConfig,
    events: broadcast::Sender<Event>,
    audit: AuditLogger,
}

impl NetworkOrchestrator {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        registry: Arc<ProviderRegistry>,
        rules: Arc<dyn RulesManager>,
        config: OrchestratorConfig,
        audit: AuditLogger,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            registry,
            rules,
            config,
            events,
            audit,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub(crate) fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    fn load_network(&self, id: NetworkId) -> Result<Network> {
        self.store
            .network(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("network {}", id)))
    }

    fn load_nic(&self, id: NicId) -> Result<Nic> {
        self.store
            .nic(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("nic {}", id)))
    }

    fn load_offering(&self, id: OfferingId) -> Result<NetworkOffering> {
        self.store
            .offering(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("network offering {}", id)))
    }

    fn load_zone(&self, id: ZoneId) -> Result<Zone> {
        self.store
            .zone(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("zone {}", id)))
    }

    fn guru_for(&self, network: &Network) -> Result<Arc<dyn NetworkGuru>> {
        self.registry.guru(&network.guru_name).ok_or_else(|| {
            OrchestratorError::NotFound(format!(
                "network guru {} for network {}",
                network.guru_name, network.id
            ))
        })
    }

    fn network_rate(&self) -> Option<u32> {
        Some(self.config.network_throttling_rate_mbps)
    }

    /// Hypervisor label of the network's traffic type.
    fn network_tag(&self, hypervisor: HypervisorType, network: &Network) -> Option<String> {
        let physical = self.store.physical_network(network.physical_network_id?)?;
        physical.traffic_tag(network.traffic_type, hypervisor)
    }

    fn security_group_enabled(&self, network: &Network) -> bool {
        self.store
            .network_services(network.id)
            .supports(Service::SecurityGroup)
    }

    // =========================================================================
    // State persistence
    // =========================================================================

    /// Persist a network row and announce a state change.
    fn save_network(&self, network: &Network) -> Result<()> {
        self.save_network_with(network, |_| Ok(()))
    }

    /// Persist a network row together with further writes in one unit of
    /// work.
    fn save_network_with(
        &self,
        network: &Network,
        mut also: impl FnMut(&mut dyn Tx) -> Result<()>,
    ) -> Result<()> {
        let old = with_transaction(self.store.as_ref(), |tx| {
            let old = tx.network(network.id).map(|n| n.state);
            tx.update_network(network)?;
            also(tx)?;
            Ok(old)
        })?;
        if let Some(old) = old
            && old != network.state
        {
            debug!(network_id = %network.id, from = %old, to = %network.state, "Network state changed");
            self.publish(Event::NetworkStateChanged {
                id: network.id,
                old,
                new: network.state,
            });
        }
        Ok(())
    }

    /// Apply an event and persist the result. A rejection leaves the
    /// network untouched and is returned for the caller to handle.
    fn transit_network(
        &self,
        network: &mut Network,
        event: NetworkEvent,
    ) -> Result<Transition<NetworkState, NetworkEvent>> {
        let outcome = transition(network.state, event);
        if let Transition::Transitioned(state) = outcome {
            network.state = state;
            self.save_network(network)?;
        }
        Ok(outcome)
    }

    /// Apply an event, or write `fallback` if the table rejects it.
    fn transit_network_or(
        &self,
        network: &mut Network,
        event: NetworkEvent,
        fallback: NetworkState,
    ) -> Result<()> {
        if let Transition::Rejected { from, event } = self.transit_network(network, event)? {
            debug!(
                network_id = %network.id,
                from = %from,
                event = ?event,
                fallback = %fallback,
                "No transition, writing fallback state"
            );
            network.state = fallback;
            self.save_network(network)?;
        }
        Ok(())
    }

    /// Persist a NIC row. NICs of user VMs move the network's active NIC
    /// counter by `count`; user and guest router NICs flag the network for
    /// GC.
    fn save_nic(&self, nic: &Nic, network: &Network, count: i64) -> Result<()> {
        let old = with_transaction(self.store.as_ref(), |tx| {
            let old = tx.nic(nic.id).map(|n| n.state);
            tx.update_nic(nic)?;
            if nic.vm_type == Some(VmType::User) && count != 0 {
                debug!(network_id = %network.id, count, "Changing active nic count");
                tx.change_active_nics(network.id, count)?;
            }
            if nic.vm_type == Some(VmType::User)
                || (nic.vm_type == Some(VmType::DomainRouter) && network.is_guest())
            {
                tx.set_check_for_gc(network.id);
            }
            Ok(old)
        })?;
        if let Some(old) = old
            && old != nic.state
        {
            self.publish(Event::NicStateChanged {
                id: nic.id,
                network_id: nic.network_id,
                old,
                new: nic.state,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Network shape
    // =========================================================================

    /// Shared guest network in an advanced zone whose offering carries rule
    /// services. Such networks skip the event table.
    pub fn is_services_backed(&self, network: &Network) -> Result<bool> {
        if network.traffic_type != TrafficType::Guest
            || network.guest_type != Some(GuestType::Shared)
        {
            return Ok(false);
        }
        if self.load_zone(network.zone_id)?.is_basic() {
            return Ok(false);
        }
        Ok(self.load_offering(network.offering_id)?.is_shared_with_services())
    }

    pub fn is_network_implemented(&self, network: &Network) -> Result<bool> {
        match network.state {
            NetworkState::Implemented => Ok(true),
            NetworkState::Setup => Ok(!self.is_services_backed(network)?
                || self.load_zone(network.zone_id)?.is_basic()),
            _ => Ok(false),
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Design and persist the networks for an offering.
    ///
    /// Every registered guru is asked in order. At least one network must
    /// result. The owner's account lock is held throughout.
    pub async fn setup_network(&self, request: &NetworkSetup) -> Result<Vec<Network>> {
        let owner = &request.owner;
        let offering = &request.offering;

        let _lock = self
            .store
            .acquire(LockKey::Account(owner.id), self.config.account_lock_timeout())
            .await
            .ok_or_else(|| {
                OrchestratorError::ConcurrentOperation(format!(
                    "unable to acquire lock on account {}",
                    owner.id
                ))
            })?;

        if request.needs_existing_lookup() {
            let existing = self
                .store
                .networks_for(owner.id, offering.id, request.plan.zone_id);
            if let Some(first) = existing.first() {
                if request.error_if_already_setup {
                    return Err(OrchestratorError::InvalidParameter(format!(
                        "found existing network {} (state {}) for offering {}",
                        first.id, first.state, offering.id
                    )));
                }
                debug!(account_id = %owner.id, offering_id = %offering.id, "Network already set up");
                return Ok(existing);
            }
        }

        let mut networks = Vec::new();
        let mut related: Option<NetworkId> = None;

        for guru in self.registry.gurus() {
            let outcome = guru
                .design(offering, &request.plan, request.predefined.as_ref(), owner)
                .await?;

            let design = match outcome {
                None => {
                    debug!(guru = %guru.name(), offering_id = %offering.id, "Guru declined to design");
                    continue;
                }
                Some(DesignOutcome::Existing(network)) => {
                    networks.push(network);
                    continue;
                }
                Some(DesignOutcome::New(design)) => design,
            };

            let services =
                self.finalize_services_and_providers(offering, request.plan.physical_network_id)?;
            let network = self.build_network(request, guru.name(), design);
            let check_for_gc = network.guest_type == Some(GuestType::Isolated);

            let id = with_transaction(self.store.as_ref(), |tx| {
                let id = tx.insert_network(network.clone(), services.clone(), check_for_gc);
                let mut row = tx
                    .network(id)
                    .ok_or_else(|| StoreError::Internal(format!("network {} vanished", id)))?;
                row.related = Some(related.unwrap_or(id));
                tx.update_network(&row)?;
                tx.add_account_map(id, owner.id);
                if request.acl_type == Some(AclType::Domain)
                    && let Some(domain_id) = request.domain_id
                {
                    tx.add_domain_map(DomainNetworkMap {
                        network_id: id,
                        domain_id,
                        subdomain_access: request.subdomain_access.unwrap_or(true),
                    });
                }
                Ok(id)
            })?;
            related.get_or_insert(id);

            let network = self.load_network(id)?;
            info!(network_id = %id, guru = %guru.name(), state = %network.state, "Network designed");
            self.audit.network_created(&network);
            networks.push(network);
        }

        if networks.is_empty() {
            return Err(OrchestratorError::Internal(anyhow::anyhow!(
                "unable to convert network offering {} to a network",
                offering.id
            )));
        }

        Ok(networks)
    }

    fn build_network(&self, request: &NetworkSetup, guru: &str, design: NetworkDesign) -> Network {
        let name = request
            .name
            .clone()
            .or(design.name)
            .unwrap_or_else(|| request.offering.name.clone());
        let network_domain = request.network_domain.clone().or_else(|| {
            (design.traffic_type == TrafficType::Guest).then(|| {
                format!("cs{:x}.{}", request.owner.id.0, self.config.guest_domain_suffix)
            })
        });

        Network {
            id: NetworkId(0),
            uuid: Uuid::new_v4(),
            name,
            state: design.state,
            guest_type: request.offering.guest_type,
            traffic_type: design.traffic_type,
            broadcast_domain_type: design.broadcast_domain_type,
            mode: design.mode,
            offering_id: request.offering.id,
            account_id: request.owner.id,
            domain_id: request.domain_id.unwrap_or(request.owner.domain_id),
            zone_id: request.plan.zone_id,
            acl_type: request.acl_type,
            cidr: design.cidr,
            gateway: design.gateway,
            ip6_cidr: design.ip6_cidr,
            ip6_gateway: design.ip6_gateway,
            broadcast_uri: design.broadcast_uri,
            physical_network_id: design.physical_network_id.or(request.plan.physical_network_id),
            vpc_id: request.vpc_id,
            reservation_id: None,
            restart_required: false,
            display_network: request.display_network,
            related: None,
            guru_name: guru.to_string(),
            network_domain,
            created: Utc::now(),
            removed: None,
        }
    }

    // =========================================================================
    // Service and provider resolution
    // =========================================================================

    /// Resolve the service map for a new network.
    ///
    /// The first provider listed for a service wins, except for Lb which
    /// keeps all of them. Unnamed providers resolve to the registered
    /// default. With a physical network, every chosen provider must be
    /// enabled there for its service.
    pub fn finalize_services_and_providers(
        &self,
        offering: &NetworkOffering,
        physical_network_id: Option<PhysicalNetworkId>,
    ) -> Result<ServiceProviderMap> {
        let physical = physical_network_id
            .map(|id| {
                self.store
                    .physical_network(id)
                    .ok_or_else(|| OrchestratorError::NotFound(format!("physical network {}", id)))
            })
            .transpose()?;

        let mut map = ServiceProviderMap::new();
        for (service, provider) in &offering.services {
            if map.supports(*service) && !service.allows_multiple_providers() {
                continue;
            }
            let provider = match provider {
                Some(p) => p.clone(),
                None => self.registry.default_provider(*service).ok_or_else(|| {
                    OrchestratorError::UnsupportedService(format!(
                        "no default provider for service {} of offering {}",
                        service, offering.id
                    ))
                })?,
            };
            if let Some(physical) = &physical
                && !physical.provider_supports(&provider, *service)
            {
                return Err(OrchestratorError::UnsupportedService(format!(
                    "provider {} is not enabled for service {} in physical network {}",
                    provider, service, physical.id
                )));
            }
            map.insert(*service, provider);
        }
        Ok(map)
    }

    pub fn providers_for_service(&self, network_id: NetworkId, service: Service) -> Vec<ProviderName> {
        self.store
            .network_services(network_id)
            .providers(service)
            .to_vec()
    }

    /// The element providing `service` for a network, if any.
    ///
    /// Networks with several Lb providers must use
    /// [`lb_provider_for_network`](Self::lb_provider_for_network).
    pub fn element_for_service(
        &self,
        network_id: NetworkId,
        service: Service,
    ) -> Result<Option<Arc<dyn NetworkElement>>> {
        let providers = self.providers_for_service(network_id, service);
        match providers.as_slice() {
            [] => Ok(None),
            [provider] => self.registry.element(provider).map(Some).ok_or_else(|| {
                OrchestratorError::UnsupportedService(format!(
                    "no element registered for provider {} of service {} in network {}",
                    provider, service, network_id
                ))
            }),
            _ => Err(OrchestratorError::UnsupportedService(format!(
                "service {} resolves to {} providers in network {}",
                service,
                providers.len(),
                network_id
            ))),
        }
    }

    /// Lb provider for a scheme. With several providers the offering detail
    /// for the scheme decides.
    pub fn lb_provider_for_network(
        &self,
        network: &Network,
        scheme: LbScheme,
    ) -> Result<Option<Arc<dyn NetworkElement>>> {
        let providers = self.providers_for_service(network.id, Service::Lb);
        if providers.len() <= 1 {
            return self.element_for_service(network.id, Service::Lb);
        }

        let offering = self.load_offering(network.offering_id)?;
        let detail = match scheme {
            LbScheme::Public => OfferingDetail::PublicLbProvider,
            LbScheme::Internal => OfferingDetail::InternalLbProvider,
        };
        let chosen = offering.details.get(&detail).ok_or_else(|| {
            OrchestratorError::InvalidParameter(format!(
                "offering {} lists several Lb providers but no {:?}",
                offering.id, detail
            ))
        })?;
        let provider = providers
            .into_iter()
            .find(|p| p.as_str() == chosen)
            .ok_or_else(|| {
                OrchestratorError::InvalidParameter(format!(
                    "Lb provider {} is not configured for network {}",
                    chosen, network.id
                ))
            })?;
        self.registry.element(&provider).map(Some).ok_or_else(|| {
            OrchestratorError::UnsupportedService(format!(
                "no element registered for Lb provider {}",
                provider
            ))
        })
    }

    /// DHCP element of a network. Fails if the provider lacks the DHCP
    /// capability.
    pub fn dhcp_service_provider(&self, network_id: NetworkId) -> Result<Option<Arc<dyn NetworkElement>>> {
        let Some(element) = self.element_for_service(network_id, Service::Dhcp)? else {
            return Ok(None);
        };
        if element.dhcp().is_none() {
            return Err(OrchestratorError::UnsupportedService(format!(
                "element {} is not a DHCP provider",
                element.name()
            )));
        }
        Ok(Some(element))
    }

    /// User data element of a network, used for password and SSH key resets.
    pub fn user_data_provider(&self, network_id: NetworkId) -> Result<Option<Arc<dyn NetworkElement>>> {
        let Some(element) = self.element_for_service(network_id, Service::UserData)? else {
            return Ok(None);
        };
        if element.user_data().is_none() {
            return Err(OrchestratorError::UnsupportedService(format!(
                "element {} is not a user data provider",
                element.name()
            )));
        }
        Ok(Some(element))
    }

    pub fn static_nat_provider(&self, network_id: NetworkId) -> Result<Option<Arc<dyn NetworkElement>>> {
        self.element_for_service(network_id, Service::StaticNat)
    }
}
