//! NIC allocation, reservation, release, removal and migration.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::NetworkOrchestrator;
use crate::allocator::{
    DeviceSlots, apply_profile_to_nic_for_release, apply_reservation_to_nic, nic_from_profile,
    placeholder_nic, profile_for_nic,
};
use crate::dispatch::{ensure_enabled, in_scope_elements, record_outcome};
use crate::element::NetworkElement;
use crate::error::{OrchestratorError, ProviderResult, Result};
use crate::event::Event;
use crate::fsm::{Transition, transition};
use crate::guru::{MigrationResponder, NetworkGuru};
use crate::model::{
    Capability, DeployDestination, GuestType, HypervisorType, IpAliasState, Network, Nic,
    NicEvent, NicId, NicProfile, NicState, ReservationContext, ReservationStrategy, Service,
    TrafficType, VmProfile, VmType, capability_enabled, vlan_uri,
};
use crate::store::{LockKey, with_transaction};

/// Placeholder device id for NIC profiles synthesized during migration.
const MIGRATION_DEVICE_ID: u32 = 255;

impl NetworkOrchestrator {
    fn profile_for(&self, nic: &Nic, network: &Network, vm: &VmProfile) -> NicProfile {
        profile_for_nic(
            nic,
            network,
            self.network_rate(),
            self.security_group_enabled(network),
            self.network_tag(vm.hypervisor, network),
        )
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate NICs for a VM.
    ///
    /// Each entry pairs a network with the requested NIC profiles; an empty
    /// list asks the guru for one NIC with defaults. Device ids are unique
    /// across the batch and at most one NIC is default. A sole NIC becomes
    /// the default. On error every row created by this call is removed.
    pub async fn allocate(
        &self,
        vm: &mut VmProfile,
        networks: &[(Network, Vec<NicProfile>)],
    ) -> Result<Vec<NicProfile>> {
        let size: usize = networks.iter().map(|(_, r)| r.len().max(1)).sum();
        let mut created = Vec::new();

        let profiles = match self.allocate_batch(vm, networks, size, &mut created).await {
            Ok(profiles) => profiles,
            Err(e) => {
                if !created.is_empty() {
                    warn!(vm_id = %vm.id, nics = created.len(), error = %e, "Allocation failed, removing created nics");
                    with_transaction(self.store.as_ref(), |tx| {
                        for id in &created {
                            tx.delete_nic(*id)?;
                        }
                        Ok(())
                    })?;
                }
                return Err(e);
            }
        };

        for profile in &profiles {
            vm.add_nic(profile.clone());
        }
        Ok(profiles)
    }

    async fn allocate_batch(
        &self,
        vm: &VmProfile,
        networks: &[(Network, Vec<NicProfile>)],
        size: usize,
        created: &mut Vec<NicId>,
    ) -> Result<Vec<NicProfile>> {
        let mut slots = DeviceSlots::new(size);
        let mut profiles: Vec<NicProfile> = Vec::with_capacity(size);
        let mut default_seen = false;

        for (network, requested) in networks {
            let requests: Vec<Option<&NicProfile>> = if requested.is_empty() {
                vec![None]
            } else {
                requested.iter().map(Some).collect()
            };

            for request in requests {
                let is_default = request.is_some_and(|r| r.default_nic);
                let cursor = slots.next_free();
                let Some((profile, cursor)) = self
                    .allocate_nic(request, network, is_default, cursor, vm, created)
                    .await?
                else {
                    continue;
                };
                slots.advance_to(cursor);

                let device_id = profile.device_id.unwrap_or_default();
                slots.claim(device_id, &profile)?;

                if profile.default_nic {
                    if default_seen {
                        return Err(OrchestratorError::InvalidParameter(
                            "you cannot specify two nics as default nics".to_string(),
                        ));
                    }
                    default_seen = true;
                }
                profiles.push(profile);
            }
        }

        if profiles.len() != size {
            warn!(vm_id = %vm.id, nics = profiles.len(), requested = size, "Nic count does not match the request");
            return Err(OrchestratorError::Internal(anyhow::anyhow!(
                "number of nics {} doesn't match number of requested nics {}",
                profiles.len(),
                size
            )));
        }

        if let [profile] = profiles.as_mut_slice()
            && !profile.default_nic
            && let Some(id) = profile.id
        {
            profile.default_nic = true;
            let mut nic = self.load_nic(id)?;
            nic.default_nic = true;
            with_transaction(self.store.as_ref(), |tx| {
                tx.update_nic(&nic)?;
                Ok(())
            })?;
        }

        Ok(profiles)
    }

    /// Ask the network's guru for one NIC and persist it. Returns None when
    /// the guru declines, otherwise the profile and the advanced device id
    /// cursor.
    async fn allocate_nic(
        &self,
        requested: Option<&NicProfile>,
        network: &Network,
        is_default: bool,
        cursor: u32,
        vm: &VmProfile,
        created: &mut Vec<NicId>,
    ) -> Result<Option<(NicProfile, u32)>> {
        let guru = self.guru_for(network)?;
        let Some(mut profile) = guru.allocate(network, requested, vm).await? else {
            debug!(network_id = %network.id, guru = %guru.name(), "Guru declined to allocate a nic");
            return Ok(None);
        };

        profile.default_nic = is_default;
        profile.mode = requested
            .and_then(|r| r.mode.clone())
            .or_else(|| network.mode.clone());

        let (mut nic, cursor) = nic_from_profile(&profile, network, vm.id, vm.vm_type, cursor);
        nic.id = with_transaction(self.store.as_ref(), |tx| Ok(tx.insert_nic(nic.clone())))?;
        created.push(nic.id);

        debug!(nic_id = %nic.id, network_id = %network.id, device_id = nic.device_id, "Nic allocated");
        self.audit.nic_allocated(&nic);
        Ok(Some((self.profile_for(&nic, network, vm), cursor)))
    }

    /// Persist a NIC standing in for an address reserved outside any VM.
    pub fn save_placeholder_nic(
        &self,
        network: &Network,
        ip4_address: Option<String>,
        ip6_address: Option<String>,
        vm_type: Option<VmType>,
    ) -> Result<Nic> {
        let mut nic = placeholder_nic(network, ip4_address, ip6_address, vm_type);
        nic.id = with_transaction(self.store.as_ref(), |tx| Ok(tx.insert_nic(nic.clone())))?;
        debug!(nic_id = %nic.id, network_id = %network.id, "Placeholder nic saved");
        Ok(nic)
    }

    // =========================================================================
    // Preparation
    // =========================================================================

    /// Prepare every NIC of a VM for placement at `dest`, default NICs
    /// first. Networks are implemented on the way, except for routers which
    /// would otherwise recurse into their own deployment.
    pub async fn prepare(
        &self,
        vm: &mut VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<()> {
        let mut nics = self.store.nics_for_vm(vm.id);
        nics.sort_by_key(|n| !n.default_nic);

        for nic in nics {
            let network = if vm.vm_type == VmType::DomainRouter {
                self.load_network(nic.network_id)?
            } else {
                self.implement_network(nic.network_id, dest, ctx).await?
            };
            let profile = self.prepare_nic(vm, dest, ctx, nic.id, &network).await?;
            vm.add_nic(profile);
        }
        Ok(())
    }

    /// Reserve one NIC and let every in-scope element prepare it.
    pub async fn prepare_nic(
        &self,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
        nic_id: NicId,
        network: &Network,
    ) -> Result<NicProfile> {
        let mut nic = self.load_nic(nic_id)?;
        let guru = self.guru_for(network)?;

        let mut profile = if nic.reservation_strategy == ReservationStrategy::Start {
            nic.state = transition(nic.state, NicEvent::ReservationRequested).into_result()?;
            nic.reservation_id = Some(ctx.reservation_id.clone());
            self.save_nic(&nic, network, 0)?;

            let mut profile = self.profile_for(&nic, network, vm);
            if let Err(e) = guru.reserve(&mut profile, network, vm, dest, ctx).await {
                warn!(nic_id = %nic.id, guru = %guru.name(), error = %e, "Guru failed to reserve nic");
                nic.state = match transition(nic.state, NicEvent::OperationFailed) {
                    Transition::Transitioned(state) => state,
                    Transition::Rejected { .. } => NicState::Allocated,
                };
                self.save_nic(&nic, network, 0)?;
                return Err(e.into());
            }

            apply_reservation_to_nic(&mut nic, &profile);
            nic.reserver_name = Some(guru.name().to_string());
            nic.state = transition(nic.state, NicEvent::OperationSucceeded).into_result()?;
            self.save_nic(&nic, network, 1)?;
            profile
        } else {
            let mut profile = self.profile_for(&nic, network, vm);
            guru.update_nic_profile(&mut profile, network).await;
            nic.state = NicState::Reserved;
            self.save_nic(&nic, network, 1)?;
            profile
        };

        let services = self.store.network_services(network.id);
        for element in in_scope_elements(&self.registry, &services) {
            ensure_enabled(self.store.as_ref(), element.as_ref(), network)?;
            debug!(nic_id = %nic.id, provider = %element.provider(), "Asking element to prepare nic");
            self.prepare_element(element.as_ref(), network, &profile, vm, dest, ctx)
                .await?;
        }

        profile.security_group_enabled = self.security_group_enabled(network);
        guru.update_nic_profile(&mut profile, network).await;
        Ok(profile)
    }

    async fn prepare_element(
        &self,
        element: &dyn NetworkElement,
        network: &Network,
        profile: &NicProfile,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<()> {
        let declined = |what: &str| OrchestratorError::InsufficientAddressCapacity {
            network_id: network.id,
            message: format!("provider {} failed to {} for nic {}", element.provider(), what, profile),
        };

        if !element.prepare(network, profile, vm, dest, ctx).await? {
            return Err(declined("prepare"));
        }

        if vm.vm_type != VmType::User {
            return Ok(());
        }

        let services = self.store.network_services(network.id);
        if services.provider_supports(Service::Dhcp, element.provider())
            && let Some(dhcp) = element.dhcp()
        {
            let multi_subnet = capability_enabled(
                element.capabilities(),
                Service::Dhcp,
                Capability::DhcpAccrossMultipleSubnets,
            );
            if multi_subnet
                && profile.ip6_address.is_none()
                && !dhcp
                    .config_dhcp_support_for_subnet(network, profile, vm, dest, ctx)
                    .await?
            {
                return Err(declined("configure dhcp support for the subnet"));
            }
            if !dhcp.add_dhcp_entry(network, profile, vm, dest, ctx).await? {
                return Err(declined("add a dhcp entry"));
            }
        }

        if services.provider_supports(Service::UserData, element.provider())
            && let Some(user_data) = element.user_data()
            && !user_data
                .add_password_and_userdata(network, profile, vm, dest, ctx)
                .await?
        {
            return Err(declined("add password and user data"));
        }

        Ok(())
    }

    // =========================================================================
    // Release and removal
    // =========================================================================

    /// Release every NIC of a VM.
    pub async fn release(&self, vm: &VmProfile) -> Result<()> {
        for nic in self.store.nics_for_vm(vm.id) {
            self.release_nic(vm, nic.id).await?;
        }
        Ok(())
    }

    /// Release one NIC's reservation. Elements are notified after the NIC
    /// lock is dropped.
    pub async fn release_nic(&self, vm: &VmProfile, nic_id: NicId) -> Result<()> {
        let released = {
            let _guard = self
                .store
                .acquire(LockKey::Nic(nic_id), self.config.network_lock_timeout())
                .await
                .ok_or_else(|| {
                    OrchestratorError::ConcurrentOperation(format!(
                        "unable to acquire lock on nic {}",
                        nic_id
                    ))
                })?;
            self.release_nic_locked(vm, nic_id).await?
        };

        if let Some((network, profile)) = released {
            let services = self.store.network_services(network.id);
            for element in in_scope_elements(&self.registry, &services) {
                debug!(nic_id = %nic_id, provider = %element.provider(), "Asking element to release nic");
                let result = element.release(&network, &profile, vm, None).await;
                record_outcome(element.as_ref(), &network, "release", result);
            }
        }

        self.audit.nic_released(nic_id, vm.id);
        Ok(())
    }

    /// Returns the network and profile to hand to elements when a
    /// reservation was released through the guru.
    async fn release_nic_locked(
        &self,
        vm: &VmProfile,
        nic_id: NicId,
    ) -> Result<Option<(Network, NicProfile)>> {
        let mut nic = self.load_nic(nic_id)?;
        let original = nic.state;
        if !matches!(original, NicState::Reserved | NicState::Reserving) {
            return Ok(None);
        }
        let network = self.load_network(nic.network_id)?;

        if nic.reservation_strategy != ReservationStrategy::Start {
            nic.state = NicState::Allocated;
            self.save_nic(&nic, &network, -1)?;
            return Ok(None);
        }

        let guru = self.guru_for(&network)?;
        nic.state = transition(original, NicEvent::ReleaseRequested).into_result()?;
        self.save_nic(&nic, &network, 0)?;

        let mut profile = self.profile_for(&nic, &network, vm);
        let released = guru
            .release(&mut profile, vm, nic.reservation_id.as_deref())
            .await;
        match released {
            Ok(true) => {
                apply_profile_to_nic_for_release(&mut nic, &profile);
                nic.state = transition(nic.state, NicEvent::OperationSucceeded).into_result()?;
                let count = if original == NicState::Reserved { -1 } else { 0 };
                self.save_nic(&nic, &network, count)?;
                info!(nic_id = %nic.id, network_id = %network.id, "Nic released");
            }
            Ok(false) => {
                warn!(nic_id = %nic.id, guru = %guru.name(), "Guru declined to release nic");
                nic.state = transition(nic.state, NicEvent::OperationFailed).into_result()?;
                self.save_nic(&nic, &network, 0)?;
            }
            Err(e) => {
                nic.state = transition(nic.state, NicEvent::OperationFailed).into_result()?;
                self.save_nic(&nic, &network, 0)?;
                return Err(e.into());
            }
        }

        Ok(Some((network, profile)))
    }

    /// Remove every NIC of a VM.
    pub async fn cleanup_nics(&self, vm: &VmProfile) -> Result<()> {
        for nic in self.store.nics_for_vm(vm.id) {
            self.remove_nic(vm, nic.id).await?;
        }
        Ok(())
    }

    /// Deallocate a NIC and delete its row and secondary addresses.
    pub async fn remove_nic(&self, vm: &VmProfile, nic_id: NicId) -> Result<()> {
        let mut nic = self.load_nic(nic_id)?;
        if nic.reservation_strategy == ReservationStrategy::Start && nic.state != NicState::Allocated {
            if let Err(e) = self.release_nic(vm, nic_id).await {
                warn!(nic_id = %nic_id, error = %e, "Failed to release nic before removal");
            }
            nic = self.load_nic(nic_id)?;
        }

        let network = self.load_network(nic.network_id)?;
        nic.state = match transition(nic.state, NicEvent::DeallocateRequested) {
            Transition::Transitioned(state) => state,
            Transition::Rejected { .. } => NicState::Deallocating,
        };
        self.save_nic(&nic, &network, 0)?;

        let profile = self.profile_for(&nic, &network, vm);
        let services = self.store.network_services(network.id);

        if nic.reservation_strategy == ReservationStrategy::Create {
            for element in in_scope_elements(&self.registry, &services) {
                debug!(nic_id = %nic_id, provider = %element.provider(), "Asking element to release nic");
                let result = element.release(&network, &profile, vm, None).await;
                record_outcome(element.as_ref(), &network, "release", result);
            }
        }

        if vm.vm_type == VmType::User
            && services.supports(Service::Dhcp)
            && network.traffic_type == TrafficType::Guest
            && network.guest_type == Some(GuestType::Shared)
            && self.is_last_nic_in_subnet(&nic)
            && let Some(element) = self.dhcp_service_provider(network.id)?
            && capability_enabled(
                element.capabilities(),
                Service::Dhcp,
                Capability::DhcpAccrossMultipleSubnets,
            )
        {
            self.remove_dhcp_service_in_subnet(element.as_ref(), &nic, &network)
                .await?;
        }

        let guru = self.guru_for(&network)?;
        guru.deallocate(&network, &profile, vm).await?;

        let secondary = with_transaction(self.store.as_ref(), |tx| {
            tx.delete_nic(nic_id)?;
            Ok(tx.delete_secondary_ips(nic_id))
        })?;

        info!(nic_id = %nic_id, network_id = %network.id, secondary_ips = secondary, "Nic removed");
        self.publish(Event::NicRemoved {
            id: nic_id,
            network_id: network.id,
        });
        self.audit.nic_removed(nic_id, network.id);
        Ok(())
    }

    /// Hard-delete every NIC row of a VM. Returns the number of rows.
    pub fn expunge_nics(&self, vm: &VmProfile) -> Result<usize> {
        let nics = self.store.nics_for_vm(vm.id);
        with_transaction(self.store.as_ref(), |tx| {
            for nic in &nics {
                tx.delete_nic(nic.id)?;
                tx.delete_secondary_ips(nic.id);
            }
            Ok(nics.len())
        })
    }

    fn is_last_nic_in_subnet(&self, nic: &Nic) -> bool {
        self.store
            .nics_for_network(nic.network_id)
            .iter()
            .filter(|n| {
                n.vm_type == Some(VmType::User)
                    && n.ip4_gateway == nic.ip4_gateway
                    && n.broadcast_uri == nic.broadcast_uri
            })
            .count()
            <= 1
    }

    /// Revoke the router alias serving DHCP for the NIC's subnet and free its
    /// address.
    async fn remove_dhcp_service_in_subnet(
        &self,
        element: &dyn NetworkElement,
        nic: &Nic,
        network: &Network,
    ) -> Result<()> {
        let Some(gateway) = nic.ip4_gateway.as_deref() else {
            return Ok(());
        };
        let Some(mut alias) = self.store.active_ip_alias(network.id, gateway) else {
            return Ok(());
        };

        alias.state = IpAliasState::Revoked;
        with_transaction(self.store.as_ref(), |tx| {
            tx.update_ip_alias(&alias)?;
            tx.unassign_public_ip(alias.network_id, &alias.ip4_address)?;
            Ok(())
        })?;

        let Some(dhcp) = element.dhcp() else {
            return Ok(());
        };
        match dhcp.remove_dhcp_support_for_subnet(network).await {
            Ok(true) => debug!(network_id = %network.id, gateway, "Removed dhcp support for subnet"),
            Ok(false) => warn!(
                network_id = %network.id,
                alias = %alias.ip4_address,
                "Failed to remove the ip alias on the router, alias is revoked and its ip freed"
            ),
            Err(e) => warn!(
                network_id = %network.id,
                alias = %alias.ip4_address,
                error = %e,
                "Failed to remove the ip alias on the router, alias is revoked and its ip freed"
            ),
        }
        Ok(())
    }

    // =========================================================================
    // Migration
    // =========================================================================

    /// Let the guru and elements adjust NICs for a VM moving to `dest`.
    pub async fn prepare_nic_for_migration(
        &self,
        vm: &mut VmProfile,
        dest: &DeployDestination,
    ) -> Result<()> {
        if vm.vm_type == VmType::DomainRouter
            && matches!(vm.hypervisor, HypervisorType::Kvm | HypervisorType::VMware)
        {
            return self.prepare_all_nics_for_migration(vm, dest).await;
        }

        let ctx = ReservationContext::new(vm.owner);
        for nic in self.store.nics_for_vm(vm.id) {
            let network = self.load_network(nic.network_id)?;
            let profile = self
                .migrate_nic_profile(&nic, &network, vm, dest, &ctx)
                .await?;
            vm.add_nic(profile);
        }
        Ok(())
    }

    /// Router variant that also covers public addresses whose NICs are not
    /// persisted.
    async fn prepare_all_nics_for_migration(
        &self,
        vm: &mut VmProfile,
        dest: &DeployDestination,
    ) -> Result<()> {
        let ctx = ReservationContext::new(vm.owner);
        let nics = self.store.nics_for_vm(vm.id);
        let mut guest_network = None;

        for nic in &nics {
            let network = self.load_network(nic.network_id)?;
            if network.traffic_type == TrafficType::Guest
                && network.guest_type == Some(GuestType::Isolated)
            {
                guest_network = Some(network.id);
            }
            let profile = self.migrate_nic_profile(nic, &network, vm, dest, &ctx).await?;
            vm.add_nic(profile);
        }

        let Some(guest_network) = guest_network else {
            return Ok(());
        };

        let mut added_uris = HashSet::new();
        for ip in self.store.public_ips_for_network(guest_network) {
            let broadcast_uri = vlan_uri(&ip.vlan_tag);
            let persisted = nics.iter().any(|n| {
                n.network_id == ip.network_id && n.broadcast_uri.as_deref() == Some(&broadcast_uri)
            });
            if persisted || added_uris.contains(&broadcast_uri) {
                continue;
            }

            debug!(
                vm_id = %vm.id,
                network_id = %ip.network_id,
                broadcast_uri = %broadcast_uri,
                "Creating nic profile for migration"
            );
            let network = self.load_network(ip.network_id)?;
            let guru = self.guru_for(&network)?;
            let mut profile = NicProfile {
                network_id: network.id,
                device_id: Some(MIGRATION_DEVICE_ID),
                ip4_address: Some(ip.address.clone()),
                ip4_netmask: Some(ip.netmask.clone()),
                ip4_gateway: Some(ip.gateway.clone()),
                mac_address: ip.mac_address.clone(),
                broadcast_type: Some(network.broadcast_domain_type),
                traffic_type: Some(network.traffic_type),
                broadcast_uri: Some(broadcast_uri.clone()),
                isolation_uri: Some(vlan_uri(&ip.vlan_tag)),
                network_rate: self.network_rate(),
                security_group_enabled: self.security_group_enabled(&network),
                name: self.network_tag(vm.hypervisor, &network),
                ..Default::default()
            };
            guru.update_nic_profile(&mut profile, &network).await;
            vm.add_nic(profile);
            added_uris.insert(broadcast_uri);
        }
        Ok(())
    }

    async fn migrate_nic_profile(
        &self,
        nic: &Nic,
        network: &Network,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> Result<NicProfile> {
        let guru = self.guru_for(network)?;
        let mut profile = self.profile_for(nic, network, vm);

        if let Some(responder) = guru.migration_responder() {
            let result = responder
                .prepare_migration(&profile, network, vm, dest, ctx)
                .await;
            log_migration_prepare(guru.name(), nic, result);
        }

        let services = self.store.network_services(network.id);
        for element in in_scope_elements(&self.registry, &services) {
            ensure_enabled(self.store.as_ref(), element.as_ref(), network)?;
            if let Some(responder) = element.migration_responder() {
                let result = responder
                    .prepare_migration(&profile, network, vm, dest, ctx)
                    .await;
                log_migration_prepare(element.name(), nic, result);
            }
        }

        guru.update_nic_profile(&mut profile, network).await;
        Ok(profile)
    }

    /// Finish a migration: responders commit and each NIC row takes the
    /// destination's reservation id.
    pub async fn commit_nic_for_migration(&self, src: &VmProfile, dst: &VmProfile) -> Result<()> {
        for src_nic in &src.nics {
            let Some(nic_id) = src_nic.id else {
                continue;
            };
            let Some(dst_nic) = dst.nic(nic_id) else {
                warn!(nic_id = %nic_id, vm_id = %dst.id, "Nic missing from migration destination");
                continue;
            };
            let network = self.load_network(src_nic.network_id)?;
            let (src_ctx, dst_ctx) = migration_contexts(src, src_nic, dst_nic);

            for responder in self.migration_responders(&network)? {
                responder
                    .commit(src_nic, &network, src, &src_ctx, &dst_ctx)
                    .await;
            }

            let mut row = self.load_nic(nic_id)?;
            row.reservation_id = dst_nic.reservation_id.clone();
            with_transaction(self.store.as_ref(), |tx| {
                tx.update_nic(&row)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Undo a prepared migration on the guru and elements.
    pub async fn rollback_nic_for_migration(&self, src: &VmProfile, dst: &VmProfile) -> Result<()> {
        for dst_nic in &dst.nics {
            let Some(nic_id) = dst_nic.id else {
                continue;
            };
            let Some(src_nic) = src.nic(nic_id) else {
                warn!(nic_id = %nic_id, vm_id = %src.id, "Nic missing from migration source");
                continue;
            };
            let network = self.load_network(dst_nic.network_id)?;
            let (src_ctx, dst_ctx) = migration_contexts(src, src_nic, dst_nic);

            for responder in self.migration_responders(&network)? {
                responder
                    .rollback(dst_nic, &network, dst, &src_ctx, &dst_ctx)
                    .await;
            }
        }
        Ok(())
    }

    /// Guru first, then every in-scope element that can respond.
    fn migration_responders(&self, network: &Network) -> Result<Vec<ResponderRef>> {
        let mut responders = vec![ResponderRef::Guru(self.guru_for(network)?)];
        let services = self.store.network_services(network.id);
        responders.extend(
            in_scope_elements(&self.registry, &services)
                .into_iter()
                .map(ResponderRef::Element),
        );
        Ok(responders)
    }
}

/// Guru or element that may carry a migration responder.
enum ResponderRef {
    Guru(Arc<dyn NetworkGuru>),
    Element(Arc<dyn NetworkElement>),
}

impl ResponderRef {
    fn responder(&self) -> Option<&dyn MigrationResponder> {
        match self {
            ResponderRef::Guru(guru) => guru.migration_responder(),
            ResponderRef::Element(element) => element.migration_responder(),
        }
    }

    async fn commit(
        &self,
        nic: &NicProfile,
        network: &Network,
        vm: &VmProfile,
        src: &ReservationContext,
        dst: &ReservationContext,
    ) {
        if let Some(responder) = self.responder() {
            responder.commit_migration(nic, network, vm, src, dst).await;
        }
    }

    async fn rollback(
        &self,
        nic: &NicProfile,
        network: &Network,
        vm: &VmProfile,
        src: &ReservationContext,
        dst: &ReservationContext,
    ) {
        if let Some(responder) = self.responder() {
            responder.rollback_migration(nic, network, vm, src, dst).await;
        }
    }
}

fn migration_contexts(
    src: &VmProfile,
    src_nic: &NicProfile,
    dst_nic: &NicProfile,
) -> (ReservationContext, ReservationContext) {
    (
        ReservationContext::with_reservation_id(
            src_nic.reservation_id.clone().unwrap_or_default(),
            src.owner,
        ),
        ReservationContext::with_reservation_id(
            dst_nic.reservation_id.clone().unwrap_or_default(),
            src.owner,
        ),
    )
}

fn log_migration_prepare(responder: &str, nic: &Nic, result: ProviderResult<bool>) {
    match result {
        Ok(true) => {}
        Ok(false) => error!(nic_id = %nic.id, responder, "Failed to prepare nic for migration"),
        Err(e) => error!(nic_id = %nic.id, responder, error = %e, "Failed to prepare nic for migration"),
    }
}
