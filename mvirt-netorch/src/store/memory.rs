//! In-memory resource store.
//!
//! Used by tests and by embedders without a database. Transactions work on
//! a copy of the tables that replaces the live tables only on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::{StoreError, StoreResult};
use super::lock::{LockGuard, LockKey, LockTable};
use super::traits::{Reader, ResourceStore, Tx};
use crate::error::Result;
use crate::model::{
    AccountId, DomainNetworkMap, IpAlias, IpAliasState, Network, NetworkId, NetworkOffering,
    NetworkOps, NetworkState, Nic, NicId, OfferingId, PhysicalNetwork, PhysicalNetworkId,
    PublicIp, SecondaryIp, ServiceProviderMap, VlanRange, VmId, VmInstance, VmState, Zone, ZoneId,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: u64,
    networks: BTreeMap<NetworkId, Network>,
    services: HashMap<NetworkId, ServiceProviderMap>,
    ops: HashMap<NetworkId, NetworkOps>,
    nics: BTreeMap<NicId, Nic>,
    secondary_ips: Vec<SecondaryIp>,
    aliases: Vec<IpAlias>,
    domain_maps: HashMap<NetworkId, DomainNetworkMap>,
    account_maps: Vec<(NetworkId, AccountId)>,
    vlans: Vec<VlanRange>,
    private_ips: HashMap<NetworkId, usize>,
    public_ips: Vec<PublicIp>,
    vms: BTreeMap<VmId, VmInstance>,
    offerings: HashMap<OfferingId, NetworkOffering>,
    zones: BTreeMap<ZoneId, Zone>,
    physical_networks: BTreeMap<PhysicalNetworkId, PhysicalNetwork>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn live_network(&self, id: NetworkId) -> Option<&Network> {
        self.networks.get(&id).filter(|n| n.removed.is_none())
    }
}

impl Reader for Tables {
    fn network(&self, id: NetworkId) -> Option<Network> {
        self.live_network(id).cloned()
    }

    fn networks_for(&self, account: AccountId, offering: OfferingId, zone: ZoneId) -> Vec<Network> {
        self.networks
            .values()
            .filter(|n| n.removed.is_none())
            .filter(|n| n.account_id == account && n.offering_id == offering && n.zone_id == zone)
            .cloned()
            .collect()
    }

    fn network_services(&self, id: NetworkId) -> ServiceProviderMap {
        self.services.get(&id).cloned().unwrap_or_default()
    }

    fn network_ops(&self, id: NetworkId) -> NetworkOps {
        self.ops.get(&id).copied().unwrap_or_default()
    }

    fn gc_candidates(&self) -> Vec<NetworkId> {
        self.ops
            .iter()
            .filter(|(_, ops)| ops.check_for_gc && ops.active_nics == 0)
            .filter(|(id, _)| {
                self.live_network(**id)
                    .is_some_and(|n| n.state == NetworkState::Implemented)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn nic(&self, id: NicId) -> Option<Nic> {
        self.nics.get(&id).cloned()
    }

    fn nics_for_vm(&self, vm: VmId) -> Vec<Nic> {
        self.nics
            .values()
            .filter(|n| n.vm_id == Some(vm))
            .cloned()
            .collect()
    }

    fn nics_for_network(&self, network: NetworkId) -> Vec<Nic> {
        self.nics
            .values()
            .filter(|n| n.network_id == network)
            .cloned()
            .collect()
    }

    fn secondary_ips(&self, nic: NicId) -> Vec<SecondaryIp> {
        self.secondary_ips
            .iter()
            .filter(|ip| ip.nic_id == nic)
            .cloned()
            .collect()
    }

    fn vm(&self, id: VmId) -> Option<VmInstance> {
        self.vms.get(&id).cloned()
    }

    fn offering(&self, id: OfferingId) -> Option<NetworkOffering> {
        self.offerings.get(&id).cloned()
    }

    fn zone(&self, id: ZoneId) -> Option<Zone> {
        self.zones.get(&id).cloned()
    }

    fn zone_by_name(&self, name: &str) -> Option<Zone> {
        self.zones.values().find(|z| z.name == name).cloned()
    }

    fn physical_network(&self, id: PhysicalNetworkId) -> Option<PhysicalNetwork> {
        self.physical_networks.get(&id).cloned()
    }

    fn physical_networks_in_zone(&self, zone: ZoneId) -> Vec<PhysicalNetwork> {
        self.physical_networks
            .values()
            .filter(|p| p.zone_id == zone)
            .cloned()
            .collect()
    }

    fn public_ips_for_network(&self, network: NetworkId) -> Vec<PublicIp> {
        self.public_ips
            .iter()
            .filter(|ip| ip.associated_network_id == Some(network))
            .cloned()
            .collect()
    }

    fn active_ip_alias(&self, network: NetworkId, gateway: &str) -> Option<IpAlias> {
        self.aliases
            .iter()
            .find(|a| a.network_id == network && a.gateway == gateway && a.state == IpAliasState::Active)
            .cloned()
    }

    fn private_ip_count(&self, network: NetworkId) -> usize {
        self.private_ips.get(&network).copied().unwrap_or(0)
    }

    fn vlans_for_network(&self, network: NetworkId) -> Vec<VlanRange> {
        self.vlans
            .iter()
            .filter(|v| v.network_id == network)
            .cloned()
            .collect()
    }

    fn domain_map(&self, network: NetworkId) -> Option<DomainNetworkMap> {
        self.domain_maps.get(&network).cloned()
    }

    fn account_maps(&self, network: NetworkId) -> Vec<AccountId> {
        self.account_maps
            .iter()
            .filter(|(n, _)| *n == network)
            .map(|(_, a)| *a)
            .collect()
    }
}

impl Tx for Tables {
    fn insert_network(
        &mut self,
        mut network: Network,
        services: ServiceProviderMap,
        check_for_gc: bool,
    ) -> NetworkId {
        let id = NetworkId(self.next_id());
        network.id = id;
        self.networks.insert(id, network);
        self.services.insert(id, services);
        self.ops.insert(
            id,
            NetworkOps {
                active_nics: 0,
                check_for_gc,
            },
        );
        id
    }

    fn update_network(&mut self, network: &Network) -> StoreResult<()> {
        match self.networks.get_mut(&network.id) {
            Some(row) if row.removed.is_none() => {
                *row = network.clone();
                Ok(())
            }
            _ => Err(StoreError::NotFound(format!("network {}", network.id))),
        }
    }

    fn remove_network(&mut self, id: NetworkId, removed: DateTime<Utc>) -> StoreResult<()> {
        let row = self
            .networks
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("network {}", id)))?;
        row.removed = Some(removed);
        self.ops.remove(&id);
        Ok(())
    }

    fn add_domain_map(&mut self, map: DomainNetworkMap) {
        self.domain_maps.insert(map.network_id, map);
    }

    fn remove_domain_map(&mut self, network: NetworkId) {
        self.domain_maps.remove(&network);
    }

    fn add_account_map(&mut self, network: NetworkId, account: AccountId) {
        if !self.account_maps.contains(&(network, account)) {
            self.account_maps.push((network, account));
        }
    }

    fn remove_account_maps(&mut self, network: NetworkId) {
        self.account_maps.retain(|(n, _)| *n != network);
    }

    fn change_active_nics(&mut self, network: NetworkId, delta: i64) -> StoreResult<()> {
        let ops = self
            .ops
            .get_mut(&network)
            .ok_or_else(|| StoreError::NotFound(format!("network ops {}", network)))?;
        let next = ops.active_nics + delta;
        if next < 0 {
            return Err(StoreError::Constraint(format!(
                "active nic count of {} would become {}",
                network, next
            )));
        }
        ops.active_nics = next;
        Ok(())
    }

    fn set_check_for_gc(&mut self, network: NetworkId) {
        if let Some(ops) = self.ops.get_mut(&network) {
            ops.check_for_gc = true;
        }
    }

    fn clear_check_for_gc(&mut self, network: NetworkId) {
        if let Some(ops) = self.ops.get_mut(&network) {
            ops.check_for_gc = false;
        }
    }

    fn insert_nic(&mut self, mut nic: Nic) -> NicId {
        let id = NicId(self.next_id());
        nic.id = id;
        self.nics.insert(id, nic);
        id
    }

    fn update_nic(&mut self, nic: &Nic) -> StoreResult<()> {
        match self.nics.get_mut(&nic.id) {
            Some(row) => {
                *row = nic.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("nic {}", nic.id))),
        }
    }

    fn delete_nic(&mut self, id: NicId) -> StoreResult<()> {
        self.nics
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("nic {}", id)))
    }

    fn delete_secondary_ips(&mut self, nic: NicId) -> usize {
        let before = self.secondary_ips.len();
        self.secondary_ips.retain(|ip| ip.nic_id != nic);
        before - self.secondary_ips.len()
    }

    fn update_ip_alias(&mut self, alias: &IpAlias) -> StoreResult<()> {
        let row = self
            .aliases
            .iter_mut()
            .find(|a| a.id == alias.id)
            .ok_or_else(|| StoreError::NotFound(format!("ip alias {}", alias.id)))?;
        *row = alias.clone();
        Ok(())
    }

    fn unassign_public_ip(&mut self, source_network: NetworkId, address: &str) -> StoreResult<()> {
        let ip = self
            .public_ips
            .iter_mut()
            .find(|ip| ip.network_id == source_network && ip.address == address)
            .ok_or_else(|| StoreError::NotFound(format!("public ip {}", address)))?;
        ip.allocated = false;
        ip.associated_network_id = None;
        Ok(())
    }

    fn delete_vlans(&mut self, network: NetworkId) -> usize {
        let before = self.vlans.len();
        self.vlans.retain(|v| v.network_id != network);
        before - self.vlans.len()
    }
}

/// Resource store backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    locks: LockTable,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Inventory seeding. These rows belong to other subsystems; the
    // orchestrator only reads them.

    pub fn put_zone(&self, zone: Zone) {
        self.tables().zones.insert(zone.id, zone);
    }

    pub fn put_offering(&self, offering: NetworkOffering) {
        self.tables().offerings.insert(offering.id, offering);
    }

    pub fn put_physical_network(&self, pnet: PhysicalNetwork) {
        self.tables().physical_networks.insert(pnet.id, pnet);
    }

    pub fn put_vm(&self, vm: VmInstance) {
        self.tables().vms.insert(vm.id, vm);
    }

    pub fn set_vm_state(&self, id: VmId, state: VmState, removed: Option<DateTime<Utc>>) {
        if let Some(vm) = self.tables().vms.get_mut(&id) {
            vm.state = state;
            vm.removed = removed;
        }
    }

    pub fn put_public_ip(&self, ip: PublicIp) {
        self.tables().public_ips.push(ip);
    }

    pub fn public_ip(&self, address: &str) -> Option<PublicIp> {
        self.tables()
            .public_ips
            .iter()
            .find(|ip| ip.address == address)
            .cloned()
    }

    pub fn put_ip_alias(&self, alias: IpAlias) {
        self.tables().aliases.push(alias);
    }

    pub fn ip_alias(&self, id: u64) -> Option<IpAlias> {
        self.tables().aliases.iter().find(|a| a.id == id).cloned()
    }

    pub fn put_secondary_ip(&self, ip: SecondaryIp) {
        self.tables().secondary_ips.push(ip);
    }

    pub fn put_vlan(&self, vlan: VlanRange) {
        self.tables().vlans.push(vlan);
    }

    pub fn set_private_ip_count(&self, network: NetworkId, count: usize) {
        self.tables().private_ips.insert(network, count);
    }

    /// Read a network row including soft-deleted ones.
    pub fn network_including_removed(&self, id: NetworkId) -> Option<Network> {
        self.tables().networks.get(&id).cloned()
    }
}

impl Reader for MemoryStore {
    fn network(&self, id: NetworkId) -> Option<Network> {
        self.tables().network(id)
    }

    fn networks_for(&self, account: AccountId, offering: OfferingId, zone: ZoneId) -> Vec<Network> {
        self.tables().networks_for(account, offering, zone)
    }

    fn network_services(&self, id: NetworkId) -> ServiceProviderMap {
        self.tables().network_services(id)
    }

    fn network_ops(&self, id: NetworkId) -> NetworkOps {
        self.tables().network_ops(id)
    }

    fn gc_candidates(&self) -> Vec<NetworkId> {
        self.tables().gc_candidates()
    }

    fn nic(&self, id: NicId) -> Option<Nic> {
        self.tables().nic(id)
    }

    fn nics_for_vm(&self, vm: VmId) -> Vec<Nic> {
        self.tables().nics_for_vm(vm)
    }

    fn nics_for_network(&self, network: NetworkId) -> Vec<Nic> {
        self.tables().nics_for_network(network)
    }

    fn secondary_ips(&self, nic: NicId) -> Vec<SecondaryIp> {
        self.tables().secondary_ips(nic)
    }

    fn vm(&self, id: VmId) -> Option<VmInstance> {
        self.tables().vm(id)
    }

    fn offering(&self, id: OfferingId) -> Option<NetworkOffering> {
        self.tables().offering(id)
    }

    fn zone(&self, id: ZoneId) -> Option<Zone> {
        self.tables().zone(id)
    }

    fn zone_by_name(&self, name: &str) -> Option<Zone> {
        self.tables().zone_by_name(name)
    }

    fn physical_network(&self, id: PhysicalNetworkId) -> Option<PhysicalNetwork> {
        self.tables().physical_network(id)
    }

    fn physical_networks_in_zone(&self, zone: ZoneId) -> Vec<PhysicalNetwork> {
        self.tables().physical_networks_in_zone(zone)
    }

    fn public_ips_for_network(&self, network: NetworkId) -> Vec<PublicIp> {
        self.tables().public_ips_for_network(network)
    }

    fn active_ip_alias(&self, network: NetworkId, gateway: &str) -> Option<IpAlias> {
        self.tables().active_ip_alias(network, gateway)
    }

    fn private_ip_count(&self, network: NetworkId) -> usize {
        self.tables().private_ip_count(network)
    }

    fn vlans_for_network(&self, network: NetworkId) -> Vec<VlanRange> {
        self.tables().vlans_for_network(network)
    }

    fn domain_map(&self, network: NetworkId) -> Option<DomainNetworkMap> {
        self.tables().domain_map(network)
    }

    fn account_maps(&self, network: NetworkId) -> Vec<AccountId> {
        self.tables().account_maps(network)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn transaction(&self, work: &mut dyn FnMut(&mut dyn Tx) -> Result<()>) -> Result<()> {
        let mut tables = self.tables();
        let mut staged = tables.clone();
        work(&mut staged)?;
        *tables = staged;
        Ok(())
    }

    async fn acquire(&self, key: LockKey, timeout: Duration) -> Option<LockGuard> {
        self.locks.acquire(key, timeout).await
    }
}
