//! Resource store trait definitions.
//!
//! Reads are auto-committed. Multi-row writes go through [`ResourceStore::transaction`],
//! which commits when the unit of work returns Ok and discards every write
//! when it returns an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use super::error::StoreResult;
use super::lock::{LockGuard, LockKey};
use crate::error::{OrchestratorError, Result};
use crate::model::{
    AccountId, DomainNetworkMap, IpAlias, Network, NetworkId, NetworkOffering, NetworkOps, Nic,
    NicId, OfferingId, PhysicalNetwork, PhysicalNetworkId, PublicIp, SecondaryIp,
    ServiceProviderMap, VlanRange, VmId, VmInstance, Zone, ZoneId,
};

// =============================================================================
// Reads
// =============================================================================

/// Read access, available both outside and inside a transaction.
///
/// Soft-deleted networks are invisible to every read.
pub trait Reader {
    fn network(&self, id: NetworkId) -> Option<Network>;

    /// Live networks with the given (owner, offering, zone) triple.
    fn networks_for(&self, account: AccountId, offering: OfferingId, zone: ZoneId) -> Vec<Network>;

    fn network_services(&self, id: NetworkId) -> ServiceProviderMap;

    fn network_ops(&self, id: NetworkId) -> NetworkOps;

    /// Implemented networks flagged for GC with no active NICs.
    fn gc_candidates(&self) -> Vec<NetworkId>;

    fn nic(&self, id: NicId) -> Option<Nic>;

    fn nics_for_vm(&self, vm: VmId) -> Vec<Nic>;

    fn nics_for_network(&self, network: NetworkId) -> Vec<Nic>;

    fn secondary_ips(&self, nic: NicId) -> Vec<SecondaryIp>;

    fn vm(&self, id: VmId) -> Option<VmInstance>;

    fn offering(&self, id: OfferingId) -> Option<NetworkOffering>;

    fn zone(&self, id: ZoneId) -> Option<Zone>;

    fn zone_by_name(&self, name: &str) -> Option<Zone>;

    fn physical_network(&self, id: PhysicalNetworkId) -> Option<PhysicalNetwork>;

    fn physical_networks_in_zone(&self, zone: ZoneId) -> Vec<PhysicalNetwork>;

    /// Public addresses associated with a guest network.
    fn public_ips_for_network(&self, network: NetworkId) -> Vec<PublicIp>;

    fn active_ip_alias(&self, network: NetworkId, gateway: &str) -> Option<IpAlias>;

    /// Private gateway addresses still allocated in a network.
    fn private_ip_count(&self, network: NetworkId) -> usize;

    fn vlans_for_network(&self, network: NetworkId) -> Vec<VlanRange>;

    fn domain_map(&self, network: NetworkId) -> Option<DomainNetworkMap>;

    fn account_maps(&self, network: NetworkId) -> Vec<AccountId>;
}

// =============================================================================
// Writes
// =============================================================================

/// Transactional handle handed to a unit of work.
pub trait Tx: Reader {
    /// Persist a new network with its service map. The id on `network` is
    /// ignored; the assigned id is returned.
    fn insert_network(
        &mut self,
        network: Network,
        services: ServiceProviderMap,
        check_for_gc: bool,
    ) -> NetworkId;

    fn update_network(&mut self, network: &Network) -> StoreResult<()>;

    /// Soft-delete a network.
    fn remove_network(&mut self, id: NetworkId, removed: DateTime<Utc>) -> StoreResult<()>;

    fn add_domain_map(&mut self, map: DomainNetworkMap);

    fn remove_domain_map(&mut self, network: NetworkId);

    fn add_account_map(&mut self, network: NetworkId, account: AccountId);

    fn remove_account_maps(&mut self, network: NetworkId);

    /// Adjust the active NIC counter. The counter never goes negative.
    fn change_active_nics(&mut self, network: NetworkId, delta: i64) -> StoreResult<()>;

    fn set_check_for_gc(&mut self, network: NetworkId);

    fn clear_check_for_gc(&mut self, network: NetworkId);

    /// Persist a new NIC. The id on `nic` is ignored.
    fn insert_nic(&mut self, nic: Nic) -> NicId;

    fn update_nic(&mut self, nic: &Nic) -> StoreResult<()>;

    /// Hard-delete a NIC row.
    fn delete_nic(&mut self, id: NicId) -> StoreResult<()>;

    fn delete_secondary_ips(&mut self, nic: NicId) -> usize;

    fn update_ip_alias(&mut self, alias: &IpAlias) -> StoreResult<()>;

    /// Return a public address from a source network to the free pool.
    fn unassign_public_ip(&mut self, source_network: NetworkId, address: &str)
    -> StoreResult<()>;

    fn delete_vlans(&mut self, network: NetworkId) -> usize;
}

// =============================================================================
// Store
// =============================================================================

/// Durable storage for networks and NICs with row locking.
#[async_trait]
pub trait ResourceStore: Reader + Send + Sync {
    /// Run `work` atomically. Implementations must not call back into the
    /// store from inside `work`; all access goes through the handle.
    fn transaction(&self, work: &mut dyn FnMut(&mut dyn Tx) -> Result<()>) -> Result<()>;

    /// Acquire a row or named lock, waiting at most `timeout`.
    async fn acquire(&self, key: LockKey, timeout: Duration) -> Option<LockGuard>;
}

/// Run a unit of work and hand back its value.
pub fn with_transaction<T>(
    store: &dyn ResourceStore,
    mut work: impl FnMut(&mut dyn Tx) -> Result<T>,
) -> Result<T> {
    let mut out = None;
    store.transaction(&mut |tx| {
        out = Some(work(tx)?);
        Ok(())
    })?;
    out.ok_or_else(|| OrchestratorError::Internal(anyhow::anyhow!("transaction produced no value")))
}
