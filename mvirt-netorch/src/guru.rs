//! Network design providers ("gurus").

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::model::{
    Account, DeployDestination, DeploymentPlan, DesignOutcome, Network, NetworkOffering,
    NicProfile, ReservationContext, VmProfile,
};

/// Designs, implements, reserves and tears down network-level addressing
/// for one class of network.
#[async_trait]
pub trait NetworkGuru: Send + Sync {
    /// Unique name; stored on every network this guru designs.
    fn name(&self) -> &str;

    /// Design a network for an offering. Returning None declines.
    async fn design(
        &self,
        offering: &NetworkOffering,
        plan: &DeploymentPlan,
        template: Option<&Network>,
        owner: &Account,
    ) -> ProviderResult<Option<DesignOutcome>>;

    /// Materialize addressing. The returned copy carries the cidr, gateway,
    /// broadcast URI, mode and physical network to persist.
    async fn implement(
        &self,
        network: &Network,
        offering: &NetworkOffering,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<Network>;

    /// Bind an address for a new NIC. Returning None skips the NIC.
    async fn allocate(
        &self,
        network: &Network,
        requested: Option<&NicProfile>,
        vm: &VmProfile,
    ) -> ProviderResult<Option<NicProfile>>;

    async fn reserve(
        &self,
        nic: &mut NicProfile,
        network: &Network,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<()>;

    /// Release a reservation. False means the reservation is kept.
    async fn release(
        &self,
        nic: &mut NicProfile,
        vm: &VmProfile,
        reservation_id: Option<&str>,
    ) -> ProviderResult<bool>;

    async fn update_nic_profile(&self, nic: &mut NicProfile, network: &Network);

    async fn deallocate(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
    ) -> ProviderResult<()>;

    /// Tear down network-level bindings. Changes made to `network` are
    /// written back to the row.
    async fn shutdown(&self, network: &mut Network, offering: &NetworkOffering)
    -> ProviderResult<()>;

    async fn trash(&self, network: &Network, offering: &NetworkOffering) -> ProviderResult<bool>;

    fn migration_responder(&self) -> Option<&dyn MigrationResponder> {
        None
    }
}

/// Optional capability: adjust provider state when a NIC's VM moves to
/// another host.
#[async_trait]
pub trait MigrationResponder: Send + Sync {
    async fn prepare_migration(
        &self,
        nic: &NicProfile,
        network: &Network,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;

    async fn commit_migration(
        &self,
        nic: &NicProfile,
        network: &Network,
        vm: &VmProfile,
        src: &ReservationContext,
        dst: &ReservationContext,
    );

    async fn rollback_migration(
        &self,
        nic: &NicProfile,
        network: &Network,
        vm: &VmProfile,
        src: &ReservationContext,
        dst: &ReservationContext,
    );
}
