//! Network elements: providers that implement logical services.
//!
//! Optional capabilities are separate traits. An element advertises one by
//! returning `Some(self)` from the matching accessor.

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::guru::MigrationResponder;
use crate::model::{
    Capabilities, DeployDestination, Network, NetworkOffering, NicProfile, ProviderName,
    ReservationContext, VmProfile,
};

#[async_trait]
pub trait NetworkElement: Send + Sync {
    fn name(&self) -> &str;

    /// Provider this element represents.
    fn provider(&self) -> &ProviderName;

    fn capabilities(&self) -> &Capabilities;

    /// Whether network rules must be revoked before this provider shuts
    /// a network down.
    fn cleanup_needed_on_shutdown(&self) -> bool {
        false
    }

    async fn implement(
        &self,
        network: &Network,
        offering: &NetworkOffering,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;

    async fn prepare(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;

    async fn release(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
        ctx: Option<&ReservationContext>,
    ) -> ProviderResult<bool>;

    async fn shutdown(
        &self,
        network: &Network,
        ctx: &ReservationContext,
        cleanup: bool,
    ) -> ProviderResult<bool>;

    async fn destroy(&self, network: &Network, ctx: &ReservationContext) -> ProviderResult<bool>;

    fn aggregated(&self) -> Option<&dyn AggregatedExecution> {
        None
    }

    fn migration_responder(&self) -> Option<&dyn MigrationResponder> {
        None
    }

    fn dhcp(&self) -> Option<&dyn DhcpServiceProvider> {
        None
    }

    fn user_data(&self) -> Option<&dyn UserDataServiceProvider> {
        None
    }
}

/// Batch rule application into one round-trip.
///
/// The orchestrator always calls `prepare` before `complete`, and always
/// calls `cleanup` afterwards, even when `complete` failed.
#[async_trait]
pub trait AggregatedExecution: Send + Sync {
    async fn prepare_aggregated_execution(
        &self,
        network: &Network,
        dest: &DeployDestination,
    ) -> ProviderResult<bool>;

    async fn complete_aggregated_execution(
        &self,
        network: &Network,
        dest: &DeployDestination,
    ) -> ProviderResult<bool>;

    async fn cleanup_aggregated_execution(
        &self,
        network: &Network,
        dest: &DeployDestination,
    ) -> ProviderResult<bool>;
}

#[async_trait]
pub trait DhcpServiceProvider: Send + Sync {
    async fn add_dhcp_entry(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;

    /// Serve DHCP for the NIC's subnet when it differs from the network's
    /// primary subnet.
    async fn config_dhcp_support_for_subnet(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;

    async fn remove_dhcp_support_for_subnet(&self, network: &Network) -> ProviderResult<bool>;
}

#[async_trait]
pub trait UserDataServiceProvider: Send + Sync {
    async fn add_password_and_userdata(
        &self,
        network: &Network,
        nic: &NicProfile,
        vm: &VmProfile,
        dest: &DeployDestination,
        ctx: &ReservationContext,
    ) -> ProviderResult<bool>;
}
