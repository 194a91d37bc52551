//! Network rules collaborator.
//!
//! Rule storage and application live outside the orchestrator. It only
//! decides when each rule family is applied or revoked, and in what order.

use async_trait::async_trait;
use std::fmt;

use crate::error::ProviderResult;
use crate::model::{AccountId, Network, NetworkOffering, ReservationContext};

/// Families of persisted network rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// Default egress policy of the offering.
    DefaultEgress,
    EgressFirewall,
    IpAssociations,
    StaticNat,
    IngressFirewall,
    PortForwarding,
    StaticNatRules,
    PublicLb,
    InternalLb,
    Vpn,
    NetworkAcl,
}

impl RuleKind {
    /// Order used when re-applying rules during implement. Egress comes
    /// first so guest traffic is never allowed while other rules are
    /// half-applied.
    pub const REPROGRAM_ORDER: [RuleKind; 11] = [
        RuleKind::DefaultEgress,
        RuleKind::EgressFirewall,
        RuleKind::IpAssociations,
        RuleKind::StaticNat,
        RuleKind::IngressFirewall,
        RuleKind::PortForwarding,
        RuleKind::StaticNatRules,
        RuleKind::PublicLb,
        RuleKind::InternalLb,
        RuleKind::Vpn,
        RuleKind::NetworkAcl,
    ];

    /// Order used to drop rules from the backend when a provider needs
    /// cleanup on shutdown.
    pub const SHUTDOWN_ORDER: [RuleKind; 10] = [
        RuleKind::EgressFirewall,
        RuleKind::DefaultEgress,
        RuleKind::PortForwarding,
        RuleKind::StaticNatRules,
        RuleKind::PublicLb,
        RuleKind::InternalLb,
        RuleKind::IngressFirewall,
        RuleKind::NetworkAcl,
        RuleKind::StaticNat,
        RuleKind::IpAssociations,
    ];

    /// Rule families revoked unconditionally before a network is destroyed.
    pub const DESTROY_ORDER: [RuleKind; 7] = [
        RuleKind::EgressFirewall,
        RuleKind::PortForwarding,
        RuleKind::StaticNatRules,
        RuleKind::PublicLb,
        RuleKind::InternalLb,
        RuleKind::IngressFirewall,
        RuleKind::NetworkAcl,
    ];
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[async_trait]
pub trait RulesManager: Send + Sync {
    /// Re-apply persisted rules of one family.
    async fn apply(
        &self,
        network: &Network,
        offering: &NetworkOffering,
        kind: RuleKind,
        caller: AccountId,
    ) -> ProviderResult<bool>;

    /// Revoke and delete every rule of one family.
    async fn revoke(&self, network: &Network, kind: RuleKind, caller: AccountId)
    -> ProviderResult<bool>;

    /// Remove rules of one family from the backend, keeping the rows.
    async fn shutdown(&self, network: &Network, kind: RuleKind, caller: AccountId)
    -> ProviderResult<bool>;

    /// Make sure the network has a source NAT address, taking it from the
    /// VPC when the network belongs to one.
    async fn ensure_source_nat(&self, network: &Network, ctx: &ReservationContext)
    -> ProviderResult<()>;

    /// Release every public address associated with the network.
    async fn release_network_ips(&self, network: &Network, caller: AccountId)
    -> ProviderResult<bool>;
}

/// Rules manager for deployments without rule services.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRules;

#[async_trait]
impl RulesManager for NoopRules {
    async fn apply(
        &self,
        _network: &Network,
        _offering: &NetworkOffering,
        _kind: RuleKind,
        _caller: AccountId,
    ) -> ProviderResult<bool> {
        Ok(true)
    }

    async fn revoke(&self, _network: &Network, _kind: RuleKind, _caller: AccountId)
    -> ProviderResult<bool> {
        Ok(true)
    }

    async fn shutdown(&self, _network: &Network, _kind: RuleKind, _caller: AccountId)
    -> ProviderResult<bool> {
        Ok(true)
    }

    async fn ensure_source_nat(&self, _network: &Network, _ctx: &ReservationContext)
    -> ProviderResult<()> {
        Ok(())
    }

    async fn release_network_ips(&self, _network: &Network, _caller: AccountId)
    -> ProviderResult<bool> {
        Ok(true)
    }
}
