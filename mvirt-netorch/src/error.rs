//! Orchestrator error types.

use thiserror::Error;

use crate::model::{NetworkId, PhysicalNetworkId, ProviderName};
use crate::store::StoreError;

/// Errors surfaced by lifecycle operations.
///
/// Every variant carries the identity of the resource it concerns so a
/// failure can be diagnosed without correlating logs.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A lock could not be acquired in time, or was lost.
    #[error("concurrent operation: {0}")]
    ConcurrentOperation(String),

    /// A provider could not complete its action. Callers may retry.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error("insufficient address capacity in network {network_id}: {message}")]
    InsufficientAddressCapacity {
        network_id: NetworkId,
        message: String,
    },

    #[error("insufficient virtual network capacity: {0}")]
    InsufficientVirtualNetworkCapacity(String),

    /// An illegal state transition was attempted.
    #[error("no transition from {from} on event {event}")]
    NoTransition { from: String, event: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    #[error(
        "service provider {provider} either doesn't exist or is not enabled in physical network {physical_network_id} (network {network_id})"
    )]
    ProviderNotEnabled {
        provider: ProviderName,
        physical_network_id: PhysicalNetworkId,
        network_id: NetworkId,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Host connect validation failed. `reconnect` tells the agent layer
    /// whether the host should be asked to reconnect later.
    #[error("connection error (reconnect: {reconnect}): {message}")]
    Connection { reconnect: bool, message: String },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// Unexpected internal fault.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised by guru and element hooks.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("concurrent operation: {0}")]
    ConcurrentOperation(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for provider hooks.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::ResourceUnavailable(msg) => OrchestratorError::ResourceUnavailable(msg),
            ProviderError::ConcurrentOperation(msg) => OrchestratorError::ConcurrentOperation(msg),
            ProviderError::InsufficientCapacity(msg) => OrchestratorError::InsufficientCapacity(msg),
            ProviderError::Other(e) => OrchestratorError::Internal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_maps_to_taxonomy() {
        let err: OrchestratorError = ProviderError::ResourceUnavailable("vr down".into()).into();
        assert!(matches!(err, OrchestratorError::ResourceUnavailable(ref m) if m == "vr down"));

        let err: OrchestratorError = ProviderError::ConcurrentOperation("busy".into()).into();
        assert!(matches!(err, OrchestratorError::ConcurrentOperation(_)));

        let err: OrchestratorError = ProviderError::Other(anyhow::anyhow!("boom")).into();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_provider_not_enabled_names_everything() {
        let err = OrchestratorError::ProviderNotEnabled {
            provider: ProviderName::new("VirtualRouter"),
            physical_network_id: PhysicalNetworkId(7),
            network_id: NetworkId(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("VirtualRouter"));
        assert!(msg.contains("pnet-7"));
        assert!(msg.contains("net-3"));
    }
}
