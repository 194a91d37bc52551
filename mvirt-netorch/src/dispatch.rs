//! Provider dispatch: which elements see a network, and the aggregated
//! execution envelope around rule re-application.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::element::NetworkElement;
use crate::error::{OrchestratorError, ProviderResult, Result};
use crate::model::{DeployDestination, Network, ServiceProviderMap};
use crate::registry::ProviderRegistry;
use crate::store::ResourceStore;

/// Elements whose provider appears in the network's service map, in
/// registration order. Each provider is listed once.
pub fn in_scope_elements(
    registry: &ProviderRegistry,
    services: &ServiceProviderMap,
) -> Vec<Arc<dyn NetworkElement>> {
    let providers = services.distinct_providers();
    registry
        .elements()
        .iter()
        .filter(|e| providers.contains(e.provider()))
        .cloned()
        .collect()
}

/// Fail unless the element's provider is enabled on the network's
/// physical network. Networks without a physical network are not checked.
pub fn ensure_enabled(
    store: &dyn ResourceStore,
    element: &dyn NetworkElement,
    network: &Network,
) -> Result<()> {
    let Some(physical_network_id) = network.physical_network_id else {
        return Ok(());
    };
    let enabled = store
        .physical_network(physical_network_id)
        .is_some_and(|p| p.is_provider_enabled(element.provider()));
    if enabled {
        Ok(())
    } else {
        Err(OrchestratorError::ProviderNotEnabled {
            provider: element.provider().clone(),
            physical_network_id,
            network_id: network.id,
        })
    }
}

/// Log the outcome of a fan-out call and report whether it succeeded.
///
/// Shutdown and destroy call every element regardless of earlier failures;
/// this folds each result into the aggregate.
pub fn record_outcome(
    element: &dyn NetworkElement,
    network: &Network,
    operation: &str,
    result: ProviderResult<bool>,
) -> bool {
    match result {
        Ok(true) => true,
        Ok(false) => {
            warn!(
                network_id = %network.id,
                provider = %element.provider(),
                operation,
                "Network element declined"
            );
            false
        }
        Err(e) => {
            warn!(
                network_id = %network.id,
                provider = %element.provider(),
                operation,
                error = %e,
                "Network element failed"
            );
            false
        }
    }
}

/// Run `body` inside the aggregated execution envelope of every element
/// that supports it.
///
/// Prepare runs on all such elements before `body`, complete runs after a
/// successful `body`, and cleanup runs on every exit path.
pub async fn with_aggregated_execution<T, F>(
    elements: &[Arc<dyn NetworkElement>],
    network: &Network,
    dest: &DeployDestination,
    body: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let outcome = run_envelope(elements, network, dest, body).await;

    for element in elements {
        let Some(aggregated) = element.aggregated() else {
            continue;
        };
        let result = aggregated.cleanup_aggregated_execution(network, dest).await;
        record_outcome(element.as_ref(), network, "cleanup_aggregated_execution", result);
    }

    outcome
}

async fn run_envelope<T, F>(
    elements: &[Arc<dyn NetworkElement>],
    network: &Network,
    dest: &DeployDestination,
    body: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    for element in elements {
        let Some(aggregated) = element.aggregated() else {
            continue;
        };
        debug!(network_id = %network.id, provider = %element.provider(), "Preparing aggregated execution");
        if !aggregated.prepare_aggregated_execution(network, dest).await? {
            return Err(OrchestratorError::ResourceUnavailable(format!(
                "provider {} failed to prepare aggregated execution for network {}",
                element.provider(),
                network.id
            )));
        }
    }

    let value = body.await?;

    for element in elements {
        let Some(aggregated) = element.aggregated() else {
            continue;
        };
        if !aggregated.complete_aggregated_execution(network, dest).await? {
            return Err(OrchestratorError::ResourceUnavailable(format!(
                "failed to re-program network {} due to aggregated commit failure on provider {}",
                network.id,
                element.provider()
            )));
        }
    }

    Ok(value)
}
