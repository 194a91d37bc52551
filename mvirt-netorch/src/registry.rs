//! Provider registry: gurus and elements in registration order.

use std::sync::Arc;

use tracing::info;

use crate::element::NetworkElement;
use crate::error::{OrchestratorError, Result};
use crate::guru::NetworkGuru;
use crate::model::{ProviderName, Service};

/// Registered design providers and network elements.
///
/// Built once at startup. Lookups hand out typed handles; names are only
/// used to find them.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    gurus: Vec<Arc<dyn NetworkGuru>>,
    elements: Vec<Arc<dyn NetworkElement>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_guru(&mut self, guru: Arc<dyn NetworkGuru>) -> Result<()> {
        if self.guru(guru.name()).is_some() {
            return Err(OrchestratorError::InvalidParameter(format!(
                "network guru {} is already registered",
                guru.name()
            )));
        }
        info!(guru = %guru.name(), "Registered network guru");
        self.gurus.push(guru);
        Ok(())
    }

    pub fn register_element(&mut self, element: Arc<dyn NetworkElement>) -> Result<()> {
        if self.element(element.provider()).is_some() {
            return Err(OrchestratorError::InvalidParameter(format!(
                "an element for provider {} is already registered",
                element.provider()
            )));
        }
        info!(element = %element.name(), provider = %element.provider(), "Registered network element");
        self.elements.push(element);
        Ok(())
    }

    pub fn gurus(&self) -> &[Arc<dyn NetworkGuru>] {
        &self.gurus
    }

    pub fn elements(&self) -> &[Arc<dyn NetworkElement>] {
        &self.elements
    }

    pub fn guru(&self, name: &str) -> Option<Arc<dyn NetworkGuru>> {
        self.gurus.iter().find(|g| g.name() == name).cloned()
    }

    pub fn element(&self, provider: &ProviderName) -> Option<Arc<dyn NetworkElement>> {
        self.elements
            .iter()
            .find(|e| e.provider() == provider)
            .cloned()
    }

    /// The provider to use when an offering names a service without a
    /// provider. Only defined when exactly one element offers the service.
    pub fn default_provider(&self, service: Service) -> Option<ProviderName> {
        let mut offering = self
            .elements
            .iter()
            .filter(|e| e.capabilities().contains_key(&service));
        let first = offering.next()?;
        if offering.next().is_some() {
            return None;
        }
        Some(first.provider().clone())
    }
}
