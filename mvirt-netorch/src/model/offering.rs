//! Network offerings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::OfferingId;
use super::network::{GuestType, TrafficType};
use super::service::{ProviderName, Service};

/// Offering detail keys read at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferingDetail {
    PublicLbProvider,
    InternalLbProvider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkOffering {
    pub id: OfferingId,
    pub name: String,
    pub guest_type: Option<GuestType>,
    pub traffic_type: TrafficType,
    /// Requested services in priority order. A missing provider means the
    /// registered default for that service.
    pub services: Vec<(Service, Option<ProviderName>)>,
    pub shared_source_nat: bool,
    /// Allow all egress traffic by default.
    pub egress_default_policy: bool,
    pub system_only: bool,
    pub details: HashMap<OfferingDetail, String>,
}

impl NetworkOffering {
    pub fn offers(&self, service: Service) -> bool {
        self.services.iter().any(|(s, _)| *s == service)
    }

    /// Shared offerings that carry rule services are reused across many
    /// rule episodes instead of being torn down between them.
    pub fn is_shared_with_services(&self) -> bool {
        self.guest_type == Some(GuestType::Shared)
            && [
                Service::SourceNat,
                Service::StaticNat,
                Service::Firewall,
                Service::PortForwarding,
                Service::Lb,
            ]
            .into_iter()
            .any(|s| self.offers(s))
    }
}
