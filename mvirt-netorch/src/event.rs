//! Events emitted by lifecycle operations.

use chrono::{DateTime, Utc};

use crate::model::{NetworkId, NetworkState, NicId, NicState};

/// Events published on the orchestrator's broadcast channel after the
/// corresponding write has committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A network row changed state.
    NetworkStateChanged {
        id: NetworkId,
        old: NetworkState,
        new: NetworkState,
    },
    /// A network was destroyed and soft-deleted.
    NetworkRemoved {
        id: NetworkId,
        /// Whether the owner's network resource count should be decremented.
        release_resource_count: bool,
    },
    NicStateChanged {
        id: NicId,
        network_id: NetworkId,
        old: NicState,
        new: NicState,
    },
    NicRemoved { id: NicId, network_id: NetworkId },
    /// A network was first observed idle by the GC.
    NetworkGcCandidate {
        id: NetworkId,
        first_idle: DateTime<Utc>,
    },
}

impl Event {
    pub fn resource_type(&self) -> &'static str {
        match self {
            Event::NetworkStateChanged { .. }
            | Event::NetworkRemoved { .. }
            | Event::NetworkGcCandidate { .. } => "network",
            Event::NicStateChanged { .. } | Event::NicRemoved { .. } => "nic",
        }
    }

    pub fn resource_id(&self) -> String {
        match self {
            Event::NetworkStateChanged { id, .. }
            | Event::NetworkRemoved { id, .. }
            | Event::NetworkGcCandidate { id, .. } => id.to_string(),
            Event::NicStateChanged { id, .. } | Event::NicRemoved { id, .. } => id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_identity() {
        let event = Event::NicRemoved {
            id: NicId(4),
            network_id: NetworkId(1),
        };
        assert_eq!(event.resource_type(), "nic");
        assert_eq!(event.resource_id(), "nic-4");

        let event = Event::NetworkRemoved {
            id: NetworkId(1),
            release_resource_count: true,
        };
        assert_eq!(event.resource_type(), "network");
        assert_eq!(event.resource_id(), "net-1");
    }
}
