//! NIC allocation helpers: device ids and profile/row conversion.

use chrono::Utc;

use crate::error::{OrchestratorError, Result};
use crate::model::{
    Network, Nic, NicId, NicProfile, NicState, ReservationStrategy, VmId, VmType,
};

/// Device id bookkeeping for one allocation batch.
///
/// Sized to the number of requested NICs; ids outside that range are
/// rejected.
#[derive(Debug)]
pub struct DeviceSlots {
    used: Vec<bool>,
    cursor: u32,
}

impl DeviceSlots {
    pub fn new(size: usize) -> Self {
        Self {
            used: vec![false; size],
            cursor: 0,
        }
    }

    /// Lowest id at or after the cursor that is not claimed yet.
    pub fn next_free(&mut self) -> u32 {
        while (self.cursor as usize) < self.used.len() && self.used[self.cursor as usize] {
            self.cursor += 1;
        }
        self.cursor
    }

    /// Move the cursor forward to where the allocator left it.
    pub fn advance_to(&mut self, cursor: u32) {
        self.cursor = self.cursor.max(cursor);
    }

    pub fn claim(&mut self, device_id: u32, nic: &NicProfile) -> Result<()> {
        let slot = self.used.get_mut(device_id as usize).ok_or_else(|| {
            OrchestratorError::InvalidParameter(format!("device id for nic is too large: {}", nic))
        })?;
        if *slot {
            return Err(OrchestratorError::InvalidParameter(format!(
                "conflicting device id {} for two different nics: {}",
                device_id, nic
            )));
        }
        *slot = true;
        Ok(())
    }
}

/// Build a new NIC row from guru output. Uses the profile's device id when
/// set, otherwise `cursor`. Returns the row and the advanced cursor.
pub fn nic_from_profile(
    profile: &NicProfile,
    network: &Network,
    vm_id: VmId,
    vm_type: VmType,
    cursor: u32,
) -> (Nic, u32) {
    let mut nic = Nic {
        id: NicId(0),
        vm_id: Some(vm_id),
        vm_type: Some(vm_type),
        network_id: network.id,
        device_id: 0,
        state: NicState::Allocated,
        reservation_strategy: ReservationStrategy::Start,
        reserver_name: None,
        reservation_id: None,
        ip4_address: None,
        ip4_netmask: None,
        ip4_gateway: None,
        ip6_address: None,
        ip6_gateway: None,
        ip6_cidr: None,
        mac_address: None,
        broadcast_uri: None,
        isolation_uri: None,
        mode: None,
        default_nic: false,
        created: Utc::now(),
    };
    let cursor = apply_profile_to_nic(&mut nic, profile, cursor);
    (nic, cursor)
}

/// Copy allocation results onto a NIC row.
pub fn apply_profile_to_nic(nic: &mut Nic, profile: &NicProfile, mut cursor: u32) -> u32 {
    match profile.device_id {
        Some(device_id) => nic.device_id = device_id,
        None => {
            nic.device_id = cursor;
            cursor += 1;
        }
    }
    nic.default_nic = profile.default_nic;
    nic.ip4_address = profile.ip4_address.clone();
    nic.ip4_netmask = profile.ip4_netmask.clone();
    nic.ip4_gateway = profile.ip4_gateway.clone();
    nic.ip6_address = profile.ip6_address.clone();
    nic.ip6_gateway = profile.ip6_gateway.clone();
    nic.ip6_cidr = profile.ip6_cidr.clone();
    nic.mac_address = profile.mac_address.clone();
    nic.mode = profile.mode.clone();
    if let Some(strategy) = profile.reservation_strategy {
        nic.reservation_strategy = strategy;
    }
    nic.broadcast_uri = profile.broadcast_uri.clone();
    nic.isolation_uri = profile.isolation_uri.clone();
    nic.state = NicState::Allocated;
    cursor
}

/// Copy reservation results onto a NIC row.
pub fn apply_reservation_to_nic(nic: &mut Nic, profile: &NicProfile) {
    nic.ip4_address = profile.ip4_address.clone();
    nic.ip4_netmask = profile.ip4_netmask.clone();
    nic.ip4_gateway = profile.ip4_gateway.clone();
    nic.ip6_address = profile.ip6_address.clone();
    nic.ip6_gateway = profile.ip6_gateway.clone();
    nic.ip6_cidr = profile.ip6_cidr.clone();
    nic.mac_address = profile.mac_address.clone();
    nic.broadcast_uri = profile.broadcast_uri.clone();
    nic.isolation_uri = profile.isolation_uri.clone();
}

/// Copy what a guru left on the profile after releasing a reservation.
pub fn apply_profile_to_nic_for_release(nic: &mut Nic, profile: &NicProfile) {
    nic.ip4_gateway = profile.ip4_gateway.clone();
    nic.ip4_address = profile.ip4_address.clone();
    nic.ip4_netmask = profile.ip4_netmask.clone();
    nic.ip6_address = profile.ip6_address.clone();
    nic.mac_address = profile.mac_address.clone();
    if let Some(strategy) = profile.reservation_strategy {
        nic.reservation_strategy = strategy;
    }
    nic.broadcast_uri = profile.broadcast_uri.clone();
    nic.isolation_uri = profile.isolation_uri.clone();
}

/// Write back what a guru changed on a network during shutdown.
pub fn apply_profile_to_network(network: &mut Network, profile: &Network) {
    network.broadcast_uri = profile.broadcast_uri.clone();
    network.cidr = profile.cidr.clone();
    network.gateway = profile.gateway.clone();
    network.physical_network_id = profile.physical_network_id;
}

/// Build the profile handed to gurus and elements for a persisted NIC.
pub fn profile_for_nic(
    nic: &Nic,
    network: &Network,
    network_rate: Option<u32>,
    security_group_enabled: bool,
    name: Option<String>,
) -> NicProfile {
    NicProfile {
        id: Some(nic.id),
        network_id: nic.network_id,
        vm_id: nic.vm_id,
        device_id: Some(nic.device_id),
        default_nic: nic.default_nic,
        ip4_address: nic.ip4_address.clone(),
        ip4_netmask: nic.ip4_netmask.clone(),
        ip4_gateway: nic.ip4_gateway.clone(),
        ip6_address: nic.ip6_address.clone(),
        ip6_gateway: nic.ip6_gateway.clone(),
        ip6_cidr: nic.ip6_cidr.clone(),
        mac_address: nic.mac_address.clone(),
        broadcast_uri: nic.broadcast_uri.clone().or_else(|| network.broadcast_uri.clone()),
        isolation_uri: nic.isolation_uri.clone(),
        broadcast_type: Some(network.broadcast_domain_type),
        traffic_type: Some(network.traffic_type),
        mode: nic.mode.clone().or_else(|| network.mode.clone()),
        reservation_strategy: Some(nic.reservation_strategy),
        reservation_id: nic.reservation_id.clone(),
        network_rate,
        security_group_enabled,
        name,
    }
}

/// NIC row for an out-of-band address reservation.
pub fn placeholder_nic(
    network: &Network,
    ip4_address: Option<String>,
    ip6_address: Option<String>,
    vm_type: Option<VmType>,
) -> Nic {
    Nic {
        id: NicId(0),
        vm_id: None,
        vm_type,
        network_id: network.id,
        device_id: 0,
        state: NicState::Reserved,
        reservation_strategy: ReservationStrategy::PlaceHolder,
        reserver_name: None,
        reservation_id: None,
        ip4_address,
        ip4_netmask: None,
        ip4_gateway: network.gateway.clone(),
        ip6_address,
        ip6_gateway: network.ip6_gateway.clone(),
        ip6_cidr: network.ip6_cidr.clone(),
        mac_address: None,
        broadcast_uri: network.broadcast_uri.clone(),
        isolation_uri: None,
        mode: network.mode.clone(),
        default_nic: false,
        created: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AccountId, BroadcastDomainType, DomainId, GuestType, NetworkId, NetworkState, OfferingId,
        TrafficType, ZoneId,
    };
    use uuid::Uuid;

    fn make_network() -> Network {
        Network {
            id: NetworkId(3),
            uuid: Uuid::new_v4(),
            name: "guest".to_string(),
            state: NetworkState::Implemented,
            guest_type: Some(GuestType::Isolated),
            traffic_type: TrafficType::Guest,
            broadcast_domain_type: BroadcastDomainType::Vlan,
            mode: Some("Dhcp".to_string()),
            offering_id: OfferingId(1),
            account_id: AccountId(2),
            domain_id: DomainId(1),
            zone_id: ZoneId(1),
            acl_type: None,
            cidr: Some("10.1.1.0/24".to_string()),
            gateway: Some("10.1.1.1".to_string()),
            ip6_cidr: None,
            ip6_gateway: None,
            broadcast_uri: Some("vlan://100".to_string()),
            physical_network_id: None,
            vpc_id: None,
            reservation_id: None,
            restart_required: false,
            display_network: true,
            related: None,
            guru_name: "TestGuru".to_string(),
            network_domain: None,
            created: Utc::now(),
            removed: None,
        }
    }

    #[test]
    fn test_slots_skip_claimed_ids() {
        let profile = NicProfile::default();
        let mut slots = DeviceSlots::new(3);
        slots.claim(0, &profile).unwrap();
        assert_eq!(slots.next_free(), 1);
        slots.claim(1, &profile).unwrap();
        assert_eq!(slots.next_free(), 2);
    }

    #[test]
    fn test_slots_reject_conflict_and_overflow() {
        let profile = NicProfile::default();
        let mut slots = DeviceSlots::new(2);
        slots.claim(1, &profile).unwrap();
        assert!(matches!(
            slots.claim(1, &profile),
            Err(OrchestratorError::InvalidParameter(_))
        ));
        assert!(matches!(
            slots.claim(2, &profile),
            Err(OrchestratorError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_cursor_advances_only_without_explicit_id() {
        let network = make_network();
        let (nic, cursor) =
            nic_from_profile(&NicProfile::default(), &network, VmId(1), VmType::User, 4);
        assert_eq!(nic.device_id, 4);
        assert_eq!(cursor, 5);

        let explicit = NicProfile {
            device_id: Some(2),
            ..Default::default()
        };
        let (nic, cursor) = nic_from_profile(&explicit, &network, VmId(1), VmType::User, 5);
        assert_eq!(nic.device_id, 2);
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_profile_falls_back_to_network_broadcast() {
        let network = make_network();
        let (nic, _) = nic_from_profile(&NicProfile::default(), &network, VmId(1), VmType::User, 0);
        let profile = profile_for_nic(&nic, &network, Some(200), false, None);
        assert_eq!(profile.broadcast_uri.as_deref(), Some("vlan://100"));
        assert_eq!(profile.mode.as_deref(), Some("Dhcp"));
        assert_eq!(profile.network_rate, Some(200));
    }

    #[test]
    fn test_placeholder_is_reserved() {
        let network = make_network();
        let nic = placeholder_nic(&network, Some("10.1.1.5".into()), None, Some(VmType::DomainRouter));
        assert_eq!(nic.state, NicState::Reserved);
        assert_eq!(nic.reservation_strategy, ReservationStrategy::PlaceHolder);
        assert_eq!(nic.vm_id, None);
        assert_eq!(nic.ip4_gateway.as_deref(), Some("10.1.1.1"));
    }
}
