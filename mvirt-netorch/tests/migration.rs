//! NIC migration across hosts.

mod common;

use common::*;
use mvirt_netorch::model::{PublicIp, VmProfile, VmType};
use mvirt_netorch::store::Reader;

fn migration_harness() -> Harness {
    Harness::build(test_config(), |journal| {
        (
            RecordingGuru::new(journal.clone()).with_migration(),
            vec![RecordingElement::virtual_router(journal.clone()).with_migration()],
        )
    })
}

/// Allocate and start a user VM on a fresh isolated network.
async fn running_vm(h: &Harness) -> VmProfile {
    let network = h.setup(ISOLATED_OFFERING).await;
    let mut vm = h.vm(10, VmType::User);
    h.orchestrator
        .allocate(&mut vm, &[(network, vec![])])
        .await
        .unwrap();
    let mut started = h.vm(10, VmType::User);
    h.orchestrator
        .prepare(&mut started, &h.dest(), &h.ctx())
        .await
        .unwrap();
    started
}

fn with_reservation(vm: &VmProfile, reservation_id: &str) -> VmProfile {
    let mut copy = vm.clone();
    for nic in &mut copy.nics {
        nic.reservation_id = Some(reservation_id.to_string());
    }
    copy
}

#[tokio::test]
async fn test_prepare_consults_guru_and_elements() {
    let h = migration_harness();
    running_vm(&h).await;

    let mut migrating = h.vm(10, VmType::User);
    h.orchestrator
        .prepare_nic_for_migration(&mut migrating, &h.dest())
        .await
        .unwrap();

    assert_eq!(migrating.nics.len(), 1);
    assert!(
        h.journal.position("guru:prepare_migration").unwrap()
            < h.journal.position("VirtualRouter:prepare_migration").unwrap()
    );
}

#[tokio::test]
async fn test_prepare_without_responders() {
    let h = Harness::new();
    running_vm(&h).await;

    let mut migrating = h.vm(10, VmType::User);
    h.orchestrator
        .prepare_nic_for_migration(&mut migrating, &h.dest())
        .await
        .unwrap();

    assert_eq!(migrating.nics.len(), 1);
    assert!(h.journal.with_prefix("guru:prepare_migration").is_empty());
}

#[tokio::test]
async fn test_commit_takes_destination_reservation() {
    let h = migration_harness();
    let vm = running_vm(&h).await;
    let src = with_reservation(&vm, "r-src");
    let dst = with_reservation(&vm, "r-dst");

    h.orchestrator
        .commit_nic_for_migration(&src, &dst)
        .await
        .unwrap();

    assert!(h.journal.contains("guru:commit_migration:r-dst"));
    assert!(h.journal.contains("VirtualRouter:commit_migration"));
    let nic_id = vm.nics[0].id.unwrap();
    assert_eq!(
        h.store.nic(nic_id).unwrap().reservation_id.as_deref(),
        Some("r-dst")
    );
}

#[tokio::test]
async fn test_commit_skips_nics_missing_on_destination() {
    let h = migration_harness();
    let vm = running_vm(&h).await;
    let original = h.store.nic(vm.nics[0].id.unwrap()).unwrap().reservation_id;
    let src = with_reservation(&vm, "r-src");
    let mut dst = with_reservation(&vm, "r-dst");
    dst.nics.clear();

    h.orchestrator
        .commit_nic_for_migration(&src, &dst)
        .await
        .unwrap();

    assert!(h.journal.with_prefix("guru:commit_migration").is_empty());
    assert_eq!(
        h.store.nic(vm.nics[0].id.unwrap()).unwrap().reservation_id,
        original
    );
}

#[tokio::test]
async fn test_rollback_notifies_responders() {
    let h = migration_harness();
    let vm = running_vm(&h).await;
    let nic_id = vm.nics[0].id.unwrap();
    let before = h.store.nic(nic_id).unwrap().reservation_id;
    let src = with_reservation(&vm, "r-src");
    let dst = with_reservation(&vm, "r-dst");

    h.orchestrator
        .rollback_nic_for_migration(&src, &dst)
        .await
        .unwrap();

    assert_eq!(h.journal.count("guru:rollback_migration"), 1);
    assert_eq!(h.journal.count("VirtualRouter:rollback_migration"), 1);
    assert_eq!(h.store.nic(nic_id).unwrap().reservation_id, before);
}

#[tokio::test]
async fn test_router_migration_synthesizes_public_nics() {
    let h = Harness::new();
    let guest = h.setup(ISOLATED_OFFERING).await;
    let public = h.setup(PUBLIC_OFFERING).await;

    let mut router = h.vm(30, VmType::DomainRouter);
    h.orchestrator
        .allocate(&mut router, &[(guest.clone(), vec![]), (public.clone(), vec![])])
        .await
        .unwrap();

    for (id, address, vlan) in [
        (1, "192.0.2.10", "300"),
        (2, "192.0.2.11", "300"),
        (3, "192.0.2.20", "301"),
    ] {
        h.store.put_public_ip(PublicIp {
            id,
            address: address.to_string(),
            netmask: "255.255.255.0".to_string(),
            gateway: "192.0.2.1".to_string(),
            mac_address: None,
            vlan_tag: vlan.to_string(),
            network_id: public.id,
            associated_network_id: Some(guest.id),
            source_nat: id == 1,
            allocated: true,
        });
    }

    let mut migrating = h.vm(30, VmType::DomainRouter);
    h.orchestrator
        .prepare_nic_for_migration(&mut migrating, &h.dest())
        .await
        .unwrap();

    assert_eq!(migrating.nics.len(), 4);
    let synthesized: Vec<_> = migrating.nics.iter().filter(|n| n.id.is_none()).collect();
    assert_eq!(synthesized.len(), 2);
    assert!(synthesized.iter().all(|n| n.device_id == Some(255)));
    assert!(synthesized.iter().all(|n| n.network_id == public.id));
    let uris: Vec<_> = synthesized
        .iter()
        .map(|n| n.broadcast_uri.as_deref().unwrap())
        .collect();
    assert_eq!(uris, vec!["vlan://300", "vlan://301"]);
    assert_eq!(synthesized[0].ip4_address.as_deref(), Some("192.0.2.10"));
}

#[tokio::test]
async fn test_user_vm_migration_ignores_public_addresses() {
    let h = Harness::new();
    let guest = h.setup(ISOLATED_OFFERING).await;
    let public = h.setup(PUBLIC_OFFERING).await;
    let mut vm = h.vm(10, VmType::User);
    h.orchestrator
        .allocate(&mut vm, &[(guest.clone(), vec![])])
        .await
        .unwrap();
    h.store.put_public_ip(PublicIp {
        id: 1,
        address: "192.0.2.10".to_string(),
        netmask: "255.255.255.0".to_string(),
        gateway: "192.0.2.1".to_string(),
        mac_address: None,
        vlan_tag: "300".to_string(),
        network_id: public.id,
        associated_network_id: Some(guest.id),
        source_nat: true,
        allocated: true,
    });

    let mut migrating = h.vm(10, VmType::User);
    h.orchestrator
        .prepare_nic_for_migration(&mut migrating, &h.dest())
        .await
        .unwrap();

    assert_eq!(migrating.nics.len(), 1);
    assert!(migrating.nics[0].id.is_some());
}
