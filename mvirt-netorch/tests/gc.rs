//! Idle network garbage collection.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::*;
use mvirt_netorch::gc::GC_LOCK_NAME;
use mvirt_netorch::model::{NetworkState, VmId, VmState, VmType};
use mvirt_netorch::store::{LockKey, Reader};
use mvirt_netorch::{Event, IdleMap, NetworkGc, OrchestratorConfig, ResourceStore};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

#[tokio::test]
async fn test_idle_network_collected_after_wait() {
    let h = Harness::new();
    let network = h.implemented(ISOLATED_OFFERING).await;
    let gc = NetworkGc::new(h.orchestrator.clone());
    let mut events = h.orchestrator.subscribe();

    let idle = gc.run_pass(IdleMap::new(), at(0)).await;
    assert_eq!(idle.get(&network.id), Some(&at(0)));
    assert_eq!(
        events.try_recv().unwrap(),
        Event::NetworkGcCandidate {
            id: network.id,
            first_idle: at(0),
        }
    );

    let idle = gc.run_pass(idle, at(30)).await;
    assert_eq!(idle.get(&network.id), Some(&at(0)));
    assert_eq!(h.network(&network).state, NetworkState::Implemented);
    assert!(!h.journal.contains("guru:shutdown"));

    let idle = gc.run_pass(idle, at(60)).await;
    assert!(idle.is_empty());
    assert_eq!(h.network(&network).state, NetworkState::Allocated);
    assert!(h.journal.contains("guru:shutdown"));
    assert!(!h.store.network_ops(network.id).check_for_gc);

    // No longer a candidate once shut down.
    let idle = gc.run_pass(idle, at(120)).await;
    assert!(idle.is_empty());
}

#[tokio::test]
async fn test_network_with_active_nics_is_not_candidate() {
    let h = Harness::new();
    let network = h.setup(ISOLATED_OFFERING).await;
    let mut vm = h.vm(10, VmType::User);
    h.orchestrator
        .allocate(&mut vm, &[(network.clone(), vec![])])
        .await
        .unwrap();
    h.orchestrator.prepare(&mut vm, &h.dest(), &h.ctx()).await.unwrap();

    let gc = NetworkGc::new(h.orchestrator.clone());
    let idle = gc.run_pass(IdleMap::new(), at(0)).await;
    assert!(idle.is_empty());
}

#[tokio::test]
async fn test_network_with_vm_in_transition_is_skipped() {
    let h = Harness::new();
    let network = h.implemented(ISOLATED_OFFERING).await;
    let mut vm = h.vm(10, VmType::User);
    h.orchestrator
        .allocate(&mut vm, &[(network.clone(), vec![])])
        .await
        .unwrap();
    h.store.set_vm_state(VmId(10), VmState::Starting, None);

    let gc = NetworkGc::new(h.orchestrator.clone());
    let idle = gc.run_pass(IdleMap::new(), at(0)).await;
    assert!(idle.is_empty());

    // A candidate again once the VM settles.
    h.store.set_vm_state(VmId(10), VmState::Stopped, None);
    let idle = gc.run_pass(idle, at(10)).await;
    assert_eq!(idle.get(&network.id), Some(&at(10)));
}

#[tokio::test]
async fn test_shared_network_is_not_candidate() {
    let h = Harness::new();
    h.setup(SHARED_OFFERING).await;

    let gc = NetworkGc::new(h.orchestrator.clone());
    assert!(gc.run_pass(IdleMap::new(), at(0)).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pass_skipped_while_lock_held() {
    let h = Harness::new();
    let network = h.implemented(ISOLATED_OFFERING).await;
    let gc = NetworkGc::new(h.orchestrator.clone());

    let _held = h
        .store
        .acquire(LockKey::Named(GC_LOCK_NAME.to_string()), Duration::from_secs(1))
        .await
        .unwrap();

    let previous: IdleMap = [(network.id, at(0))].into();
    let idle = gc.run_pass(previous.clone(), at(3600)).await;

    assert_eq!(idle, previous);
    assert_eq!(h.network(&network).state, NetworkState::Implemented);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_loop_runs_passes_until_stopped() {
    init_tracing();
    let h = Harness::build(
        OrchestratorConfig {
            network_gc_interval_secs: 5,
            ..test_config()
        },
        |journal| {
            (
                RecordingGuru::new(journal.clone()),
                vec![RecordingElement::virtual_router(journal.clone())],
            )
        },
    );
    let network = h.implemented(ISOLATED_OFFERING).await;
    let mut events = h.orchestrator.subscribe();

    let handle = Arc::new(NetworkGc::new(h.orchestrator.clone())).spawn();
    assert!(events.try_recv().is_err());

    tokio::time::sleep(Duration::from_secs(6)).await;
    match events.try_recv() {
        Ok(Event::NetworkGcCandidate { id, .. }) => assert_eq!(id, network.id),
        other => panic!("unexpected event: {:?}", other),
    }

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_loop_still_runs() {
    let h = Harness::build(
        OrchestratorConfig {
            network_gc_interval_secs: 0,
            ..test_config()
        },
        |journal| {
            (
                RecordingGuru::new(journal.clone()),
                vec![RecordingElement::virtual_router(journal.clone())],
            )
        },
    );
    let network = h.implemented(ISOLATED_OFFERING).await;
    let mut events = h.orchestrator.subscribe();

    let handle = Arc::new(NetworkGc::new(h.orchestrator.clone())).spawn();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    match events.try_recv() {
        Ok(Event::NetworkGcCandidate { id, .. }) => assert_eq!(id, network.id),
        other => panic!("unexpected event: {:?}", other),
    }

    handle.stop().await;
}
