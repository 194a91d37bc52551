//! Network garbage collector.
//!
//! Periodically shuts down networks that have had no active NICs for at
//! least the configured wait. The first time a network is seen idle is kept
//! in an [`IdleMap`] handed from one pass to the next.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::model::{NetworkId, ReservationContext};
use crate::orchestrator::NetworkOrchestrator;
use crate::store::{LockKey, with_transaction};

/// Name of the global lock serializing GC passes across instances.
pub const GC_LOCK_NAME: &str = "Network.GC.Lock";

/// First time each candidate network was observed idle.
pub type IdleMap = HashMap<NetworkId, DateTime<Utc>>;

/// Outcome of sorting one pass's candidates.
#[derive(Debug, Default, PartialEq)]
struct Classified {
    /// Candidates still waiting, carried into the next pass.
    waiting: IdleMap,
    /// Candidates seen idle for the first time.
    new: Vec<NetworkId>,
    /// Candidates idle for at least the wait window.
    expired: Vec<NetworkId>,
}

fn classify(
    candidates: &[NetworkId],
    previous: &IdleMap,
    now: DateTime<Utc>,
    wait: chrono::Duration,
) -> Classified {
    let mut out = Classified::default();
    for id in candidates {
        match previous.get(id) {
            None => {
                out.waiting.insert(*id, now);
                out.new.push(*id);
            }
            Some(first) if now - *first >= wait => out.expired.push(*id),
            Some(first) => {
                out.waiting.insert(*id, *first);
            }
        }
    }
    out
}

pub struct NetworkGc {
    orchestrator: Arc<NetworkOrchestrator>,
}

impl NetworkGc {
    pub fn new(orchestrator: Arc<NetworkOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run one pass and return the idle map for the next one.
    ///
    /// If the GC lock cannot be taken the pass is skipped and `previous` is
    /// returned unchanged.
    pub async fn run_pass(&self, previous: IdleMap, now: DateTime<Utc>) -> IdleMap {
        let orch = &self.orchestrator;
        let store = orch.store();

        let Some(_lock) = store
            .acquire(
                LockKey::Named(GC_LOCK_NAME.to_string()),
                orch.config().gc_lock_timeout(),
            )
            .await
        else {
            debug!("Network GC lock is held elsewhere, skipping pass");
            return previous;
        };

        let candidates: Vec<NetworkId> = store
            .gc_candidates()
            .into_iter()
            .filter(|id| self.is_ready_for_gc(*id))
            .collect();
        debug!(candidates = candidates.len(), "Network GC pass");

        let classified = classify(&candidates, &previous, now, orch.config().gc_wait());

        for id in &classified.new {
            debug!(network_id = %id, "Network is idle, waiting before shutdown");
            orch.publish(Event::NetworkGcCandidate {
                id: *id,
                first_idle: now,
            });
        }

        for id in classified.expired {
            self.shutdown_idle(id).await;
        }

        classified.waiting
    }

    /// A network is not collected while a VM using it is in transition.
    fn is_ready_for_gc(&self, id: NetworkId) -> bool {
        let store = self.orchestrator.store();
        let busy = store
            .nics_for_network(id)
            .iter()
            .filter_map(|nic| nic.vm_id.and_then(|vm_id| store.vm(vm_id)))
            .find(|vm| vm.removed.is_none() && vm.state.is_transitional());
        match busy {
            Some(vm) => {
                debug!(network_id = %id, vm_id = %vm.id, state = ?vm.state, "Network is not ready for GC");
                false
            }
            None => true,
        }
    }

    async fn shutdown_idle(&self, id: NetworkId) {
        let orch = &self.orchestrator;

        if orch.store().network(id).is_none() {
            debug!(network_id = %id, "Network is removed, clearing GC check");
            let cleared = with_transaction(orch.store().as_ref(), |tx| {
                tx.clear_check_for_gc(id);
                Ok(())
            });
            if let Err(e) = cleared {
                warn!(network_id = %id, error = %e, "Failed to clear GC check");
            }
            return;
        }

        let ctx = ReservationContext::system();
        match orch.shutdown_network(id, &ctx, false).await {
            Ok(true) => {
                info!(network_id = %id, "Garbage collected idle network");
                orch.audit().network_gc(id);
            }
            Ok(false) => warn!(network_id = %id, "Unable to shut down idle network"),
            Err(e) => warn!(network_id = %id, error = %e, "Unable to shut down idle network"),
        }
    }

    /// Run passes every `network_gc_interval_secs` until `shutdown` flips to
    /// true or its sender is dropped.
    pub fn spawn(self: Arc<Self>) -> GcHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = self.orchestrator.config().gc_interval();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut idle = IdleMap::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        idle = self.run_pass(idle, Utc::now()).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Network GC stopped");
                            break;
                        }
                    }
                }
            }
        });

        GcHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Running GC loop.
pub struct GcHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GcHandle {
    /// Signal the loop to stop and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Network GC task failed");
        }
    }
}
