// arbiter/src/engine/coordinator.rs
//
// TransactionCoordinator: fan-out dispatch + fan-in barrier per transaction.
//
// dispatch: bump the transaction's outstanding count by the batch size, then
//           spawn one task per model id. Each task runs the analyzer on the
//           blocking pool, records a successful result, and always completes
//           its barrier slot, success or failure.
// check:    park until the count reaches zero, flip the barrier to Deciding,
//           hand off to the DecisionGate, then drop the barrier.
//
// Dispatches for a phase set must be issued before the check that covers
// them. Work added while the check is still parked is waited for; work
// offered once the verdict is underway is refused with TransactionBusy.
//
// Nothing here times out by itself. `check_with_deadline` bounds the wait
// and `abandon` / `housekeeping_loop` purge transactions nobody checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::engine::gate::DecisionGate;
use crate::engine::registry::PluginRegistry;
use crate::error::{CheckError, InvokeError};
use crate::events::{Phase, WafContext};
use crate::state::barrier::{TransactionBarrier, TxPhase};
use crate::state::results::ResultStore;

#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub dispatched: AtomicU64,
    pub failed:     AtomicU64,
    pub recorded:   AtomicU64,
    pub decided:    AtomicU64,
    pub abandoned:  AtomicU64,
    pub rejected:   AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dispatched: u64,
    pub failed:     u64,
    pub recorded:   u64,
    pub decided:    u64,
    pub abandoned:  u64,
    pub rejected:   u64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed:     self.failed.load(Ordering::Relaxed),
            recorded:   self.recorded.load(Ordering::Relaxed),
            decided:    self.decided.load(Ordering::Relaxed),
            abandoned:  self.abandoned.load(Ordering::Relaxed),
            rejected:   self.rejected.load(Ordering::Relaxed),
        }
    }
}

pub struct Coordinator {
    registry: Arc<PluginRegistry>,
    store:    Arc<ResultStore>,
    gate:     DecisionGate,
    barriers: DashMap<String, Arc<TransactionBarrier>>,
    pub stats: CoordinatorStats,
}

impl Coordinator {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<ResultStore>) -> Arc<Self> {
        let gate = DecisionGate::new(Arc::clone(&registry), Arc::clone(&store));
        Arc::new(Self {
            registry,
            store,
            gate,
            barriers: DashMap::new(),
            stats:    CoordinatorStats::default(),
        })
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> { &self.registry }

    pub fn store(&self) -> &Arc<ResultStore> { &self.store }

    /// Transactions with a live barrier.
    pub fn n_open(&self) -> usize { self.barriers.len() }

    pub fn outstanding(&self, transaction_id: &str) -> Option<usize> {
        self.barriers.get(transaction_id).map(|b| b.outstanding())
    }

    /// Fan `payload` out to every model in `model_ids`. Returns once the
    /// invocations are launched; must be called inside a tokio runtime.
    pub fn dispatch(
        self: &Arc<Self>,
        transaction_id: &str,
        payload:        impl Into<Arc<str>>,
        model_ids:      &[String],
        phase:          Phase,
    ) -> Result<(), CheckError> {
        // Count goes up under the map's shard lock so a concurrent check
        // can't retire this barrier between lookup and increment.
        let barrier = {
            let entry = self.barriers
                .entry(transaction_id.to_string())
                .or_insert_with(|| Arc::new(TransactionBarrier::new()));
            if let Err(e) = entry.add(transaction_id, model_ids.len()) {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(tx = transaction_id, %phase, "dispatch refused: {}", e);
                return Err(e);
            }
            Arc::clone(entry.value())
        };

        let payload: Arc<str> = payload.into();
        debug!(tx = transaction_id, %phase, n_models = model_ids.len(),
               outstanding = barrier.outstanding(), "dispatching");

        for model_id in model_ids {
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            let this    = Arc::clone(self);
            let barrier = Arc::clone(&barrier);
            let payload = Arc::clone(&payload);
            let tx      = transaction_id.to_string();
            let model   = model_id.clone();
            tokio::spawn(async move {
                this.run_model(&tx, &model, phase, payload, &barrier).await;
            });
        }
        Ok(())
    }

    async fn run_model(
        &self,
        transaction_id: &str,
        model_id:       &str,
        phase:          Phase,
        payload:        Arc<str>,
        barrier:        &TransactionBarrier,
    ) {
        let registry = Arc::clone(&self.registry);
        let (tx, model) = (transaction_id.to_string(), model_id.to_string());
        let outcome = tokio::task::spawn_blocking(move || registry.invoke_model(&model, phase, &payload, &tx))
            .await
            .unwrap_or_else(|e| Err(InvokeError::Invocation(format!("analyzer panicked: {}", e))))
            .and_then(|p| {
                if p.is_finite() { Ok(p) } else { Err(InvokeError::Invocation(format!("non-finite probability {}", p))) }
            });

        match outcome {
            Ok(p) => {
                if !(0.0..=1.0).contains(&p) {
                    warn!(tx = transaction_id, model_id, p, "probability outside [0, 1]");
                }
                // invoke_model succeeded, so the descriptor exists
                if let Some(desc) = self.registry.model(model_id) {
                    let (weight, threshold) = (desc.weight, desc.threshold);
                    let stored = barrier.while_open(|| {
                        self.store.record(transaction_id, model_id, p, weight, threshold)
                    });
                    match stored {
                        Some(()) => { self.stats.recorded.fetch_add(1, Ordering::Relaxed); }
                        None     => debug!(tx = transaction_id, model_id, "transaction closed, result dropped"),
                    }
                }
                debug!(tx = transaction_id, model_id, p, "model success");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(tx = transaction_id, model_id, "{}", e);
            }
        }

        let left = barrier.complete();
        if left == 0 {
            debug!(tx = transaction_id, "all models finished");
        }
    }

    /// Wait for every dispatched model, then run the decision analyzer.
    pub async fn check(
        self: &Arc<Self>,
        transaction_id: &str,
        decision_id:    &str,
        waf:            WafContext,
    ) -> Result<bool, CheckError> {
        self.check_with_deadline(transaction_id, decision_id, waf, None).await
    }

    /// `check` with an optional bound on the barrier wait. On expiry the
    /// transaction is abandoned and `CheckError::Timeout` returned. The
    /// deadline never interrupts a verdict already being computed.
    pub async fn check_with_deadline(
        self: &Arc<Self>,
        transaction_id: &str,
        decision_id:    &str,
        waf:            WafContext,
        deadline:       Option<Duration>,
    ) -> Result<bool, CheckError> {
        // begin_wait runs under the map guard. A barrier still in the map is
        // never Closed, so racing a verdict that just finished reads as
        // TransactionNotFound rather than Abandoned.
        let barrier = match self.barriers.get(transaction_id) {
            Some(b) => {
                b.begin_wait(transaction_id)?;
                Arc::clone(b.value())
            }
            None => return Err(CheckError::TransactionNotFound(transaction_id.to_string())),
        };
        let _waiting = WaitGuard(&barrier);
        debug!(tx = transaction_id, outstanding = barrier.outstanding(), "waiting for all models to finish");

        match deadline {
            None => Self::wait_ready(&barrier, transaction_id).await?,
            Some(d) => match tokio::time::timeout(d, Self::wait_ready(&barrier, transaction_id)).await {
                Ok(r) => r?,
                Err(_) => {
                    self.abandon(transaction_id);
                    return Err(CheckError::Timeout(transaction_id.to_string()));
                }
            },
        }

        // The verdict and purge run detached so a dropped caller can't leave
        // the transaction half-decided.
        let this = Arc::clone(self);
        let (tx, decision) = (transaction_id.to_string(), decision_id.to_string());
        let task_barrier = Arc::clone(&barrier);
        let verdict = tokio::spawn(async move {
            let verdict = this.gate.decide(&tx, &decision, waf).await;
            this.barriers.remove_if(&tx, |_, b| Arc::ptr_eq(b, &task_barrier));
            task_barrier.close();
            this.stats.decided.fetch_add(1, Ordering::Relaxed);
            verdict
        })
        .await
        .unwrap_or_else(|e| Err(InvokeError::Invocation(format!("decision task failed: {}", e))));

        verdict.map_err(CheckError::from)
    }

    async fn wait_ready(barrier: &TransactionBarrier, transaction_id: &str) -> Result<(), CheckError> {
        loop {
            barrier.wait_idle().await;
            if barrier.try_begin_decide(transaction_id)? {
                return Ok(());
            }
        }
    }

    /// Force-clear a transaction nobody will check: drops its barrier (waking
    /// any parked check with `Abandoned`) and purges its results. A
    /// transaction whose verdict is already underway is left alone.
    pub fn abandon(&self, transaction_id: &str) -> bool {
        let removed = self.barriers.remove_if(transaction_id, |_, b| b.close_unless_deciding());
        if removed.is_none() {
            return false;
        }
        let purged = self.gate.purge(transaction_id);
        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        info!(tx = transaction_id, purged, "transaction abandoned");
        true
    }

    /// Abandon every transaction older than `ttl` that isn't being decided.
    pub fn reap(&self, ttl: Duration) -> usize {
        let stale: Vec<String> = self.barriers.iter()
            .filter(|e| e.value().age() > ttl && e.value().phase() != TxPhase::Deciding)
            .map(|e| e.key().clone())
            .collect();
        stale.iter().filter(|tx| self.abandon(tx)).count()
    }

    pub async fn housekeeping_loop(self: Arc<Self>, ttl: Duration) {
        let every = (ttl / 4).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(every).await;
            let n = self.reap(ttl);
            if n > 0 {
                warn!(reaped = n, ttl_secs = ttl.as_secs(), "abandoned stale transactions");
            }
        }
    }
}

/// Hands the barrier back to Dispatching if the check future is dropped
/// while parked, so a later check can still wait on it.
struct WaitGuard<'a>(&'a TransactionBarrier);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) { self.0.end_wait(); }
}
