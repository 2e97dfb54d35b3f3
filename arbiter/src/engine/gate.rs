// arbiter/src/engine/gate.rs
//
// DecisionGate: snapshot → decision analyzer → purge.
//
// The purge runs on every path out of `decide`, including analyzer errors
// and analyzer panics, so a decided transaction never leaves results behind.
// The gate holds no per-transaction state of its own; the blending formula
// lives entirely in the decision analyzer.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::engine::registry::PluginRegistry;
use crate::error::InvokeError;
use crate::events::{DecisionInput, WafContext};
use crate::state::results::ResultStore;

pub struct DecisionGate {
    registry: Arc<PluginRegistry>,
    store:    Arc<ResultStore>,
}

impl DecisionGate {
    pub fn new(registry: Arc<PluginRegistry>, store: Arc<ResultStore>) -> Self {
        Self { registry, store }
    }

    pub async fn decide(
        &self,
        transaction_id: &str,
        decision_id:    &str,
        waf:            WafContext,
    ) -> Result<bool, InvokeError> {
        let snapshot = self.store.snapshot(transaction_id);
        debug!(tx = transaction_id, n_results = snapshot.len(), decision_id, "gate | deciding");
        let input = DecisionInput::from_snapshot(transaction_id, &snapshot, waf);

        let registry = Arc::clone(&self.registry);
        let id       = decision_id.to_string();
        let verdict  = tokio::task::spawn_blocking(move || registry.invoke_decision(&id, &input))
            .await
            .unwrap_or_else(|e| Err(InvokeError::Invocation(format!("decision analyzer panicked: {}", e))));

        let purged = self.purge(transaction_id);

        match &verdict {
            Ok(block) => info!(tx = transaction_id, decision_id, block = *block, purged, "transaction checked"),
            Err(e)    => error!(tx = transaction_id, decision_id, purged, "could not check transaction: {}", e),
        }
        verdict
    }

    /// Drop every result recorded for the transaction.
    pub fn purge(&self, transaction_id: &str) -> usize {
        self.store.clear(transaction_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::Catalog;
    use crate::config::{Config, DecisionDescriptor};
    use std::sync::atomic::Ordering;

    fn gate(decision_plugin: &str) -> (DecisionGate, Arc<ResultStore>) {
        let config = Config {
            decision_plugins: vec![DecisionDescriptor {
                id:     "d".into(),
                plugin: decision_plugin.into(),
                params: Default::default(),
            }],
            ..Config::default()
        };
        let registry = PluginRegistry::load(&config, &Catalog::builtin());
        let store = Arc::new(ResultStore::new());
        (DecisionGate::new(registry, Arc::clone(&store)), store)
    }

    fn waf(score: &str, threshold: &str) -> WafContext {
        [("anomalyscore".to_string(), score.to_string()),
         ("inboundthreshold".to_string(), threshold.to_string())].into_iter().collect()
    }

    #[tokio::test]
    async fn blocks_and_purges() {
        let (g, store) = gate("simple");
        store.record("t", "a", 0.9, 1.0, 0.5);
        assert!(g.decide("t", "d", waf("50", "10")).await.unwrap());
        assert!(store.snapshot("t").is_empty());
        assert_eq!(store.total_cleared.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn purges_on_analyzer_error() {
        let (g, store) = gate("failing");
        store.record("t", "a", 0.9, 1.0, 0.5);
        assert!(matches!(g.decide("t", "d", WafContext::new()).await, Err(InvokeError::Invocation(_))));
        assert!(store.snapshot("t").is_empty());
        assert_eq!(store.total_cleared.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn purges_on_unknown_decision() {
        let (g, store) = gate("simple");
        store.record("t", "a", 0.9, 1.0, 0.5);
        assert!(matches!(g.decide("t", "nope", WafContext::new()).await, Err(InvokeError::NotFound { .. })));
        assert!(store.snapshot("t").is_empty());
    }

    #[tokio::test]
    async fn empty_snapshot_still_decides() {
        let (g, _) = gate("simple");
        assert!(!g.decide("t", "d", waf("50", "10")).await.unwrap());
    }
}
