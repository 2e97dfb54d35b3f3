// arbiter/src/state/results.rs
//
// ResultStore: per-transaction, per-model analysis results.
// DashMap = sharded concurrent HashMap; each transaction's bucket is written
// under its shard lock, so a snapshot never sees a half-written entry and
// unrelated transactions rarely contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::events::{ModelResult, ResultSnapshot};

pub struct ResultStore {
    txs: DashMap<String, HashMap<String, ModelResult>>,

    pub total_recorded: AtomicU64,
    pub total_cleared:  AtomicU64,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            txs:            DashMap::new(),
            total_recorded: AtomicU64::new(0),
            total_cleared:  AtomicU64::new(0),
        }
    }

    /// Upsert one model's result. Last writer wins for the same pair.
    pub fn record(&self, transaction_id: &str, model_id: &str, probability: f64, weight: f64, threshold: f64) {
        self.txs
            .entry(transaction_id.to_string())
            .or_default()
            .insert(model_id.to_string(), ModelResult { probability, weight, threshold });
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        debug!(tx = transaction_id, model_id, probability, "result recorded");
    }

    /// Independent copy of the transaction's results; empty if none.
    pub fn snapshot(&self, transaction_id: &str) -> ResultSnapshot {
        self.txs.get(transaction_id).map(|e| e.value().clone()).unwrap_or_default()
    }

    /// Drop every result for the transaction. Returns how many were removed.
    pub fn clear(&self, transaction_id: &str) -> usize {
        self.total_cleared.fetch_add(1, Ordering::Relaxed);
        self.txs.remove(transaction_id).map(|(_, m)| m.len()).unwrap_or(0)
    }

    /// Transactions currently holding at least one result.
    pub fn n_transactions(&self) -> usize {
        self.txs.len()
    }
}

impl Default for ResultStore { fn default() -> Self { Self::new() } }

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn record_then_snapshot() {
        let s = ResultStore::new();
        s.record("t1", "a", 0.9, 1.0, 0.5);
        s.record("t1", "b", 0.1, 2.0, 0.3);
        s.record("t2", "a", 0.4, 1.0, 0.5);

        let snap = s.snapshot("t1");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap["b"], ModelResult { probability: 0.1, weight: 2.0, threshold: 0.3 });
        assert_eq!(s.snapshot("t2").len(), 1);
        assert!(s.snapshot("t3").is_empty());
    }

    #[test]
    fn second_record_overwrites() {
        let s = ResultStore::new();
        s.record("t", "a", 0.2, 1.0, 0.5);
        s.record("t", "a", 0.7, 1.0, 0.5);
        let snap = s.snapshot("t");
        assert_eq!(snap.len(), 1);
        assert_eq!(snap["a"].probability, 0.7);
    }

    #[test]
    fn snapshot_is_independent_copy() {
        let s = ResultStore::new();
        s.record("t", "a", 0.2, 1.0, 0.5);
        let snap = s.snapshot("t");
        s.record("t", "b", 0.3, 1.0, 0.5);
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn clear_removes_only_that_transaction() {
        let s = ResultStore::new();
        s.record("t1", "a", 0.2, 1.0, 0.5);
        s.record("t2", "a", 0.2, 1.0, 0.5);
        assert_eq!(s.clear("t1"), 1);
        assert_eq!(s.clear("t1"), 0);
        assert!(s.snapshot("t1").is_empty());
        assert_eq!(s.snapshot("t2").len(), 1);
        assert_eq!(s.n_transactions(), 1);
    }

    #[test]
    fn concurrent_writers_keep_every_entry() {
        let s = Arc::new(ResultStore::new());
        let handles: Vec<_> = (0..8).map(|t| {
            let s = Arc::clone(&s);
            std::thread::spawn(move || {
                for m in 0..100 {
                    s.record(&format!("tx{}", t % 2), &format!("m{}_{}", t, m), 0.5, 1.0, 0.5);
                }
            })
        }).collect();
        for h in handles { h.join().unwrap(); }
        assert_eq!(s.snapshot("tx0").len(), 400);
        assert_eq!(s.snapshot("tx1").len(), 400);
        assert_eq!(s.total_recorded.load(Ordering::Relaxed), 800);
    }
}
