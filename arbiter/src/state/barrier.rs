// arbiter/src/state/barrier.rs
//
// Per-transaction completion barrier.
//
// Outstanding count lives in a tokio watch channel so a check can park until
// it reaches zero; the lifecycle phase sits behind a parking_lot mutex.
//
//   Dispatching ──check──▶ AwaitingCompletion ──count==0──▶ Deciding ──▶ Closed
//        └──────────────── abandon ──────────────────────────────────────┘
//
// Lock order: the coordinator's barrier-map shard lock may be held while
// taking the phase lock, never the other way round.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::error::CheckError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Dispatching,
    AwaitingCompletion,
    Deciding,
    Closed,
}

pub struct TransactionBarrier {
    phase:       Mutex<TxPhase>,
    outstanding: watch::Sender<usize>,
    opened_at:   DateTime<Utc>,
}

impl TransactionBarrier {
    pub fn new() -> Self {
        let (outstanding, _) = watch::channel(0usize);
        Self {
            phase: Mutex::new(TxPhase::Dispatching),
            outstanding,
            opened_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> TxPhase { *self.phase.lock() }

    pub fn outstanding(&self) -> usize { *self.outstanding.borrow() }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.opened_at).to_std().unwrap_or_default()
    }

    /// Register `n` more invocations. Refused once the verdict is underway.
    pub fn add(&self, transaction_id: &str, n: usize) -> Result<(), CheckError> {
        let phase = self.phase.lock();
        match *phase {
            TxPhase::Deciding => return Err(CheckError::TransactionBusy(transaction_id.to_string())),
            TxPhase::Closed   => return Err(CheckError::Abandoned(transaction_id.to_string())),
            _ => {}
        }
        self.outstanding.send_modify(|c| *c += n);
        Ok(())
    }

    /// One invocation finished, successfully or not. Returns what is left.
    pub fn complete(&self) -> usize {
        let mut left = 0;
        let mut underflow = false;
        self.outstanding.send_modify(|c| {
            if *c == 0 { underflow = true; } else { *c -= 1; }
            left = *c;
        });
        if underflow && self.phase() != TxPhase::Closed {
            warn!("barrier completion with nothing outstanding");
        }
        left
    }

    /// Run `f` under the phase lock unless the barrier has been closed.
    /// Recording through here means an abandoned transaction never gains
    /// results after it was purged.
    pub fn while_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let phase = self.phase.lock();
        if *phase == TxPhase::Closed { return None; }
        Some(f())
    }

    /// Mark that a check is now waiting on this barrier. Only one check may
    /// wait at a time.
    pub fn begin_wait(&self, transaction_id: &str) -> Result<(), CheckError> {
        let mut phase = self.phase.lock();
        match *phase {
            TxPhase::Dispatching => { *phase = TxPhase::AwaitingCompletion; Ok(()) }
            TxPhase::AwaitingCompletion | TxPhase::Deciding => {
                Err(CheckError::TransactionBusy(transaction_id.to_string()))
            }
            TxPhase::Closed => Err(CheckError::Abandoned(transaction_id.to_string())),
        }
    }

    /// The waiting check went away before deciding; let another one in.
    pub fn end_wait(&self) {
        let mut phase = self.phase.lock();
        if *phase == TxPhase::AwaitingCompletion {
            *phase = TxPhase::Dispatching;
        }
    }

    /// Park until the outstanding count reads zero (or the barrier closes).
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this only returns Ok.
        let _ = rx.wait_for(|c| *c == 0).await;
    }

    /// Flip to Deciding if nothing is outstanding. Ok(false) means more work
    /// was added since the last wait and the caller should wait again.
    pub fn try_begin_decide(&self, transaction_id: &str) -> Result<bool, CheckError> {
        let mut phase = self.phase.lock();
        match *phase {
            TxPhase::Deciding => Err(CheckError::TransactionBusy(transaction_id.to_string())),
            TxPhase::Closed   => Err(CheckError::Abandoned(transaction_id.to_string())),
            _ if self.outstanding() == 0 => { *phase = TxPhase::Deciding; Ok(true) }
            _ => Ok(false),
        }
    }

    /// Close unless a verdict is being computed. Wakes any parked check.
    pub fn close_unless_deciding(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == TxPhase::Deciding { return false; }
        *phase = TxPhase::Closed;
        self.outstanding.send_replace(0);
        true
    }

    /// Final transition after the verdict.
    pub fn close(&self) {
        *self.phase.lock() = TxPhase::Closed;
    }
}

impl Default for TransactionBarrier { fn default() -> Self { Self::new() } }
