// arbiter/src/trace.rs
//
// Per-transaction log capture.
//
// TxTraceLayer sits next to the fmt layer and copies every event that
// carries a `tx` field into that transaction's buffer. The wire API takes
// the buffer when it answers `check`, so the WAF gets the analyzer trail
// along with the verdict. Only events that pass the global filter are
// captured.
//
// A transaction that is never checked or closed never takes its buffer;
// buffers are capped and pruned by age.

use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

pub const MAX_LINES_PER_TX: usize = 256;

struct Buffer {
    opened: Instant,
    lines:  Vec<String>,
}

#[derive(Default)]
pub struct TxTrace {
    buffers: DashMap<String, Buffer>,
}

impl TxTrace {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn layer(self: &Arc<Self>) -> TxTraceLayer {
        TxTraceLayer { trace: Arc::clone(self) }
    }

    pub fn push(&self, transaction_id: &str, line: String) {
        let mut buf = self.buffers
            .entry(transaction_id.to_string())
            .or_insert_with(|| Buffer { opened: Instant::now(), lines: Vec::new() });
        if buf.lines.len() < MAX_LINES_PER_TX {
            buf.lines.push(line);
        }
    }

    /// Remove the transaction's buffer and return it, one event per line.
    pub fn take(&self, transaction_id: &str) -> String {
        self.buffers.remove(transaction_id)
            .map(|(_, b)| b.lines.join("\n"))
            .unwrap_or_default()
    }

    pub fn discard(&self, transaction_id: &str) {
        self.buffers.remove(transaction_id);
    }

    pub fn n_transactions(&self) -> usize { self.buffers.len() }

    /// Drop buffers opened more than `max_age` ago.
    pub fn prune(&self, max_age: Duration) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|_, b| b.opened.elapsed() < max_age);
        before.saturating_sub(self.buffers.len())
    }

    pub async fn housekeeping_loop(self: Arc<Self>, max_age: Duration) {
        let every = (max_age / 4).max(Duration::from_secs(1));
        loop {
            tokio::time::sleep(every).await;
            self.prune(max_age);
        }
    }
}

// ── Layer ─────────────────────────────────────────────────────────────────────

pub struct TxTraceLayer {
    trace: Arc<TxTrace>,
}

impl<S: Subscriber> Layer<S> for TxTraceLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        let Some(ref tx) = line.tx else { return };

        let meta = event.metadata();
        let mut out = format!("{} {}: {}", meta.level(), meta.target(), line.message);
        if !line.fields.is_empty() {
            out.push(' ');
            out.push_str(&line.fields);
        }
        self.trace.push(tx, out);
    }
}

#[derive(Default)]
struct LineVisitor {
    tx:      Option<String>,
    message: String,
    fields:  String,
}

impl LineVisitor {
    fn append(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        if field.name() == "message" {
            let _ = self.message.write_fmt(value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={}", field.name(), value);
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "tx" {
            self.tx = Some(value.to_string());
        } else {
            self.append(field, format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "tx" {
            self.tx = Some(format!("{:?}", value));
        } else {
            self.append(field, format_args!("{:?}", value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info};
    use tracing_subscriber::prelude::*;

    #[test]
    fn captures_only_events_tagged_with_a_transaction() {
        let trace = TxTrace::new();
        let subscriber = tracing_subscriber::registry().with(trace.layer());
        tracing::subscriber::with_default(subscriber, || {
            info!(tx = "t1", model_id = "sqli", p = 0.9, "model success");
            let id = String::from("t1");
            debug!(tx = %id, block = true, "transaction checked");
            info!(tx = "t2", "other transaction");
            info!("no transaction");
        });

        let t1 = trace.take("t1");
        let lines: Vec<&str> = t1.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("INFO"));
        assert!(lines[0].contains("model success model_id=sqli p=0.9"));
        assert!(lines[1].contains("transaction checked block=true"));

        assert_eq!(trace.take("t1"), "");
        assert_eq!(trace.n_transactions(), 1);
    }

    #[test]
    fn buffers_are_capped_and_pruned() {
        let trace = TxTrace::new();
        for i in 0..MAX_LINES_PER_TX + 10 {
            trace.push("t", format!("line {}", i));
        }
        assert_eq!(trace.take("t").lines().count(), MAX_LINES_PER_TX);

        trace.push("old", "x".into());
        std::thread::sleep(Duration::from_millis(20));
        trace.push("new", "y".into());
        assert_eq!(trace.prune(Duration::from_millis(10)), 1);
        assert_eq!(trace.take("new"), "y");
    }
}
