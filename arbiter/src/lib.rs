// arbiter/src/lib.rs
//
// Arbiter: decision engine between a WAF and pluggable attack-detection
// analyzers. The WAF streams transaction phases in; each phase is fanned
// out to model analyzers concurrently; a check waits for them, then a
// decision analyzer combines their probabilities with native WAF signals.
//
//   wire_api ──▶ engine::coordinator ──▶ engine::registry ──▶ analyzers
//                      │                        ▲
//                      ▼                        │
//                state::barrier          engine::gate ◀── state::results

pub mod analyzers;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod state;
pub mod trace;
pub mod wire_api;

use std::sync::Arc;

use analyzers::Catalog;
use config::Config;
use engine::coordinator::Coordinator;
use engine::registry::PluginRegistry;
use state::results::ResultStore;

/// Build the registry, result store and coordinator for a validated config.
pub fn build(config: &Config, catalog: &Catalog) -> Arc<Coordinator> {
    let registry = PluginRegistry::load(config, catalog);
    Coordinator::new(registry, Arc::new(ResultStore::new()))
}
