// arbiter/src/analyzers/mod.rs
//
// Analyzer contract + catalog of statically linked implementations.
//
// A descriptor's `plugin` key selects a factory from the catalog; the
// registry builds one fresh instance per descriptor and initializes it with
// that descriptor's params, so the same implementation can back several
// model ids with different settings.
//
// Analyzer calls are synchronous and may block. The coordinator runs them on
// the blocking pool.

pub mod delayed;
pub mod faulty;
pub mod keyword;
pub mod simple;
pub mod trivial;
pub mod weighted_sum;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::events::{DecisionInput, EntryPoints};

pub type Params = HashMap<String, String>;

/// Produces an attack probability for the payload fragments it is declared
/// capable of handling.
pub trait ModelAnalyzer: Send + Sync {
    fn init(&mut self, _params: &Params) -> Result<()> { Ok(()) }

    /// Which of the two process entry points this analyzer implements.
    fn entry_points(&self) -> EntryPoints;

    fn process_request(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        bail!("process_request not implemented")
    }

    fn process_response(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        bail!("process_response not implemented")
    }
}

/// Turns model results plus WAF signals into a block/allow verdict.
pub trait DecisionAnalyzer: Send + Sync {
    fn init(&mut self, _params: &Params) -> Result<()> { Ok(()) }

    fn check_results(&self, input: &DecisionInput) -> Result<bool>;
}

pub type ModelFactory    = Arc<dyn Fn() -> Box<dyn ModelAnalyzer> + Send + Sync>;
pub type DecisionFactory = Arc<dyn Fn() -> Box<dyn DecisionAnalyzer> + Send + Sync>;

/// Name → factory table consulted by the registry at load time.
#[derive(Clone, Default)]
pub struct Catalog {
    models:    HashMap<String, ModelFactory>,
    decisions: HashMap<String, DecisionFactory>,
}

impl Catalog {
    pub fn empty() -> Self { Self::default() }

    /// Catalog with every built-in analyzer registered.
    pub fn builtin() -> Self {
        let mut c = Self::empty();
        c.register_model("trivial",      || Box::new(trivial::Trivial::default()));
        c.register_model("keyword",      || Box::new(keyword::Keyword::default()));
        c.register_model("delayed",      || Box::new(delayed::Delayed::default()));
        c.register_model("failing",      || Box::new(faulty::FailingModel));
        c.register_model("failing_init", || Box::new(faulty::FailingInit));
        c.register_model("request_only", || Box::new(faulty::RequestOnly));

        c.register_decision("simple",       || Box::new(simple::Simple));
        c.register_decision("weighted_sum", || Box::new(weighted_sum::WeightedSum::default()));
        c.register_decision("failing",      || Box::new(faulty::FailingDecision));
        c
    }

    pub fn register_model<F>(&mut self, key: &str, factory: F)
    where
        F: Fn() -> Box<dyn ModelAnalyzer> + Send + Sync + 'static,
    {
        self.models.insert(key.to_string(), Arc::new(factory));
    }

    pub fn register_decision<F>(&mut self, key: &str, factory: F)
    where
        F: Fn() -> Box<dyn DecisionAnalyzer> + Send + Sync + 'static,
    {
        self.decisions.insert(key.to_string(), Arc::new(factory));
    }

    pub fn model(&self, key: &str) -> Option<Box<dyn ModelAnalyzer>> {
        self.models.get(key).map(|f| f())
    }

    pub fn decision(&self, key: &str) -> Option<Box<dyn DecisionAnalyzer>> {
        self.decisions.get(key).map(|f| f())
    }
}

/// Float param with a default when absent; present-but-garbage is an error.
pub(crate) fn float_param(params: &Params, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None    => Ok(default),
        Some(v) => v.trim().parse::<f64>()
            .map_err(|e| anyhow::anyhow!("error parsing {} parameter: {}", key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_resolves_known_keys() {
        let c = Catalog::builtin();
        assert!(c.model("trivial").is_some());
        assert!(c.model("keyword").is_some());
        assert!(c.decision("simple").is_some());
        assert!(c.decision("weighted_sum").is_some());
        assert!(c.model("roberta").is_none());
        assert!(c.decision("trivial").is_none());
    }

    #[test]
    fn float_param_defaults_and_rejects_garbage() {
        let mut p = Params::new();
        assert_eq!(float_param(&p, "x", 0.5).unwrap(), 0.5);
        p.insert("x".into(), "0.25".into());
        assert_eq!(float_param(&p, "x", 0.5).unwrap(), 0.25);
        p.insert("x".into(), "lots".into());
        assert!(float_param(&p, "x", 0.5).is_err());
    }
}
