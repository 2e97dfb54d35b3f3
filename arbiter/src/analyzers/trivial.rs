// arbiter/src/analyzers/trivial.rs
//
// Constant-probability model. Returns `probability` (default 0.0) for every
// request and response fragment. Useful as a baseline and in smoke tests.

use anyhow::{ensure, Result};
use tracing::debug;

use super::{float_param, ModelAnalyzer, Params};
use crate::events::EntryPoints;

#[derive(Debug, Default)]
pub struct Trivial {
    probability: f64,
}

impl ModelAnalyzer for Trivial {
    fn init(&mut self, params: &Params) -> Result<()> {
        self.probability = float_param(params, "probability", 0.0)?;
        ensure!((0.0..=1.0).contains(&self.probability),
                "probability {} outside [0, 1]", self.probability);
        Ok(())
    }

    fn entry_points(&self) -> EntryPoints { EntryPoints::BOTH }

    fn process_request(&self, transaction_id: &str, payload: &str) -> Result<f64> {
        debug!(tx = transaction_id, len = payload.len(), "trivial | request");
        Ok(self.probability)
    }

    fn process_response(&self, transaction_id: &str, payload: &str) -> Result<f64> {
        debug!(tx = transaction_id, len = payload.len(), "trivial | response");
        Ok(self.probability)
    }
}
