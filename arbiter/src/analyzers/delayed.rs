// arbiter/src/analyzers/delayed.rs
//
// Slow model: blocks for `delay_ms` (default 1000) then returns
// `probability` (default 0.0). Stands in for analyzers that call out to a
// remote inference service.

use std::time::Duration;

use anyhow::Result;

use super::{float_param, ModelAnalyzer, Params};
use crate::events::EntryPoints;

#[derive(Debug, Default)]
pub struct Delayed {
    delay:       Duration,
    probability: f64,
}

impl ModelAnalyzer for Delayed {
    fn init(&mut self, params: &Params) -> Result<()> {
        let ms = float_param(params, "delay_ms", 1000.0)?.max(0.0);
        self.delay       = Duration::from_millis(ms as u64);
        self.probability = float_param(params, "probability", 0.0)?;
        Ok(())
    }

    fn entry_points(&self) -> EntryPoints { EntryPoints::BOTH }

    fn process_request(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        std::thread::sleep(self.delay);
        Ok(self.probability)
    }

    fn process_response(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        std::thread::sleep(self.delay);
        Ok(self.probability)
    }
}
