// arbiter/src/analyzers/faulty.rs
//
// Misbehaving analyzers. Registered in the built-in catalog so a deployment
// can exercise the failure paths end to end:
//   failing       every invocation returns an error
//   failing_init  init always fails, so the slot never loads
//   request_only  exports only the request entry point
//   failing (decision) every check returns an error

use anyhow::{bail, Result};

use super::{DecisionAnalyzer, ModelAnalyzer, Params};
use crate::events::{DecisionInput, EntryPoints};

pub struct FailingModel;

impl ModelAnalyzer for FailingModel {
    fn entry_points(&self) -> EntryPoints { EntryPoints::BOTH }

    fn process_request(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        bail!("error processing request")
    }

    fn process_response(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        bail!("error processing response")
    }
}

pub struct FailingInit;

impl ModelAnalyzer for FailingInit {
    fn init(&mut self, _params: &Params) -> Result<()> {
        bail!("error initializing plugin")
    }

    fn entry_points(&self) -> EntryPoints { EntryPoints::BOTH }
}

pub struct RequestOnly;

impl ModelAnalyzer for RequestOnly {
    fn entry_points(&self) -> EntryPoints { EntryPoints { request: true, response: false } }

    fn process_request(&self, _transaction_id: &str, _payload: &str) -> Result<f64> {
        Ok(0.0)
    }
}

pub struct FailingDecision;

impl DecisionAnalyzer for FailingDecision {
    fn check_results(&self, _input: &DecisionInput) -> Result<bool> {
        bail!("error checking results")
    }
}
