// arbiter/src/analyzers/keyword.rs
//
// Keyword model: Aho-Corasick automaton over a configured pattern list.
// O(n) per payload regardless of pattern count. Case-insensitive.
//
// Params:
//   patterns    comma-separated literal patterns (required, non-empty)
//   saturation  distinct matches that map to probability 1.0 (default 3)
//
// probability = min(distinct_matched / saturation, 1.0)

use std::collections::HashSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use anyhow::{anyhow, ensure, Result};
use tracing::debug;

use super::{float_param, ModelAnalyzer, Params};
use crate::events::EntryPoints;

#[derive(Default)]
pub struct Keyword {
    automaton:  Option<AhoCorasick>,
    saturation: f64,
}

impl Keyword {
    fn score(&self, transaction_id: &str, payload: &str) -> Result<f64> {
        let ac = self.automaton.as_ref().ok_or_else(|| anyhow!("keyword model not initialized"))?;
        let hits: HashSet<usize> = ac.find_iter(payload).map(|m| m.pattern().as_usize()).collect();
        let p = (hits.len() as f64 / self.saturation).min(1.0);
        debug!(tx = transaction_id, hits = hits.len(), p, "keyword | scored");
        Ok((p * 10000.0).round() / 10000.0)
    }
}

impl ModelAnalyzer for Keyword {
    fn init(&mut self, params: &Params) -> Result<()> {
        let patterns: Vec<String> = params.get("patterns")
            .map(|s| s.split(',').map(|p| p.trim().to_lowercase()).filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        ensure!(!patterns.is_empty(), "patterns parameter not found");

        self.saturation = float_param(params, "saturation", 3.0)?;
        ensure!(self.saturation >= 1.0, "saturation must be at least 1");

        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)?;
        self.automaton = Some(ac);
        Ok(())
    }

    fn entry_points(&self) -> EntryPoints { EntryPoints::BOTH }

    fn process_request(&self, transaction_id: &str, payload: &str) -> Result<f64> {
        self.score(transaction_id, payload)
    }

    fn process_response(&self, transaction_id: &str, payload: &str) -> Result<f64> {
        self.score(transaction_id, payload)
    }
}
