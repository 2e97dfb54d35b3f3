// arbiter/src/analyzers/simple.rs
//
// Majority-style decision. A model "detects" when its probability reaches
// its threshold; the mean weight of the detecting models must exceed 0.5
// AND the WAF anomaly score must reach the inbound threshold for a block.
//
// WAF keys: anomalyscore, inboundthreshold. Missing or unparsable values
// read as 0. An empty WAF context never blocks.

use anyhow::Result;
use tracing::debug;

use super::DecisionAnalyzer;
use crate::events::DecisionInput;

const MODEL_QUORUM: f64 = 0.5;

pub struct Simple;

impl DecisionAnalyzer for Simple {
    fn check_results(&self, input: &DecisionInput) -> Result<bool> {
        let mut detections = 0usize;
        let mut detect_w   = 0.0f64;

        for (model_id, p) in &input.probability {
            let thres = input.threshold.get(model_id).copied().unwrap_or(f64::INFINITY);
            debug!(tx = %input.transaction_id, model_id = %model_id, p, thres, "simple | model result");
            if *p >= thres {
                detections += 1;
                detect_w += input.weight.get(model_id).copied().unwrap_or(0.0);
            }
        }

        let model_score = if detections > 0 { detect_w / detections as f64 } else { 0.0 };

        if input.waf.is_empty() {
            return Ok(false);
        }
        let score     = input.waf_number("anomalyscore").unwrap_or(0.0);
        let threshold = input.waf_number("inboundthreshold").unwrap_or(0.0);
        debug!(tx = %input.transaction_id, score, threshold, model_score, "simple | waf signals");

        Ok(score >= threshold && model_score > MODEL_QUORUM)
    }
}
