// arbiter/src/analyzers/weighted_sum.rs
//
// Weighted blend of model probabilities and the WAF anomaly ratio.
//
//   waf_term = waf_weight                                if blocking >= threshold
//            = (blocking / inbound_threshold) * waf_weight  otherwise
//   blended  = (Σ p_i·w_i + waf_term) / (Σ w_i + waf_weight)
//   block    = blended > threshold
//
// Params: waf_weight (required), threshold (default 0.5).
// WAF keys: inbound_blocking, inbound_threshold (both required).

use anyhow::{anyhow, bail, Result};
use tracing::debug;

use super::{float_param, DecisionAnalyzer, Params};
use crate::events::DecisionInput;

#[derive(Debug, Default)]
pub struct WeightedSum {
    waf_weight: f64,
    threshold:  f64,
}

impl DecisionAnalyzer for WeightedSum {
    fn init(&mut self, params: &Params) -> Result<()> {
        if !params.contains_key("waf_weight") {
            bail!("waf_weight parameter not found");
        }
        self.waf_weight = float_param(params, "waf_weight", 0.0)?;
        self.threshold  = float_param(params, "threshold", 0.5)?;
        Ok(())
    }

    fn check_results(&self, input: &DecisionInput) -> Result<bool> {
        let mut weighted = 0.0f64;
        let mut weights  = 0.0f64;
        for (model_id, p) in &input.probability {
            let w = input.weight.get(model_id).copied().unwrap_or(0.0);
            weighted += p * w;
            weights  += w;
        }

        let score = input.waf_number("inbound_blocking")
            .ok_or_else(|| anyhow!("inbound_blocking parameter not found"))?;
        let inbound = input.waf_number("inbound_threshold")
            .ok_or_else(|| anyhow!("inbound_threshold parameter not found"))?;

        if score >= inbound || inbound <= 0.0 {
            weighted += self.waf_weight;
        } else {
            weighted += (score / inbound) * self.waf_weight;
        }
        weights += self.waf_weight;

        if weights <= 0.0 {
            bail!("no weight to blend");
        }
        let blended = weighted / weights;
        debug!(tx = %input.transaction_id, blended, threshold = self.threshold, "weighted_sum | blended");
        Ok(blended > self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ModelResult, ResultSnapshot, WafContext};

    fn analyzer(waf_weight: &str) -> WeightedSum {
        let mut a = WeightedSum::default();
        a.init(&[("waf_weight".to_string(), waf_weight.to_string())].into_iter().collect()).unwrap();
        a
    }

    fn input(p: f64, waf: &[(&str, &str)]) -> DecisionInput {
        let mut snap = ResultSnapshot::new();
        snap.insert("m".into(), ModelResult { probability: p, weight: 1.0, threshold: 0.5 });
        let waf: WafContext = waf.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        DecisionInput::from_snapshot("tx", &snap, waf)
    }

    #[test]
    fn blends_model_and_waf() {
        let a = analyzer("1");
        // (0.8 + 1.0) / 2 = 0.9
        assert!(a.check_results(&input(0.8, &[("inbound_blocking", "20"), ("inbound_threshold", "5")])).unwrap());
        // (0.0 + 0.2) / 2 = 0.1
        assert!(!a.check_results(&input(0.0, &[("inbound_blocking", "1"), ("inbound_threshold", "5")])).unwrap());
    }

    #[test]
    fn missing_waf_keys_error() {
        let a = analyzer("1");
        assert!(a.check_results(&input(0.8, &[("inbound_blocking", "20")])).is_err());
        assert!(a.check_results(&input(0.8, &[("anomalyscore", "20"), ("inboundthreshold", "5")])).is_err());
    }

    #[test]
    fn init_requires_waf_weight() {
        assert!(WeightedSum::default().init(&Params::new()).is_err());
    }
}
