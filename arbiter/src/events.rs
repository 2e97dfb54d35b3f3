// arbiter/src/events.rs
//
// Shared domain types flowing through Arbiter: transaction phases, analyzer
// capability scopes, per-model results and the decision input handed to
// decision analyzers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Native WAF signals passed through to the decision analyzer untouched
/// (anomaly score, inbound threshold, ...).
pub type WafContext = HashMap<String, String>;

// ── Phases and scopes ─────────────────────────────────────────────────────────

/// The part of a transaction a dispatch call carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    RequestHeaders,
    RequestBody,
    AllRequest,
    ResponseHeaders,
    ResponseBody,
    AllResponse,
}

impl Phase {
    pub fn is_request(self) -> bool {
        matches!(self, Self::RequestHeaders | Self::RequestBody | Self::AllRequest)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RequestHeaders  => "RequestHeaders",
            Self::RequestBody     => "RequestBody",
            Self::AllRequest      => "AllRequest",
            Self::ResponseHeaders => "ResponseHeaders",
            Self::ResponseBody    => "ResponseBody",
            Self::AllResponse     => "AllResponse",
        };
        write!(f, "{}", s)
    }
}

/// Capability scope a model analyzer is declared with in the config.
/// Deserializes from the same PascalCase names the WAF side uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    RequestHeaders,
    RequestBody,
    AllRequest,
    ResponseHeaders,
    ResponseBody,
    AllResponse,
    Everything,
}

impl Scope {
    /// A model only runs against exactly its declared phase, unless it is
    /// declared for everything.
    pub fn accepts(self, phase: Phase) -> bool {
        match self {
            Self::Everything      => true,
            Self::RequestHeaders  => phase == Phase::RequestHeaders,
            Self::RequestBody     => phase == Phase::RequestBody,
            Self::AllRequest      => phase == Phase::AllRequest,
            Self::ResponseHeaders => phase == Phase::ResponseHeaders,
            Self::ResponseBody    => phase == Phase::ResponseBody,
            Self::AllResponse     => phase == Phase::AllResponse,
        }
    }

    /// Entry points an analyzer must export to be loaded under this scope.
    pub fn required_entry_points(self) -> EntryPoints {
        match self {
            Self::RequestHeaders | Self::RequestBody | Self::AllRequest => {
                EntryPoints { request: true, response: false }
            }
            Self::ResponseHeaders | Self::ResponseBody | Self::AllResponse => {
                EntryPoints { request: false, response: true }
            }
            Self::Everything => EntryPoints { request: true, response: true },
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestHeaders  => write!(f, "RequestHeaders"),
            Self::RequestBody     => write!(f, "RequestBody"),
            Self::AllRequest      => write!(f, "AllRequest"),
            Self::ResponseHeaders => write!(f, "ResponseHeaders"),
            Self::ResponseBody    => write!(f, "ResponseBody"),
            Self::AllResponse     => write!(f, "AllResponse"),
            Self::Everything      => write!(f, "Everything"),
        }
    }
}

/// Which analysis entry points a model analyzer actually implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryPoints {
    pub request:  bool,
    pub response: bool,
}

impl EntryPoints {
    pub const BOTH: Self = Self { request: true, response: true };

    /// Names of the entry points in `required` that `self` lacks.
    pub fn missing(self, required: EntryPoints) -> Vec<&'static str> {
        let mut out = Vec::new();
        if required.request && !self.request { out.push("process_request"); }
        if required.response && !self.response { out.push("process_response"); }
        out
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// One model's contribution to a transaction. Weight and threshold are
/// copied from the model descriptor when the result is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub probability: f64,
    pub weight:      f64,
    pub threshold:   f64,
}

/// Point-in-time copy of every model result recorded for a transaction.
pub type ResultSnapshot = HashMap<String, ModelResult>;

/// Everything a decision analyzer sees for one transaction.
#[derive(Debug, Clone, Default)]
pub struct DecisionInput {
    pub transaction_id: String,
    pub probability:    HashMap<String, f64>,
    pub weight:         HashMap<String, f64>,
    pub threshold:      HashMap<String, f64>,
    pub waf:            WafContext,
}

impl DecisionInput {
    pub fn from_snapshot(transaction_id: &str, snapshot: &ResultSnapshot, waf: WafContext) -> Self {
        let mut input = Self {
            transaction_id: transaction_id.to_string(),
            waf,
            ..Default::default()
        };
        for (model_id, r) in snapshot {
            input.probability.insert(model_id.clone(), r.probability);
            input.weight.insert(model_id.clone(), r.weight);
            input.threshold.insert(model_id.clone(), r.threshold);
        }
        input
    }

    /// Integer-or-float WAF field, None when absent or unparsable.
    pub fn waf_number(&self, key: &str) -> Option<f64> {
        self.waf.get(key).and_then(|v| v.trim().parse::<f64>().ok())
    }
}
