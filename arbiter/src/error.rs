// arbiter/src/error.rs
//
// Error taxonomy. Analyzer-level failures stay local to their slot or
// transaction; only ConfigError is fatal, and only at startup.

use thiserror::Error;

use crate::events::{Phase, Scope};

/// Why an analyzer could not be loaded. Logged, then the slot stays empty.
#[derive(Debug, Error)]
pub enum PluginLoadError {
    #[error("plugin module '{0}' not found in catalog")]
    ModuleNotFound(String),

    #[error("missing entry point {entry} required by scope {scope}")]
    MissingEntryPoint { entry: &'static str, scope: Scope },

    #[error("init failed: {0}")]
    Init(String),
}

/// Failure of a single model or decision invocation.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("{kind} plugin '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("plugin scope {scope} cannot process {phase}")]
    CapabilityMismatch { scope: Scope, phase: Phase },

    #[error("invocation failed: {0}")]
    Invocation(String),
}

impl InvokeError {
    pub fn model_not_found(id: &str) -> Self {
        Self::NotFound { kind: "model", id: id.to_string() }
    }

    pub fn decision_not_found(id: &str) -> Self {
        Self::NotFound { kind: "decision", id: id.to_string() }
    }
}

/// Transaction-level failures surfaced by dispatch and check.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("transaction with id {0} does not exist")]
    TransactionNotFound(String),

    #[error("transaction {0} is already being decided")]
    TransactionBusy(String),

    #[error("transaction {0} was abandoned before its verdict")]
    Abandoned(String),

    #[error("transaction {0} timed out waiting for its models")]
    Timeout(String),

    #[error("decision failed: {0}")]
    Decision(#[from] InvokeError),
}

/// Startup configuration problems. Fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
