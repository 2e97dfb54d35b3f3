// arbiter/src/config.rs
//
// ConfigStore: YAML configuration, parsed and validated once at startup.
// Everything that can be caught here is fatal; unknown catalog keys are not,
// they surface later as plugin load failures.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::events::Scope;

fn default_address() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 50051 }
fn default_level() -> String { "info".into() }
fn default_ttl() -> u64 { 300 }
fn default_weight() -> f64 { 1.0 }
fn default_threshold() -> f64 { 0.5 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id:          String,
    /// Catalog key of the analyzer implementation.
    pub plugin:      String,
    #[serde(default = "default_weight")]
    pub weight:      f64,
    #[serde(default = "default_threshold")]
    pub threshold:   f64,
    pub plugin_type: Scope,
    #[serde(default)]
    pub params:      HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDescriptor {
    pub id:     String,
    pub plugin: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_path:             Option<PathBuf>,
    #[serde(default = "default_level")]
    pub log_level:            String,
    #[serde(default = "default_address")]
    pub listen_address:       String,
    #[serde(default = "default_port")]
    pub listen_port:          u16,
    #[serde(default)]
    pub check_timeout_ms:     Option<u64>,
    #[serde(default = "default_ttl")]
    pub transaction_ttl_secs: u64,
    #[serde(default)]
    pub model_plugins:        Vec<ModelDescriptor>,
    #[serde(default)]
    pub decision_plugins:     Vec<DecisionDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path:             None,
            log_level:            default_level(),
            listen_address:       default_address(),
            listen_port:          default_port(),
            check_timeout_ms:     None,
            transaction_ttl_secs: default_ttl(),
            model_plugins:        Vec::new(),
            decision_plugins:     Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref p) = self.log_path {
            check_writable(p)
                .map_err(|e| ConfigError::Invalid(format!("log path {}: {}", p.display(), e)))?;
        }

        self.log_level.parse::<tracing::Level>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))?;

        if self.listen_port == 0 {
            return Err(ConfigError::Invalid("listen port should be between 1 and 65535".into()));
        }

        let mut seen = HashSet::new();
        for m in &self.model_plugins {
            if m.id.is_empty() {
                return Err(ConfigError::Invalid("model plugin with empty id".into()));
            }
            if m.plugin.is_empty() {
                return Err(ConfigError::Invalid(format!("{} plugin is empty, please provide a valid plugin", m.id)));
            }
            if !m.weight.is_finite() || !m.threshold.is_finite() {
                return Err(ConfigError::Invalid(format!("{} weight and threshold must be finite", m.id)));
            }
            if !seen.insert(m.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate model plugin id {}", m.id)));
            }
        }

        let mut seen = HashSet::new();
        for d in &self.decision_plugins {
            if d.id.is_empty() {
                return Err(ConfigError::Invalid("decision plugin with empty id".into()));
            }
            if d.plugin.is_empty() {
                return Err(ConfigError::Invalid(format!("{} plugin is empty, please provide a valid plugin", d.id)));
            }
            if !seen.insert(d.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate decision plugin id {}", d.id)));
            }
        }
        Ok(())
    }

    /// `host:port` the wire API binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }
}

// An existing file is opened for append, never truncated. A missing one is
// created and removed again so validation leaves nothing behind.
fn check_writable(path: &Path) -> std::io::Result<()> {
    let existed = path.exists();
    std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    if !existed {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
