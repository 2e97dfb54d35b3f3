// arbiter/src/engine/registry.rs
//
// PluginRegistry: loads model and decision analyzers from their
// descriptors and exposes typed invocation by id.
//
// Load sequence per descriptor:
//   1. resolve `plugin` in the catalog          → ModuleNotFound
//   2. check exported entry points vs scope     → MissingEntryPoint
//   3. init(params)                             → Init
// A failure at any step is logged and only that slot stays empty.
//
// Tables are built once and never mutated afterwards, so lookups take no lock.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzers::{Catalog, DecisionAnalyzer, ModelAnalyzer};
use crate::config::{Config, DecisionDescriptor, ModelDescriptor};
use crate::error::{InvokeError, PluginLoadError};
use crate::events::{DecisionInput, Phase};

pub struct LoadedModel {
    pub descriptor: ModelDescriptor,
    analyzer:       Box<dyn ModelAnalyzer>,
}

pub struct LoadedDecision {
    pub descriptor: DecisionDescriptor,
    analyzer:       Box<dyn DecisionAnalyzer>,
}

pub struct PluginRegistry {
    models:    HashMap<String, LoadedModel>,
    decisions: HashMap<String, LoadedDecision>,
}

impl PluginRegistry {
    /// Load every descriptor in `config`. Never fails as a whole.
    pub fn load(config: &Config, catalog: &Catalog) -> Arc<Self> {
        let mut models = HashMap::new();
        for desc in &config.model_plugins {
            match Self::load_model(catalog, desc) {
                Ok(m) => {
                    info!(id = %desc.id, plugin = %desc.plugin, scope = %desc.plugin_type, "model plugin loaded");
                    models.insert(desc.id.clone(), m);
                }
                Err(e) => warn!(id = %desc.id, "cannot load plugin: {}", e),
            }
        }

        let mut decisions = HashMap::new();
        for desc in &config.decision_plugins {
            match Self::load_decision(catalog, desc) {
                Ok(d) => {
                    info!(id = %desc.id, plugin = %desc.plugin, "decision plugin loaded");
                    decisions.insert(desc.id.clone(), d);
                }
                Err(e) => warn!(id = %desc.id, "cannot load plugin: {}", e),
            }
        }

        info!(models = models.len(), decisions = decisions.len(), "plugin registry ready");
        Arc::new(Self { models, decisions })
    }

    pub fn load_model(catalog: &Catalog, desc: &ModelDescriptor) -> Result<LoadedModel, PluginLoadError> {
        let mut analyzer = catalog.model(&desc.plugin)
            .ok_or_else(|| PluginLoadError::ModuleNotFound(desc.plugin.clone()))?;

        let required = desc.plugin_type.required_entry_points();
        if let Some(entry) = analyzer.entry_points().missing(required).first().copied() {
            return Err(PluginLoadError::MissingEntryPoint { entry, scope: desc.plugin_type });
        }

        analyzer.init(&desc.params).map_err(|e| PluginLoadError::Init(format!("{:#}", e)))?;
        Ok(LoadedModel { descriptor: desc.clone(), analyzer })
    }

    pub fn load_decision(catalog: &Catalog, desc: &DecisionDescriptor) -> Result<LoadedDecision, PluginLoadError> {
        let mut analyzer = catalog.decision(&desc.plugin)
            .ok_or_else(|| PluginLoadError::ModuleNotFound(desc.plugin.clone()))?;
        analyzer.init(&desc.params).map_err(|e| PluginLoadError::Init(format!("{:#}", e)))?;
        Ok(LoadedDecision { descriptor: desc.clone(), analyzer })
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.models.get(model_id).map(|m| &m.descriptor)
    }

    pub fn has_decision(&self, decision_id: &str) -> bool {
        self.decisions.contains_key(decision_id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn decision_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.decisions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run one model over one payload fragment. Blocking; stores nothing.
    pub fn invoke_model(
        &self,
        model_id:       &str,
        phase:          Phase,
        payload:        &str,
        transaction_id: &str,
    ) -> Result<f64, InvokeError> {
        let m = self.models.get(model_id).ok_or_else(|| InvokeError::model_not_found(model_id))?;

        let scope = m.descriptor.plugin_type;
        if !scope.accepts(phase) {
            return Err(InvokeError::CapabilityMismatch { scope, phase });
        }

        let res = if phase.is_request() {
            m.analyzer.process_request(transaction_id, payload)
        } else {
            m.analyzer.process_response(transaction_id, payload)
        };
        res.map_err(|e| InvokeError::Invocation(format!("{:#}", e)))
    }

    /// Run a decision analyzer. Blocking.
    pub fn invoke_decision(&self, decision_id: &str, input: &DecisionInput) -> Result<bool, InvokeError> {
        let d = self.decisions.get(decision_id)
            .ok_or_else(|| InvokeError::decision_not_found(decision_id))?;
        d.analyzer.check_results(input).map_err(|e| InvokeError::Invocation(format!("{:#}", e)))
    }
}
