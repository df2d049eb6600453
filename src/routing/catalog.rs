//! Remote model catalog.

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pricing information for models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PricingInfo {
    pub fn new(input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        Self {
            input_cost_per_1k,
            output_cost_per_1k,
            currency: default_currency(),
        }
    }

    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }
}

/// A remote model the router may select for high-complexity requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Provider-native identifier, e.g. `"openai/gpt-4o-mini"`.
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub pricing: PricingInfo,
    #[serde(default)]
    pub context_window: Option<u32>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>, pricing: PricingInfo) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            pricing,
            context_window: None,
        }
    }

    pub fn with_context_window(mut self, size: u32) -> Self {
        self.context_window = Some(size);
        self
    }
}

/// Configured remote models plus the default pick. Fixed at startup.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelInfo>,
    default_model: String,
}

impl ModelCatalog {
    /// Build a catalog. The default model is added with free pricing if it is not listed.
    pub fn new(default_model: impl Into<String>, models: Vec<ModelInfo>) -> Result<Self> {
        let default_model = default_model.into();
        if default_model.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "remote default model must not be empty",
                ErrorContext::new()
                    .with_field_path("remote.default_model")
                    .with_source("model_catalog"),
            ));
        }
        let mut map: BTreeMap<String, ModelInfo> =
            models.into_iter().map(|m| (m.name.clone(), m)).collect();
        map.entry(default_model.clone())
            .or_insert_with(|| ModelInfo::new(default_model.clone(), PricingInfo::free()));
        Ok(Self {
            models: map,
            default_model,
        })
    }

    pub fn default_model(&self) -> ModelInfo {
        self.models
            .get(&self.default_model)
            .cloned()
            .unwrap_or_else(|| ModelInfo::new(self.default_model.clone(), PricingInfo::free()))
    }

    pub fn get(&self, name: &str) -> Option<ModelInfo> {
        self.models.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Requested model if it is in the catalog, otherwise the default.
    pub fn select(&self, requested: Option<&str>) -> ModelInfo {
        requested
            .and_then(|name| self.get(name))
            .unwrap_or_else(|| self.default_model())
    }

    /// All models, sorted by name.
    pub fn list(&self) -> Vec<ModelInfo> {
        self.models.values().cloned().collect()
    }
}
