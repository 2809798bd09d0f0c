// Copyright 2025 GEval Contributors (https://github.com/geval-rs/geval)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Model Pricing Table
//!
//! Per-model token prices used to estimate evaluation cost. A table is
//! injected into model clients at construction; the builtin table covers
//! common OpenAI chat models and custom tables can be loaded from TOML:
//!
//! ```toml
//! [models."my-finetune"]
//! input_cost_per_million = 1.0
//! output_cost_per_million = 4.0
//! ```
//!
//! Lookups resolve exact ids first, then provider-prefixed ids
//! (`openai/gpt-4o`), then the longest known prefix (`gpt-4o-2024-08-06`).
//! Unknown models cost nothing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Price of a single model in USD per one million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_million: f64,
    pub output_cost_per_million: f64,
}

impl ModelPricing {
    pub fn per_million(input: f64, output: f64) -> Self {
        Self {
            input_cost_per_million: input,
            output_cost_per_million: output,
        }
    }

    /// Calculate the cost for given token counts
    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_million
    }

    /// Check if this is a free/local model
    pub fn is_free(&self) -> bool {
        self.input_cost_per_million == 0.0 && self.output_cost_per_million == 0.0
    }
}

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("Failed to read pricing file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse pricing table: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Model id -> pricing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    #[serde(default)]
    models: HashMap<String, ModelPricing>,
}

impl PriceTable {
    /// Empty table; every model costs nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Builtin OpenAI prices
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (model, input, output) in [
            ("gpt-4o", 2.5, 10.0),
            ("gpt-4o-mini", 0.15, 0.6),
            ("gpt-4-turbo", 10.0, 30.0),
            ("gpt-4", 30.0, 60.0),
            ("gpt-3.5-turbo", 0.5, 1.5),
            ("o1-preview", 15.0, 60.0),
            ("o1-mini", 3.0, 12.0),
            ("o3-mini", 1.1, 4.4),
        ] {
            table.insert(model, ModelPricing::per_million(input, output));
        }
        table
    }

    pub fn from_toml_str(content: &str) -> Result<Self, PricingError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PricingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Add or replace a model's pricing
    pub fn insert(&mut self, model_id: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model_id.into(), pricing);
    }

    /// Overlay `other` on top of this table
    pub fn merge(mut self, other: PriceTable) -> Self {
        self.models.extend(other.models);
        self
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Get pricing for a model (with fallback resolution)
    pub fn get(&self, model_id: &str) -> Option<&ModelPricing> {
        self.lookup(model_id).or_else(|| {
            // "openai/gpt-4o" -> "gpt-4o"
            let (_, stripped) = model_id.rsplit_once('/')?;
            self.lookup(stripped)
        })
    }

    fn lookup(&self, model_id: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.models.get(model_id) {
            return Some(pricing);
        }

        // Dated snapshots ("gpt-4o-mini-2024-07-18", "gpt-4-0613"): the key
        // must be followed by '-', longest key wins. "gpt-4.1" is not gpt-4.
        self.models
            .iter()
            .filter(|(k, _)| {
                model_id
                    .strip_prefix(k.as_str())
                    .is_some_and(|rest| rest.starts_with('-'))
            })
            .max_by_key(|(k, _)| k.len())
            .map(|(_, pricing)| pricing)
    }

    /// Cost in USD; 0 for unknown models
    pub fn calculate_cost(&self, model_id: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.get(model_id)
            .map(|p| p.calculate_cost(input_tokens, output_tokens))
            .unwrap_or(0.0)
    }
}
