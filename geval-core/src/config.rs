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

//! Metric configuration
//!
//! Configs can be built in code or loaded from TOML:
//!
//! ```toml
//! name = "Correctness"
//! threshold = 0.7
//! evaluation_params = ["input", "actualOutput", "expectedOutput"]
//! criteria = "Determine whether the actual output is factually correct."
//! top_logprobs = 5
//!
//! [[rubric]]
//! score = 0
//! description = "Completely wrong"
//! ```

use crate::test_case::EvaluationParam;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Threshold used when a config file does not set one
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Errors raised while building or loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("At least one evaluation parameter must be specified")]
    NoEvaluationParams,

    #[error("Rubric is not supported in strict mode")]
    RubricInStrictMode,

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings shared by every metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Minimum score (inclusive) for a passing result
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Binary 0/1 scoring instead of a graded scale
    #[serde(default)]
    pub strict_mode: bool,

    /// Log evaluation steps and reasons at info level
    #[serde(default)]
    pub verbose: bool,
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            strict_mode: false,
            verbose: false,
        }
    }
}

impl MetricConfig {
    /// Pass/fail decision, non-decreasing in `score`
    pub fn is_successful(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

/// One anchor of the scoring scale shown to the grading model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub score: f64,
    pub description: String,
}

impl Rubric {
    pub fn new(score: f64, description: impl Into<String>) -> Self {
        Self {
            score,
            description: description.into(),
        }
    }
}

/// Configuration for the G-Eval metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GEvalConfig {
    #[serde(flatten)]
    pub base: MetricConfig,

    /// Metric name reported in results and logs
    pub name: String,

    /// Test case fields the grading model sees; never empty
    pub evaluation_params: Vec<EvaluationParam>,

    /// Free-text criteria used to derive evaluation steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,

    /// Precomputed steps; skips step generation entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_steps: Option<Vec<String>>,

    /// Score anchors; mutually exclusive with strict mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<Vec<Rubric>>,

    /// Number of alternatives to request for probability-weighted scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u8>,
}

impl GEvalConfig {
    pub fn new(name: impl Into<String>, evaluation_params: Vec<EvaluationParam>) -> Self {
        Self {
            base: MetricConfig::default(),
            name: name.into(),
            evaluation_params,
            criteria: None,
            evaluation_steps: None,
            rubric: None,
            top_logprobs: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.base.threshold = threshold;
        self
    }

    pub fn with_strict_mode(mut self, strict_mode: bool) -> Self {
        self.base.strict_mode = strict_mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.base.verbose = verbose;
        self
    }

    pub fn with_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    pub fn with_evaluation_steps(mut self, steps: Vec<String>) -> Self {
        self.evaluation_steps = Some(steps);
        self
    }

    pub fn with_rubric(mut self, rubric: Vec<Rubric>) -> Self {
        self.rubric = Some(rubric);
        self
    }

    pub fn with_top_logprobs(mut self, top_logprobs: u8) -> Self {
        self.top_logprobs = Some(top_logprobs);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.base.threshold
    }

    pub fn strict_mode(&self) -> bool {
        self.base.strict_mode
    }

    pub fn verbose(&self) -> bool {
        self.base.verbose
    }

    /// Rubric, if configured and non-empty
    pub fn rubric(&self) -> Option<&[Rubric]> {
        self.rubric.as_deref().filter(|r| !r.is_empty())
    }

    /// Check construction invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_params.is_empty() {
            return Err(ConfigError::NoEvaluationParams);
        }
        // Any rubric, even an empty one, conflicts with strict mode
        if self.base.strict_mode && self.rubric.is_some() {
            return Err(ConfigError::RubricInStrictMode);
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GEvalConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
