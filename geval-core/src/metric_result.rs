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

use serde::{Deserialize, Serialize};

/// Evaluation steps produced by the grading model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStepsResult {
    pub steps: Vec<String>,
}

/// Structured judgment returned by the grading call, before any reweighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub reason: String,
}

/// Final result of one metric evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub score: f64,

    /// `score >= threshold`
    pub success: bool,

    /// Human-readable justification
    pub reason: String,

    /// Set only when the evaluation itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Cumulative cost in USD accrued by the metric instance so far
    pub evaluation_cost: f64,
}

impl MetricResult {
    /// Failed evaluation: score 0, not successful, error message preserved
    pub fn failure(message: impl Into<String>, evaluation_cost: f64) -> Self {
        let message = message.into();
        Self {
            score: 0.0,
            success: false,
            reason: format!("Evaluation failed: {}", message),
            error: Some(message),
            evaluation_cost,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
