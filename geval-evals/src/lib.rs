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

//! # GEval Evaluation Framework
//!
//! LLM-as-judge evaluation of test cases with the G-Eval metric.
//!
//! ## Features
//!
//! - **Criteria or explicit steps**: evaluation steps are derived once from
//!   free-text criteria, or supplied up front
//! - **Strict and graded scoring**: binary 0/1 or a 0-10 scale, with an
//!   optional rubric
//! - **Probability normalization**: score tokens weighted by their logprobs
//! - **Never throws**: every failure becomes a failed [`MetricResult`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use geval_evals::evaluators::GEval;
//! use geval_evals::llm_client::OpenAIClient;
//! use geval_core::{EvaluationParam, GEvalConfig, TestCase};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let llm_client = Arc::new(OpenAIClient::from_env("gpt-4o-mini").unwrap());
//!
//!     let config = GEvalConfig::new(
//!         "Correctness",
//!         vec![EvaluationParam::Input, EvaluationParam::ActualOutput],
//!     )
//!     .with_criteria("Determine whether the output answers the input correctly.")
//!     .with_threshold(7.0);
//!
//!     let metric = GEval::new(llm_client, config).unwrap();
//!     let result = metric
//!         .evaluate(&TestCase::new("What is 2 + 2?", "4"))
//!         .await;
//!     println!("{} ({})", result.score, result.reason);
//! }
//! ```

use async_trait::async_trait;
use geval_core::{EvaluationParam, MetricResult, TestCase};
use thiserror::Error;

pub mod evaluators;
pub mod json_parser;
pub mod llm_client;
pub mod schema;
pub mod templates;

pub use evaluators::GEval;
pub use json_parser::{extract_json, extract_json_as, safe_json_parse, ExtractionError};
pub use llm_client::{LLMClient, LLMError, OpenAIClient};
pub use schema::{SchemaDescriptor, SchemaViolation};

/// Core trait that all metrics implement
#[async_trait]
pub trait Metric: Send + Sync {
    /// Human-readable metric name
    fn name(&self) -> &str;

    /// Score one test case. Failures are reported inside the result.
    async fn measure(&self, test_case: &TestCase) -> MetricResult;

    /// Default implementation calls measure() for each test case in order
    async fn measure_batch(&self, test_cases: &[TestCase]) -> Vec<MetricResult> {
        let mut results = Vec::with_capacity(test_cases.len());
        for test_case in test_cases {
            results.push(self.measure(test_case).await);
        }
        results
    }

    /// Minimum passing score
    fn threshold(&self) -> f64;
}

/// Errors that can occur during evaluation
///
/// These never leave a metric: they are converted into failed results.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Test case is missing required parameters: {}", join_params(.0))]
    MissingParameters(Vec<EvaluationParam>),

    #[error(transparent)]
    LLM(#[from] LLMError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Score {score} is outside the allowed range {min}-{max}")]
    InvalidScore { score: f64, min: u32, max: u32 },
}

fn join_params(params: &[EvaluationParam]) -> String {
    params
        .iter()
        .map(EvaluationParam::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
