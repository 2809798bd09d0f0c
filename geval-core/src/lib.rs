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

//! GEval Core
//!
//! Fundamental data structures for LLM-graded evaluation: test cases,
//! metric configuration, results, model pricing and retry policy.

pub mod config;
pub mod metric_result;
pub mod model_pricing;
pub mod resilience;
pub mod test_case;

pub use config::{ConfigError, GEvalConfig, MetricConfig, Rubric, DEFAULT_THRESHOLD};
pub use metric_result::{EvaluationResult, EvaluationStepsResult, MetricResult};
pub use model_pricing::{ModelPricing, PriceTable, PricingError};
pub use resilience::RetryPolicy;
pub use test_case::{EvaluationParam, FieldValue, TestCase};
