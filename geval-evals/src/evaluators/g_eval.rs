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

//! G-Eval: LLM-as-judge with chain-of-thought evaluation steps
//!
//! The metric runs in two phases:
//! 1. Derive evaluation steps from the criteria (once per instance)
//! 2. Grade each test case against those steps, optionally re-weighting the
//!    sampled score by the model's token probabilities
//!
//! Reference: "G-Eval: NLG Evaluation using GPT-4 with Better Human Alignment"
//! (Liu et al., 2023)

use crate::evaluators::score::{resolve_score, ScoreMethod, ScoreScale};
use crate::llm_client::{generate_typed, GenerateOptions, LLMClient, TokenUsage};
use crate::schema::{evaluation_result_schema, evaluation_steps_schema};
use crate::templates::{
    extract_test_case_content, generate_evaluation_prompt, generate_evaluation_steps_prompt,
};
use crate::{EvalError, Metric};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use geval_core::{
    ConfigError, EvaluationParam, EvaluationResult, EvaluationStepsResult, GEvalConfig,
    MetricResult, TestCase,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

enum StepsState {
    Uninitialized,
    Ready(Arc<Vec<String>>),
}

struct Judgment {
    score: f64,
    reason: String,
    method: ScoreMethod,
}

/// G-Eval metric
///
/// One instance is safe to share across tasks. Steps are generated at most
/// once per successful generation; when two evaluations race, the first
/// stored result is used by both.
pub struct GEval {
    llm_client: Arc<dyn LLMClient>,
    config: GEvalConfig,
    steps: Mutex<StepsState>,
    evaluation_cost: Mutex<f64>,
}

impl GEval {
    /// Create a new metric; fails on an invalid configuration
    pub fn new(llm_client: Arc<dyn LLMClient>, config: GEvalConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let steps = match &config.evaluation_steps {
            Some(steps) => StepsState::Ready(Arc::new(steps.clone())),
            None => StepsState::Uninitialized,
        };

        Ok(Self {
            llm_client,
            config,
            steps: Mutex::new(steps),
            evaluation_cost: Mutex::new(0.0),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &GEvalConfig {
        &self.config
    }

    /// Steps in use, if already supplied or generated
    pub fn evaluation_steps(&self) -> Option<Vec<String>> {
        match &*self.steps.lock() {
            StepsState::Ready(steps) => Some(steps.as_ref().clone()),
            StepsState::Uninitialized => None,
        }
    }

    /// Cumulative cost of all model calls made by this instance
    pub fn evaluation_cost(&self) -> f64 {
        *self.evaluation_cost.lock()
    }

    pub fn reset_cost(&self) {
        *self.evaluation_cost.lock() = 0.0;
    }

    pub fn is_successful(&self, score: f64) -> bool {
        self.config.base.is_successful(score)
    }

    /// Evaluate a single test case. Never fails: errors are reported in the
    /// returned result.
    pub async fn evaluate(&self, test_case: &TestCase) -> MetricResult {
        let start = Instant::now();
        self.llm_client.reset_session();

        match self.run(test_case).await {
            Ok(judgment) => {
                let success = self.is_successful(judgment.score);
                info!(
                    metric = %self.config.name,
                    score = judgment.score,
                    success,
                    method = ?judgment.method,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "G-Eval completed"
                );
                if self.config.verbose() {
                    info!(metric = %self.config.name, reason = %judgment.reason, "G-Eval reason");
                }

                MetricResult {
                    score: judgment.score,
                    success,
                    reason: judgment.reason,
                    error: None,
                    evaluation_cost: self.evaluation_cost(),
                }
            }
            Err(e) => {
                warn!(metric = %self.config.name, error = %e, "G-Eval failed");
                MetricResult::failure(e.to_string(), self.evaluation_cost())
            }
        }
    }

    /// Evaluate many test cases with at most `max_concurrent` in flight.
    /// Results keep the input order.
    ///
    /// Clients with conversation state are reset per evaluation, so they
    /// should only be used here with `max_concurrent == 1`.
    pub async fn evaluate_batch(
        &self,
        test_cases: &[TestCase],
        max_concurrent: usize,
    ) -> Vec<MetricResult> {
        stream::iter(test_cases.iter().map(|test_case| self.evaluate(test_case)))
            .buffered(max_concurrent.max(1))
            .collect()
            .await
    }

    async fn run(&self, test_case: &TestCase) -> Result<Judgment, EvalError> {
        self.check_required_params(test_case)?;

        let steps = self.evaluation_steps_or_generate().await?;
        let result = self.grade(&steps, test_case).await?;

        let resolved =
            resolve_score(&result, &self.config, &steps, self.llm_client.as_ref()).await?;
        self.add_cost(resolved.cost);

        Ok(Judgment {
            score: resolved.score,
            reason: result.reason,
            method: resolved.method,
        })
    }

    fn check_required_params(&self, test_case: &TestCase) -> Result<(), EvalError> {
        let missing: Vec<EvaluationParam> = self
            .config
            .evaluation_params
            .iter()
            .copied()
            .filter(|param| !test_case.has(*param))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(EvalError::MissingParameters(missing))
        }
    }

    async fn evaluation_steps_or_generate(&self) -> Result<Arc<Vec<String>>, EvalError> {
        let cached = match &*self.steps.lock() {
            StepsState::Ready(steps) => Some(Arc::clone(steps)),
            StepsState::Uninitialized => None,
        };
        if let Some(steps) = cached {
            debug!(metric = %self.config.name, "Using cached evaluation steps");
            return Ok(steps);
        }

        let generated = self.generate_evaluation_steps().await?;

        let mut state = self.steps.lock();
        match &*state {
            // Another evaluation stored its steps first
            StepsState::Ready(existing) => Ok(Arc::clone(existing)),
            StepsState::Uninitialized => {
                let steps = Arc::new(generated);
                *state = StepsState::Ready(Arc::clone(&steps));
                Ok(steps)
            }
        }
    }

    async fn generate_evaluation_steps(&self) -> Result<Vec<String>, EvalError> {
        debug!(metric = %self.config.name, "Generating evaluation steps");

        let prompt = generate_evaluation_steps_prompt(
            &self.config.evaluation_params,
            self.config.criteria.as_deref(),
        );
        let (response, usage): (EvaluationStepsResult, _) = generate_typed(
            self.llm_client.as_ref(),
            &prompt,
            &evaluation_steps_schema(),
            &GenerateOptions::default(),
        )
        .await?;
        self.add_usage(usage.as_ref());

        if response.steps.is_empty() {
            return Err(EvalError::InvalidResponse(
                "Model returned no evaluation steps".to_string(),
            ));
        }

        if self.config.verbose() {
            info!(
                metric = %self.config.name,
                steps = ?response.steps,
                "Generated evaluation steps"
            );
        } else {
            debug!(count = response.steps.len(), "Generated evaluation steps");
        }

        Ok(response.steps)
    }

    async fn grade(
        &self,
        steps: &[String],
        test_case: &TestCase,
    ) -> Result<EvaluationResult, EvalError> {
        let content = extract_test_case_content(Some(test_case), &self.config.evaluation_params);
        let prompt = generate_evaluation_prompt(
            steps,
            &content,
            self.config.strict_mode(),
            self.config.rubric(),
        );

        let (result, usage): (EvaluationResult, _) = generate_typed(
            self.llm_client.as_ref(),
            &prompt,
            &evaluation_result_schema(),
            &GenerateOptions::default(),
        )
        .await?;
        self.add_usage(usage.as_ref());

        let scale = ScoreScale::for_mode(self.config.strict_mode());
        if !scale.contains(result.score) {
            return Err(EvalError::InvalidScore {
                score: result.score,
                min: 0,
                max: scale.max(),
            });
        }

        Ok(result)
    }

    fn add_usage(&self, usage: Option<&TokenUsage>) {
        if let Some(usage) = usage {
            self.add_cost(self.llm_client.calculate_cost(usage));
        }
    }

    fn add_cost(&self, cost: f64) {
        if cost > 0.0 {
            *self.evaluation_cost.lock() += cost;
        }
    }
}

#[async_trait]
impl Metric for GEval {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn measure(&self, test_case: &TestCase) -> MetricResult {
        self.evaluate(test_case).await
    }

    fn threshold(&self) -> f64 {
        self.config.threshold()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{LLMError, RawLLMResponse, StructuredResponse, TokenLogprob};
    use crate::schema::SchemaDescriptor;
    use geval_core::Rubric;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockLLMClient {
        steps: Value,
        grade: Value,
        logprobs: Option<Vec<TokenLogprob>>,
        fail_with: Option<String>,
        steps_calls: AtomicUsize,
        grade_calls: AtomicUsize,
        raw_calls: AtomicUsize,
        resets: AtomicUsize,
        prompts: parking_lot::Mutex<Vec<String>>,
    }

    impl MockLLMClient {
        fn new(grade: Value) -> Self {
            Self {
                steps: json!({"steps": ["Check correctness", "Check completeness"]}),
                grade,
                logprobs: None,
                fail_with: None,
                steps_calls: AtomicUsize::new(0),
                grade_calls: AtomicUsize::new(0),
                raw_calls: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
                prompts: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn with_steps(mut self, steps: Value) -> Self {
            self.steps = steps;
            self
        }

        fn with_logprobs(mut self, logprobs: Vec<TokenLogprob>) -> Self {
            self.logprobs = Some(logprobs);
            self
        }

        fn failing(mut self, message: &str) -> Self {
            self.fail_with = Some(message.to_string());
            self
        }
    }

    #[async_trait]
    impl LLMClient for MockLLMClient {
        async fn generate(&self, _prompt: &str, _: &GenerateOptions) -> Result<String, LLMError> {
            Ok(String::new())
        }

        async fn generate_structured(
            &self,
            prompt: &str,
            schema: &SchemaDescriptor,
            _: &GenerateOptions,
        ) -> Result<StructuredResponse, LLMError> {
            self.prompts.lock().push(prompt.to_string());
            if let Some(message) = &self.fail_with {
                return Err(LLMError::ApiError(message.clone()));
            }

            let is_steps = schema
                .properties
                .as_ref()
                .is_some_and(|props| props.contains_key("steps"));
            let value = if is_steps {
                self.steps_calls.fetch_add(1, Ordering::SeqCst);
                self.steps.clone()
            } else {
                self.grade_calls.fetch_add(1, Ordering::SeqCst);
                self.grade.clone()
            };

            schema.validate(&value)?;
            Ok(StructuredResponse {
                value,
                usage: Some(TokenUsage::new(100, 50)),
            })
        }

        async fn generate_raw(
            &self,
            _prompt: &str,
            _: &GenerateOptions,
        ) -> Result<RawLLMResponse, LLMError> {
            self.raw_calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawLLMResponse {
                content: self.grade.to_string(),
                usage: Some(TokenUsage::new(100, 50)),
                logprobs: self.logprobs.clone(),
            })
        }

        // 150 tokens per call -> 0.15
        fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
            usage.total_tokens as f64 * 0.001
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }

        fn reset_session(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> GEvalConfig {
        GEvalConfig::new(
            "Correctness",
            vec![EvaluationParam::Input, EvaluationParam::ActualOutput],
        )
        .with_criteria("Is the answer correct?")
    }

    fn metric(client: Arc<MockLLMClient>, config: GEvalConfig) -> GEval {
        GEval::new(client, config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let client = Arc::new(MockLLMClient::new(json!({})));

        let no_params = GEvalConfig::new("Empty", vec![]);
        assert!(matches!(
            GEval::new(client.clone(), no_params),
            Err(ConfigError::NoEvaluationParams)
        ));

        let strict_with_rubric = config()
            .with_strict_mode(true)
            .with_rubric(vec![Rubric::new(1.0, "Pass")]);
        assert!(matches!(
            GEval::new(client, strict_with_rubric),
            Err(ConfigError::RubricInStrictMode)
        ));
    }

    #[test]
    fn test_precomputed_steps_ready() {
        let client = Arc::new(MockLLMClient::new(json!({})));
        let steps = vec!["Compare with expected".to_string()];
        let geval = metric(client, config().with_evaluation_steps(steps.clone()));

        assert_eq!(geval.evaluation_steps(), Some(steps));
        assert_eq!(geval.name(), "Correctness");
        assert_eq!(geval.evaluation_cost(), 0.0);
    }

    #[tokio::test]
    async fn test_successful_evaluation() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 8, "reason": "Mostly right"})));
        let geval = metric(client.clone(), config().with_threshold(7.0));

        let result = geval.evaluate(&TestCase::new("2+2?", "4")).await;

        assert_eq!(result.score, 8.0);
        assert!(result.success);
        assert_eq!(result.reason, "Mostly right");
        assert!(result.error.is_none());
        assert!((result.evaluation_cost - 0.3).abs() < 1e-9);
        assert_eq!(
            geval.evaluation_steps(),
            Some(vec![
                "Check correctness".to_string(),
                "Check completeness".to_string()
            ])
        );

        let prompts = client.prompts.lock();
        assert!(prompts[0].contains("**Criteria:**\nIs the answer correct?"));
        assert!(prompts[1].contains("1. Check correctness\n2. Check completeness"));
        assert!(prompts[1].contains("**Input:**\n2+2?"));
    }

    #[tokio::test]
    async fn test_threshold_inclusive() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 7, "reason": "ok"})));
        let geval = metric(client, config().with_threshold(7.0));

        let result = geval.evaluate(&TestCase::new("q", "a")).await;
        assert!(result.success);

        let client = Arc::new(MockLLMClient::new(json!({"score": 6, "reason": "meh"})));
        let geval = metric(client, config().with_threshold(7.0));

        let result = geval.evaluate(&TestCase::new("q", "a")).await;
        assert!(!result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_missing_params_all_listed() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 8, "reason": "ok"})));
        let config = GEvalConfig::new(
            "Grounded",
            vec![
                EvaluationParam::Input,
                EvaluationParam::ExpectedOutput,
                EvaluationParam::RetrievalContext,
            ],
        );
        let geval = metric(client.clone(), config);

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert_eq!(result.score, 0.0);
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Test case is missing required parameters: expectedOutput, retrievalContext")
        );
        assert_eq!(
            result.reason,
            "Evaluation failed: Test case is missing required parameters: expectedOutput, retrievalContext"
        );
        // No model call was made
        assert_eq!(client.steps_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.grade_calls.load(Ordering::SeqCst), 0);
        assert_eq!(client.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_steps_generated_once() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 9, "reason": "ok"})));
        let geval = metric(client.clone(), config());

        for _ in 0..3 {
            let result = geval.evaluate(&TestCase::new("q", "a")).await;
            assert!(!result.is_error());
        }

        assert_eq!(client.steps_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.grade_calls.load(Ordering::SeqCst), 3);
        assert_eq!(client.resets.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_precomputed_steps_skip_generation() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 9, "reason": "ok"})));
        let geval = metric(
            client.clone(),
            config().with_evaluation_steps(vec!["Custom step".to_string()]),
        );

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert!(result.success);
        assert_eq!(client.steps_calls.load(Ordering::SeqCst), 0);
        assert!(client.prompts.lock()[0].contains("1. Custom step"));
        assert!((result.evaluation_cost - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_steps_rejected() {
        let client = Arc::new(
            MockLLMClient::new(json!({"score": 9, "reason": "ok"})).with_steps(json!({"steps": []})),
        );
        let geval = metric(client.clone(), config());

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert!(result.is_error());
        assert!(result.reason.starts_with("Evaluation failed: Invalid response"));
        assert_eq!(geval.evaluation_steps(), None);
        assert_eq!(client.grade_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_provider_error_becomes_failure() {
        let client = Arc::new(MockLLMClient::new(json!({})).failing("quota exhausted"));
        let geval = metric(client, config());

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert_eq!(result.score, 0.0);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("API error: quota exhausted"));
        assert_eq!(result.reason, "Evaluation failed: API error: quota exhausted");
    }

    #[tokio::test]
    async fn test_out_of_range_score_rejected() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 42, "reason": "??"})));
        let geval = metric(client, config());

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert!(result.is_error());
        assert!(!result.success);
        assert!(result.reason.contains("outside the allowed range 0-10"));
        // Cost of both calls is still reported
        assert!((result.evaluation_cost - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_strict_mode_binary_scores() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 1, "reason": "pass"})));
        let geval = metric(client, config().with_strict_mode(true).with_threshold(1.0));
        let result = geval.evaluate(&TestCase::new("q", "a")).await;
        assert_eq!(result.score, 1.0);
        assert!(result.success);

        let client = Arc::new(MockLLMClient::new(json!({"score": 7, "reason": "graded"})));
        let geval = metric(client, config().with_strict_mode(true));
        let result = geval.evaluate(&TestCase::new("q", "a")).await;
        assert!(result.is_error());
        assert!(result.reason.contains("0-1"));
    }

    #[tokio::test]
    async fn test_cost_accumulates_and_resets() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 5, "reason": "ok"})));
        let geval = metric(client, config());

        geval.evaluate(&TestCase::new("q", "a")).await;
        let second = geval.evaluate(&TestCase::new("q", "a")).await;

        // steps + 2 grades
        assert!((second.evaluation_cost - 0.45).abs() < 1e-9);
        assert!((geval.evaluation_cost() - 0.45).abs() < 1e-9);

        geval.reset_cost();
        assert_eq!(geval.evaluation_cost(), 0.0);

        let third = geval.evaluate(&TestCase::new("q", "a")).await;
        assert!((third.evaluation_cost - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_logprob_weighted_score() {
        let client = Arc::new(
            MockLLMClient::new(json!({"score": 9, "reason": "good"})).with_logprobs(vec![
                TokenLogprob::new("9", 0.5f64.ln()),
                TokenLogprob::new("7", 0.5f64.ln()),
            ]),
        );
        let geval = metric(client.clone(), config().with_top_logprobs(5));

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert!((result.score - 8.0).abs() < 1e-9);
        assert_eq!(result.reason, "good");
        assert_eq!(client.raw_calls.load(Ordering::SeqCst), 1);
        assert!((result.evaluation_cost - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_verbose_mode() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 10, "reason": "perfect"})));
        let geval = metric(client, config().with_verbose(true));

        let result = geval.evaluate(&TestCase::new("q", "a")).await;

        assert_eq!(result.score, 10.0);
        assert_eq!(result.reason, "perfect");
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 8, "reason": "ok"})));
        let config = GEvalConfig::new(
            "Reference",
            vec![EvaluationParam::Input, EvaluationParam::ExpectedOutput],
        );
        let geval = metric(client, config);

        let cases = vec![
            TestCase::new("q1", "a1").with_expected_output("a1"),
            TestCase::new("q2", "a2"),
            TestCase::new("q3", "a3").with_expected_output("a3"),
        ];
        let results = geval.evaluate_batch(&cases, 2).await;

        assert_eq!(results.len(), 3);
        assert!(!results[0].is_error());
        assert!(results[1].is_error());
        assert!(results[1].reason.contains("expectedOutput"));
        assert!(!results[2].is_error());

        assert!(geval.evaluate_batch(&[], 4).await.is_empty());
    }

    #[tokio::test]
    async fn test_metric_trait() {
        let client = Arc::new(MockLLMClient::new(json!({"score": 6, "reason": "ok"})));
        let geval = metric(client, config().with_threshold(5.0));
        let metric: &dyn Metric = &geval;

        assert_eq!(metric.name(), "Correctness");
        assert_eq!(metric.threshold(), 5.0);

        let results = metric
            .measure_batch(&[TestCase::new("q", "a"), TestCase::new("q", "b")])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
    }
}
