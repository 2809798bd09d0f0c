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

//! Final score resolution
//!
//! The grading call yields a single sampled score. When `top_logprobs` is
//! configured (and strict mode is off) the grading prompt is replayed through
//! the raw endpoint and score tokens are averaged by their probabilities:
//!
//! S = Σ s·P(s) / Σ P(s),  where P(s) = exp(logprob of token "s")
//!
//! Only tokens of the sampled stream are considered; scores live on the
//! integer 0-10 scale.

use crate::llm_client::{GenerateOptions, LLMClient, LLMError, TokenLogprob};
use crate::templates::{generate_evaluation_prompt, TestCaseContent};
use geval_core::{EvaluationResult, GEvalConfig};
use tracing::debug;

/// Numeric range a score may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreScale {
    /// Graded integer scale 0..=10
    ZeroToTen,
    /// Strict pass/fail
    Binary,
}

impl ScoreScale {
    pub fn for_mode(strict_mode: bool) -> Self {
        if strict_mode {
            ScoreScale::Binary
        } else {
            ScoreScale::ZeroToTen
        }
    }

    pub fn max(&self) -> u32 {
        match self {
            ScoreScale::ZeroToTen => 10,
            ScoreScale::Binary => 1,
        }
    }

    /// Neutral score used when no score tokens were observed
    pub fn midpoint(&self) -> f64 {
        self.max() as f64 / 2.0
    }

    pub fn contains(&self, score: f64) -> bool {
        match self {
            ScoreScale::ZeroToTen => (0.0..=10.0).contains(&score),
            ScoreScale::Binary => score == 0.0 || score == 1.0,
        }
    }

    /// Parse a token as a score on this scale ("7", " 10")
    pub fn parse_token(&self, token: &str) -> Option<f64> {
        let token = token.trim();
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token
            .parse::<u32>()
            .ok()
            .filter(|score| *score <= self.max())
            .map(f64::from)
    }
}

/// How the final score was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMethod {
    /// Sampled score used as-is
    Direct,
    /// Probability-weighted average of score tokens
    LogprobWeighted,
    /// Logprobs present but no score tokens; scale midpoint
    NeutralFallback,
    /// Provider returned no logprobs; sampled score used
    DirectFallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedScore {
    pub score: f64,
    /// Cost of any extra model call made while resolving
    pub cost: f64,
    pub method: ScoreMethod,
}

/// Probability-weighted mean of the score tokens in `logprobs`, or `None`
/// when the stream has no token on `scale`
pub fn weighted_score(logprobs: &[TokenLogprob], scale: ScoreScale) -> Option<f64> {
    let matches: Vec<(f64, f64)> = logprobs
        .iter()
        .filter_map(|t| Some((scale.parse_token(&t.token)?, t.logprob)))
        .filter(|(_, logprob)| !logprob.is_nan())
        .collect();

    // Weights are taken relative to the most likely score token so that very
    // negative logprobs cannot all underflow to zero.
    let max_logprob = matches
        .iter()
        .map(|(_, logprob)| *logprob)
        .fold(f64::NEG_INFINITY, f64::max);
    if !max_logprob.is_finite() {
        return None;
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (score, logprob) in matches {
        let weight = (logprob - max_logprob).exp();
        weighted_sum += score * weight;
        total_weight += weight;
    }

    Some(weighted_sum / total_weight)
}

/// Compute the final score for a grading result
pub async fn resolve_score(
    result: &EvaluationResult,
    config: &GEvalConfig,
    steps: &[String],
    client: &dyn LLMClient,
) -> Result<ResolvedScore, LLMError> {
    let top_logprobs = match config.top_logprobs {
        Some(n) if !config.strict_mode() => n,
        _ => {
            return Ok(ResolvedScore {
                score: result.score,
                cost: 0.0,
                method: ScoreMethod::Direct,
            })
        }
    };

    // Replayed without test case content; only the score tokens matter here
    let prompt =
        generate_evaluation_prompt(steps, &TestCaseContent::new(), false, config.rubric());
    let options = GenerateOptions::default().with_top_logprobs(top_logprobs);
    let raw = client.generate_raw(&prompt, &options).await?;

    let cost = raw
        .usage
        .as_ref()
        .map(|usage| client.calculate_cost(usage))
        .unwrap_or(0.0);

    let scale = ScoreScale::ZeroToTen;
    let (score, method) = match raw.logprobs.as_deref() {
        Some(logprobs) => match weighted_score(logprobs, scale) {
            Some(score) => (score, ScoreMethod::LogprobWeighted),
            None => (scale.midpoint(), ScoreMethod::NeutralFallback),
        },
        None => (result.score, ScoreMethod::DirectFallback),
    };

    debug!(
        sampled = result.score,
        resolved = score,
        method = ?method,
        "Resolved score from logprobs"
    );

    Ok(ResolvedScore {
        score,
        cost,
        method,
    })
}
