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

//! LLM client abstraction for LLM-as-judge evaluation

use crate::json_parser::extract_json;
use crate::schema::{SchemaDescriptor, SchemaViolation};
use async_trait::async_trait;
use geval_core::{PriceTable, RetryPolicy};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Trait for LLM clients used in evaluations
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Free-text generation
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError>;

    /// Generation constrained to `schema`. The returned value has been
    /// checked against the schema.
    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &SchemaDescriptor,
        options: &GenerateOptions,
    ) -> Result<StructuredResponse, LLMError>;

    /// Raw response with usage and, when `options.top_logprobs` is set and
    /// the provider supports it, per-token log probabilities
    async fn generate_raw(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<RawLLMResponse, LLMError>;

    /// Cost estimate in USD; 0 for models without known pricing
    fn calculate_cost(&self, usage: &TokenUsage) -> f64;

    /// Get model name
    fn model_name(&self) -> &str;

    /// Drop any conversation state so the next call starts fresh.
    ///
    /// Stateless clients keep the default no-op.
    fn reset_session(&self) {}
}

/// Sampling options for a single call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_logprobs: Option<u8>,
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_logprobs(mut self, top_logprobs: u8) -> Self {
        self.top_logprobs = Some(top_logprobs);
        self
    }
}

/// Schema-conforming value plus the usage of the call that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub value: Value,
    pub usage: Option<TokenUsage>,
}

impl StructuredResponse {
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, LLMError> {
        Ok(serde_json::from_value(self.value)?)
    }
}

/// Raw response from LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLLMResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub logprobs: Option<Vec<TokenLogprob>>,
}

/// Token-level log probability information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

impl TokenLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob,
            top_logprobs: Vec::new(),
        }
    }
}

/// Alternative token with its log probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Errors from LLM clients
#[derive(Debug, Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No content in response")]
    NoContent,

    #[error("Schema violation: {0}")]
    SchemaViolation(#[from] SchemaViolation),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: set {0}")]
    MissingApiKey(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LLMError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimitExceeded | LLMError::ServerError(..) | LLMError::Connection(_)
        )
    }
}

/// Structured generation deserialized straight into `T`
pub async fn generate_typed<T: DeserializeOwned>(
    client: &dyn LLMClient,
    prompt: &str,
    schema: &SchemaDescriptor,
    options: &GenerateOptions,
) -> Result<(T, Option<TokenUsage>), LLMError> {
    let response = client.generate_structured(prompt, schema, options).await?;
    let usage = response.usage;
    Ok((response.into_typed()?, usage))
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const STRUCTURED_SYSTEM_PROMPT: &str = "You are an expert evaluator. Respond only with valid JSON.";
/// OpenAI allows at most 20 alternatives per position
const MAX_TOP_LOGPROBS: u8 = 20;

/// OpenAI-compatible chat completions client
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
    pricing: PriceTable,
    retry_policy: RetryPolicy,
    /// Prior turns, kept only in conversation mode
    conversation: Option<Mutex<Vec<Value>>>,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            pricing: PriceTable::builtin(),
            retry_policy: RetryPolicy::exponential(),
            conversation: None,
        }
    }

    /// Read the API key from `OPENAI_API_KEY`
    pub fn from_env(model: impl Into<String>) -> Result<Self, LLMError> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| LLMError::MissingApiKey("OPENAI_API_KEY"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_pricing(mut self, pricing: PriceTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Per-request timeout; fails if the HTTP client cannot be built
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, LLMError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Keep prior turns and send them with every request until
    /// [`LLMClient::reset_session`] is called
    pub fn with_conversation(mut self, enabled: bool) -> Self {
        self.conversation = enabled.then(|| Mutex::new(Vec::new()));
        self
    }

    fn build_request(&self, prompt: &str, system: Option<&str>, options: &GenerateOptions) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        if let Some(history) = &self.conversation {
            messages.extend(history.lock().iter().cloned());
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let mut request = json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature.unwrap_or(0.0),
        });

        if let Some(max_tokens) = options.max_tokens {
            request["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            request["top_p"] = json!(top_p);
        }
        if let Some(top_k) = options.top_logprobs {
            request["logprobs"] = json!(true);
            request["top_logprobs"] = json!(top_k.min(MAX_TOP_LOGPROBS));
        }

        request
    }

    fn record_turn(&self, prompt: &str, content: &str) {
        if let Some(history) = &self.conversation {
            let mut history = history.lock();
            history.push(json!({"role": "user", "content": prompt}));
            history.push(json!({"role": "assistant", "content": content}));
        }
    }

    async fn chat_completion(&self, request: &Value) -> Result<Value, LLMError> {
        let mut attempt = 0;
        loop {
            match self.send_once(request).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "LLM call failed, retrying: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &Value) -> Result<Value, LLMError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| LLMError::Connection(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LLMError::RateLimitExceeded);
        }
        if !status.is_success() {
            let error_text = response.text().await?;
            if status.is_server_error() {
                return Err(LLMError::ServerError(status.as_u16(), error_text));
            }
            return Err(LLMError::ApiError(error_text));
        }

        Ok(response.json().await?)
    }
}

fn parse_content(data: &Value) -> Option<String> {
    data["choices"][0]["message"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn parse_usage(data: &Value) -> Option<TokenUsage> {
    let usage = data.get("usage").filter(|u| u.is_object())?;
    // Saturate rather than wrap on counts beyond u32
    let field = |name: &str| {
        usage[name]
            .as_u64()
            .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX))
    };
    Some(TokenUsage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

fn parse_logprobs(data: &Value) -> Option<Vec<TokenLogprob>> {
    let logprobs_data = data["choices"][0]
        .get("logprobs")
        .and_then(|lp| lp.get("content"))
        .and_then(|c| c.as_array())?;

    let mut token_logprobs = Vec::new();
    for token_data in logprobs_data {
        if let (Some(token), Some(logprob)) =
            (token_data["token"].as_str(), token_data["logprob"].as_f64())
        {
            let top_logprobs = token_data["top_logprobs"]
                .as_array()
                .map(|top| {
                    top.iter()
                        .filter_map(|item| {
                            Some(TopLogprob {
                                token: item["token"].as_str()?.to_string(),
                                logprob: item["logprob"].as_f64()?,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            token_logprobs.push(TokenLogprob {
                token: token.to_string(),
                logprob,
                top_logprobs,
            });
        }
    }
    Some(token_logprobs)
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, LLMError> {
        let request = self.build_request(prompt, None, options);
        let data = self.chat_completion(&request).await?;
        let content = parse_content(&data).unwrap_or_default();
        self.record_turn(prompt, &content);
        Ok(content)
    }

    async fn generate_structured(
        &self,
        prompt: &str,
        schema: &SchemaDescriptor,
        options: &GenerateOptions,
    ) -> Result<StructuredResponse, LLMError> {
        let mut request = self.build_request(prompt, Some(STRUCTURED_SYSTEM_PROMPT), options);
        request["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "structured_output",
                "strict": true,
                "schema": schema.to_json_schema(),
            }
        });

        let data = self.chat_completion(&request).await?;
        let content = parse_content(&data).ok_or(LLMError::NoContent)?;
        let value =
            extract_json(&content).map_err(|e| LLMError::InvalidResponse(e.to_string()))?;
        schema.validate(&value)?;

        debug!(model = %self.model, "Structured response validated");
        self.record_turn(prompt, &content);

        Ok(StructuredResponse {
            value,
            usage: parse_usage(&data),
        })
    }

    async fn generate_raw(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<RawLLMResponse, LLMError> {
        let request = self.build_request(prompt, None, options);
        let data = self.chat_completion(&request).await?;
        let content = parse_content(&data).ok_or(LLMError::NoContent)?;
        self.record_turn(prompt, &content);

        Ok(RawLLMResponse {
            content,
            usage: parse_usage(&data),
            logprobs: parse_logprobs(&data),
        })
    }

    fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        self.pricing
            .calculate_cost(&self.model, usage.prompt_tokens, usage.completion_tokens)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn reset_session(&self) {
        if let Some(history) = &self.conversation {
            history.lock().clear();
            debug!(model = %self.model, "Conversation reset");
        }
    }
}
