//! AI adapter client
//!
//! Bounded, retriable, circuit-broken client against an OpenAI-compatible
//! chat-completion endpoint. Four operations share one pipeline:
//!
//! 1. mandatory PII sanitization of the operation input,
//! 2. prompt rendering from external templates,
//! 3. content-hash cache lookup,
//! 4. daily token budget check,
//! 5. the guarded HTTP call (timeout, retries with jitter, `ai_service`
//!    circuit breaker),
//! 6. strict JSON parsing of the assistant message into the operation schema.
//!
//! Any deviation (transport error, non-2xx, unparsable content) counts as
//! a request failure; callers fall back to their rule-based paths.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use resilience::{retry_with_backoff, CircuitBreaker, CircuitBreakerConfig, RetryConfig};

use crate::ai::prompts::{
    PromptLoader, AUTOMATED_RESOLUTION, EXCEPTION_CLASSIFICATION, ORDER_PROBLEM_DETECTION,
    POLICY_LINTING,
};
use crate::config::Config;
use crate::contracts::ai::{
    ExceptionClassification, OrderProblemReport, PolicyLintReport, ResolutionAnalysis,
};
use crate::security::pii::sanitize_for_ai;

pub const AI_SERVICE_BREAKER: &str = "ai_service";
const CACHE_TTL: Duration = Duration::from_secs(1800);
const MAX_COMPLETION_TOKENS: u32 = 800;
const TEMPERATURE: f64 = 0.2;

/// Failures of the AI adapter
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("ai provider is not configured")]
    Disabled,

    #[error("daily token budget exhausted ({used}/{budget})")]
    BudgetExhausted { used: u64, budget: u64 },

    #[error("circuit breaker open for ai_service")]
    CircuitOpen,

    #[error("request failed: {0}")]
    Request(String),

    #[error("provider returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("response did not match the operation schema: {0}")]
    Parse(String),

    #[error("prompt error: {0}")]
    Prompt(String),
}

impl AiError {
    fn is_retryable(&self) -> bool {
        match self {
            AiError::Request(_) | AiError::Parse(_) => true,
            AiError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Input for `classify_exception`. Already narrow: identifiers are reduced
/// to suffixes before this struct is built.
#[derive(Debug, Clone)]
pub struct ClassificationContext {
    pub reason_code: String,
    pub order_id_suffix: String,
    pub tenant: String,
    pub severity: String,
    pub status: String,
    pub duration_minutes: i64,
    pub sla_minutes: i64,
    pub delay_minutes: i64,
}

impl ClassificationContext {
    /// Stable content signature for the response cache.
    fn cache_signature(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.tenant,
            self.reason_code,
            self.order_id_suffix,
            self.duration_minutes,
            self.sla_minutes,
            self.delay_minutes
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

struct TokenBudget {
    max_daily: u64,
    state: Mutex<(NaiveDate, u64)>,
}

impl TokenBudget {
    fn new(max_daily: u64) -> Self {
        Self {
            max_daily,
            state: Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    async fn check(&self) -> Result<(), AiError> {
        let mut state = self.state.lock().await;
        let today = Utc::now().date_naive();
        if state.0 != today {
            *state = (today, 0);
        }
        if state.1 >= self.max_daily {
            return Err(AiError::BudgetExhausted {
                used: state.1,
                budget: self.max_daily,
            });
        }
        Ok(())
    }

    async fn record(&self, tokens: u64) {
        let mut state = self.state.lock().await;
        let today = Utc::now().date_naive();
        if state.0 != today {
            *state = (today, 0);
        }
        state.1 += tokens;
    }

    async fn used_today(&self) -> u64 {
        let state = self.state.lock().await;
        if state.0 == Utc::now().date_naive() {
            state.1
        } else {
            0
        }
    }
}

/// Client for the external AI provider
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryConfig,
    breaker: CircuitBreaker,
    budget: TokenBudget,
    cache: DashMap<String, (Instant, JsonValue)>,
    prompts: Arc<PromptLoader>,
}

impl AiClient {
    pub fn from_config(config: &Config, prompts: Arc<PromptLoader>) -> Self {
        let breaker = resilience::registry::get_or_create(
            AI_SERVICE_BREAKER,
            CircuitBreakerConfig::default(),
        );
        Self::new(
            config.ai_provider_base_url.clone(),
            config.ai_api_key.clone(),
            config.ai_model.clone(),
            Duration::from_secs(config.ai_timeout_seconds),
            RetryConfig::ai_default(config.ai_retry_max_attempts),
            config.ai_max_daily_tokens,
            breaker,
            prompts,
        )
    }

    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
        retry: RetryConfig,
        max_daily_tokens: u64,
        breaker: CircuitBreaker,
        prompts: Arc<PromptLoader>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            retry,
            breaker,
            budget: TokenBudget::new(max_daily_tokens),
            cache: DashMap::new(),
            prompts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some() && self.base_url != "disabled"
    }

    pub async fn tokens_used_today(&self) -> u64 {
        self.budget.used_today().await
    }

    /// Drop every cached response (operator cache-clear).
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    // ---------- operations ----------

    /// Classify an exception into label + confidence + narrative notes.
    pub async fn classify_exception(
        &self,
        context: &ClassificationContext,
    ) -> Result<ExceptionClassification, AiError> {
        let mut vars = BTreeMap::new();
        vars.insert("reason_code", context.reason_code.clone());
        vars.insert("order_id_suffix", context.order_id_suffix.clone());
        vars.insert("tenant", context.tenant.clone());
        vars.insert("severity", context.severity.clone());
        vars.insert("status", context.status.clone());
        vars.insert("duration_minutes", context.duration_minutes.to_string());
        vars.insert("sla_minutes", context.sla_minutes.to_string());
        vars.insert("delay_minutes", context.delay_minutes.to_string());

        let prompt = self
            .prompts
            .render(EXCEPTION_CLASSIFICATION, &vars)
            .map_err(|e| AiError::Prompt(e.to_string()))?;

        let cache_key = Self::cache_key(EXCEPTION_CLASSIFICATION, &context.cache_signature());
        let value = self.complete_cached(&cache_key, &prompt).await?;
        serde_json::from_value(value).map_err(|e| AiError::Parse(e.to_string()))
    }

    /// Inspect a raw order payload for problems.
    pub async fn analyze_order_problems(
        &self,
        raw_order: &JsonValue,
    ) -> Result<OrderProblemReport, AiError> {
        let sanitized = sanitize_for_ai(raw_order);

        let mut vars = BTreeMap::new();
        vars.insert("order_data", sanitized.to_string());
        vars.insert("analysis_timestamp", Utc::now().to_rfc3339());

        let prompt = self
            .prompts
            .render(ORDER_PROBLEM_DETECTION, &vars)
            .map_err(|e| AiError::Prompt(e.to_string()))?;

        let cache_key = Self::cache_key(ORDER_PROBLEM_DETECTION, &sanitized.to_string());
        let value = self.complete_cached(&cache_key, &prompt).await?;
        serde_json::from_value(value).map_err(|e| AiError::Parse(e.to_string()))
    }

    /// Judge whether an exception can be resolved without a human.
    ///
    /// `raw_context` must be unenriched order data; callers own that
    /// discipline. PII sanitization still applies here.
    pub async fn analyze_automated_resolution(
        &self,
        raw_context: &JsonValue,
        reason_code: &str,
    ) -> Result<ResolutionAnalysis, AiError> {
        let sanitized = sanitize_for_ai(raw_context);

        let mut vars = BTreeMap::new();
        vars.insert("context", sanitized.to_string());
        vars.insert("reason_code", reason_code.to_string());

        let prompt = self
            .prompts
            .render(AUTOMATED_RESOLUTION, &vars)
            .map_err(|e| AiError::Prompt(e.to_string()))?;

        let cache_key = Self::cache_key(
            AUTOMATED_RESOLUTION,
            &format!("{reason_code}:{sanitized}"),
        );
        let value = self.complete_cached(&cache_key, &prompt).await?;
        serde_json::from_value(value).map_err(|e| AiError::Parse(e.to_string()))
    }

    /// Review a policy document for configuration mistakes.
    pub async fn lint_policy(
        &self,
        policy_text: &str,
        policy_type: &str,
    ) -> Result<PolicyLintReport, AiError> {
        let mut vars = BTreeMap::new();
        vars.insert("policy_type", policy_type.to_string());
        vars.insert("policy_content", policy_text.to_string());

        let prompt = self
            .prompts
            .render(POLICY_LINTING, &vars)
            .map_err(|e| AiError::Prompt(e.to_string()))?;

        let cache_key = Self::cache_key(POLICY_LINTING, &format!("{policy_type}:{policy_text}"));
        let value = self.complete_cached(&cache_key, &prompt).await?;
        serde_json::from_value(value).map_err(|e| AiError::Parse(e.to_string()))
    }

    /// Probe used by the health checker: cheap GET against the models list.
    pub async fn health_probe(&self) -> Result<Duration, AiError> {
        if !self.is_enabled() {
            return Err(AiError::Disabled);
        }

        let started = Instant::now();
        let mut request = self.http.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(started.elapsed())
        } else {
            Err(AiError::Api {
                status: response.status().as_u16(),
                message: "health probe failed".to_string(),
            })
        }
    }

    // ---------- pipeline ----------

    fn cache_key(operation: &str, content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update(b":");
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn complete_cached(
        &self,
        cache_key: &str,
        prompt: &str,
    ) -> Result<JsonValue, AiError> {
        if let Some(entry) = self.cache.get(cache_key) {
            let (cached_at, value) = entry.value();
            if cached_at.elapsed() < CACHE_TTL {
                debug!(cache_key, "ai response cache hit");
                return Ok(value.clone());
            }
        }

        let value = self.complete(prompt).await?;
        self.cache
            .insert(cache_key.to_string(), (Instant::now(), value.clone()));
        Ok(value)
    }

    async fn complete(&self, prompt: &str) -> Result<JsonValue, AiError> {
        if !self.is_enabled() {
            return Err(AiError::Disabled);
        }
        self.budget.check().await?;

        self.breaker
            .allow_request()
            .await
            .map_err(|_| AiError::CircuitOpen)?;

        let result = retry_with_backoff(
            || self.send_once(prompt),
            &self.retry,
            "ai_chat_completion",
            AiError::is_retryable,
        )
        .await;

        match &result {
            Ok(_) => self.breaker.record_success().await,
            Err(e) => {
                warn!(error = %e, "ai request failed after retries");
                self.breaker.record_failure().await;
            }
        }

        result
    }

    async fn send_once(&self, prompt: &str) -> Result<JsonValue, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_COMPLETION_TOKENS,
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AiError::Parse(format!("completion envelope: {e}")))?;

        if let Some(usage) = &completion.usage {
            self.budget.record(usage.total_tokens).await;
        }

        let content = completion
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AiError::Parse("no choices in completion".to_string()))?;

        parse_json_content(content)
    }
}

/// Parse the assistant message as JSON, tolerating markdown code fences.
fn parse_json_content(content: &str) -> Result<JsonValue, AiError> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(stripped.trim()).map_err(|e| AiError::Parse(e.to_string()))
}
