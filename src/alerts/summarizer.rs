//! AI summarization of matched log rows

use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use serde::{Deserialize, Serialize};

use crate::engine::NormalizedRow;
use crate::storage::{Store, StoreError};

/// Character budget for the log excerpt sent to the model
pub const EXCERPT_LIMIT: usize = 8000;

/// Default timeout for one completion call
pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You are a senior log analysis assistant. Using the log excerpt and the \
user's question, reply with concise bullet points covering: symptoms and scope, likely causes, \
how to verify, and mitigation or fix steps.";

const FALLBACK_INSTRUCTION: &str =
    "Identify likely problems in the following log excerpt and suggest next steps.";

/// Text summarization collaborator
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, instruction: &str, rows: &[NormalizedRow]) -> Result<String, SummarizeError>;
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

fn default_enabled() -> bool {
    true
}

/// OpenAI-compatible chat model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    /// Model identifier sent to the provider
    pub model: String,
    /// Base URL up to, but excluding, `/chat/completions`
    #[serde(default)]
    pub api_base: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
}

impl ModelProfile {
    pub fn new(name: impl Into<String>, model: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            model: model.into(),
            api_base: api_base.into(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            enabled: true,
            is_default: false,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    fn check_complete(&self) -> Result<(), SummarizeError> {
        let missing: Vec<&str> = [
            ("apiBase", &self.api_base),
            ("apiKey", &self.api_key),
            ("model", &self.model),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SummarizeError::IncompleteModel(missing.join(", ")))
        }
    }
}

/// Render rows as JSON lines, stopping before `limit` bytes with a count of
/// the rows left out.
pub fn render_excerpt(rows: &[NormalizedRow], limit: usize) -> String {
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let line = serde_json::to_string(row).unwrap_or_default();
        if out.len() + line.len() + 1 > limit {
            out.push_str(&format!("\n... ({} more) ...", rows.len() - i));
            break;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}

/// Summarizer backed by the default enabled [`ModelProfile`]
pub struct OpenAiSummarizer {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl OpenAiSummarizer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            timeout: DEFAULT_SUMMARY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_messages(
        instruction: &str,
        rows: &[NormalizedRow],
    ) -> Result<Vec<ChatCompletionRequestMessage>, SummarizeError> {
        let instruction = match instruction.trim() {
            "" => FALLBACK_INSTRUCTION,
            text => text,
        };
        let user = format!(
            "{}\n\nLog excerpt (truncated):\n{}",
            instruction,
            render_excerpt(rows, EXCERPT_LIMIT)
        );

        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()
                .map_err(|e| SummarizeError::Request(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| SummarizeError::Request(e.to_string()))?
                .into(),
        ])
    }
}

#[async_trait::async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, instruction: &str, rows: &[NormalizedRow]) -> Result<String, SummarizeError> {
        let profile = self.store.default_model()?.ok_or(SummarizeError::NoModel)?;
        profile.check_complete()?;

        let config = OpenAIConfig::new()
            .with_api_base(profile.api_base.trim_end_matches('/'))
            .with_api_key(profile.api_key.clone());
        // One attempt per run; 429 and 5xx surface as provider errors
        let client = Client::with_config(config).with_backoff(
            backoff::ExponentialBackoffBuilder::new()
                .with_max_elapsed_time(Some(Duration::ZERO))
                .build(),
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(profile.model.clone())
            .messages(Self::build_messages(instruction, rows)?)
            .temperature(profile.temperature)
            .max_tokens(profile.max_tokens)
            .build()
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, client.chat().create(request))
            .await
            .map_err(|_| SummarizeError::Timeout(self.timeout))?
            .map_err(|e| SummarizeError::Provider(e.to_string()))?;

        tracing::debug!(model = %profile.model, rows = rows.len(), "Summary generated");

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(SummarizeError::EmptyResponse)
    }
}

/// Summarization errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("No enabled default model configured")]
    NoModel,

    #[error("Incomplete model config, missing: {0}")]
    IncompleteModel(String),

    #[error("Invalid completion request: {0}")]
    Request(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned no content")]
    EmptyResponse,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::test_support::serve_stub;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rows(n: usize) -> Vec<NormalizedRow> {
        (0..n)
            .map(|i| NormalizedRow::new(i.to_string(), format!("error number {}", i)))
            .collect()
    }

    #[test]
    fn test_excerpt_fits_budget() {
        let excerpt = render_excerpt(&rows(3), EXCERPT_LIMIT);
        assert_eq!(excerpt.lines().count(), 3);
        assert!(excerpt.contains("error number 2"));
    }

    #[test]
    fn test_excerpt_truncates_with_count() {
        let all = rows(500);
        let excerpt = render_excerpt(&all, 200);
        assert!(excerpt.len() < 250);
        assert!(excerpt.ends_with("more) ..."));
        assert!(excerpt.starts_with('{'));
    }

    #[test]
    fn test_model_profile_defaults() {
        let profile: ModelProfile = serde_json::from_value(json!({
            "name": "gpt",
            "model": "gpt-4o-mini",
            "apiBase": "https://api.example.com/v1"
        }))
        .unwrap();
        assert_eq!(profile.temperature, 0.3);
        assert_eq!(profile.max_tokens, 512);
        assert!(profile.enabled);
        assert!(!profile.is_default);
        assert!(matches!(
            profile.check_complete(),
            Err(SummarizeError::IncompleteModel(missing)) if missing == "apiKey"
        ));
    }

    #[tokio::test]
    async fn test_no_model_configured() {
        let summarizer = OpenAiSummarizer::new(Arc::new(MemoryStore::new()));
        let err = summarizer.summarize("why?", &rows(1)).await.unwrap_err();
        assert!(matches!(err, SummarizeError::NoModel));
    }

    #[tokio::test]
    async fn test_summarize_against_stub_provider() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let content = format!(
                    "{} {} {}",
                    auth,
                    body["model"].as_str().unwrap_or_default(),
                    body["messages"].as_array().map(|m| m.len()).unwrap_or(0)
                );
                Json(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "test-model",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": content},
                        "finish_reason": "stop"
                    }]
                }))
            }),
        );
        let base = serve_stub(app).await;

        let store = Arc::new(MemoryStore::new());
        store
            .insert_model(
                ModelProfile::new("stub", "test-model", format!("{}/v1/", base))
                    .with_api_key("sk-test")
                    .with_default(true),
            )
            .unwrap();

        let summary = OpenAiSummarizer::new(store)
            .summarize("Found 1 abnormal log", &rows(1))
            .await
            .unwrap();
        assert_eq!(summary, "Bearer sk-test test-model 2");
    }

    #[tokio::test]
    async fn test_rate_limited_provider_is_called_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v1/chat/completions",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({
                            "error": {
                                "message": "Rate limit reached",
                                "type": "requests",
                                "param": null,
                                "code": "rate_limit_exceeded"
                            }
                        })),
                    )
                }),
            )
            .with_state(hits.clone());
        let base = serve_stub(app).await;

        let store = Arc::new(MemoryStore::new());
        store
            .insert_model(
                ModelProfile::new("stub", "test-model", format!("{}/v1", base))
                    .with_api_key("sk-test")
                    .with_default(true),
            )
            .unwrap();

        let err = OpenAiSummarizer::new(store)
            .with_timeout(Duration::from_secs(10))
            .summarize("why?", &rows(1))
            .await
            .unwrap_err();

        assert!(matches!(err, SummarizeError::Provider(_)), "got {:?}", err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
